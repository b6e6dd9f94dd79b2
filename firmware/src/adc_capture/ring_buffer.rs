use core::marker::PhantomData;
use core::ops::{Deref, DerefMut};
use core::slice;

/// A frame buffer lent to the DMA engine.
///
/// Holding a grant is the only way to write into a frame; the chain hands out each
/// descriptor at most once until it is returned through [`DescriptorChain::dma_done`].
pub struct DmaGrant {
    ptr: *mut u8,
    len: usize,
    descriptor: usize,
}

impl DmaGrant {
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.ptr
    }

    /// Position of the descriptor in the chain.
    pub fn descriptor(&self) -> usize {
        self.descriptor
    }
}

unsafe impl Send for DmaGrant {}

impl core::fmt::Debug for DmaGrant {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DmaGrant")
            .field("descriptor", &self.descriptor)
            .field("len", &self.len)
            .finish()
    }
}

impl Deref for DmaGrant {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        unsafe { slice::from_raw_parts(self.ptr, self.len) }
    }
}

impl DerefMut for DmaGrant {
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { slice::from_raw_parts_mut(self.ptr, self.len) }
    }
}

#[derive(Debug, PartialEq, Eq)]
struct Grant {
    start: usize,
    len: usize,
}

/// A run of consecutive descriptors, wrapping at the chain depth.
#[derive(Debug, Clone, Copy)]
struct RingSlice {
    start: usize,
    len: usize,
}

impl RingSlice {
    const EMPTY: Self = Self { start: 0, len: 0 };

    fn pop_front(&mut self, len: usize, modulus: usize) -> Option<Grant> {
        if len > self.len {
            return None;
        }

        let grant = Grant {
            start: self.start,
            len,
        };

        self.start = (self.start + len) % modulus;
        self.len -= len;

        Some(grant)
    }

    fn push_back(&mut self, grant: Grant, modulus: usize) {
        assert_eq!(
            grant.start,
            self.end(modulus),
            "Grant did not match end of this slice"
        );

        let new_len = self.len + grant.len;
        assert!(new_len <= modulus);
        self.len = new_len;
    }

    fn end(&self, modulus: usize) -> usize {
        (self.start + self.len) % modulus
    }
}

/// Circular chain of equally sized frame buffers carved out of one storage area.
///
/// Descriptors move `free` → `dma_owned` → `app_owned` → `free`. The three sets are
/// consecutive runs of the ring, so completed frames leave in the order they were
/// filled and a descriptor can never be written and read at the same time.
pub struct DescriptorChain<'d> {
    app_owned: RingSlice,
    dma_owned: RingSlice,
    free: RingSlice,
    buffer: *mut u8,
    frame_size: usize,
    depth: usize,
    _storage: PhantomData<&'d mut [u8]>,
}

unsafe impl Send for DescriptorChain<'_> {}

impl<'d> DescriptorChain<'d> {
    /// Splits the first `frame_size * depth` bytes of `storage` into `depth` frames.
    #[cfg(test)]
    pub fn new(storage: &'d mut [u8], frame_size: usize, depth: usize) -> Self {
        assert!(frame_size * depth <= storage.len());
        unsafe { Self::from_raw_parts(storage.as_mut_ptr(), frame_size, depth) }
    }

    /// Builds a chain of `depth` frames of `frame_size` bytes starting at `buffer`.
    ///
    /// # Safety
    ///
    /// `buffer` must be valid for reads and writes of `frame_size * depth` bytes for
    /// `'d`, and nothing outside the chain may write to them while the chain exists.
    pub unsafe fn from_raw_parts(buffer: *mut u8, frame_size: usize, depth: usize) -> Self {
        assert!(frame_size > 0 && depth > 0);

        Self {
            app_owned: RingSlice::EMPTY,
            dma_owned: RingSlice::EMPTY,
            free: RingSlice {
                start: 0,
                len: depth,
            },
            buffer,
            frame_size,
            depth,
            _storage: PhantomData,
        }
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Completed frames waiting for the application.
    pub fn queued(&self) -> usize {
        self.app_owned.len
    }

    #[cfg(test)]
    fn free(&self) -> usize {
        self.free.len
    }

    #[cfg(test)]
    fn in_flight(&self) -> usize {
        self.dma_owned.len
    }

    fn is_consistent(&self) -> bool {
        self.app_owned.end(self.depth) == self.dma_owned.start
            && self.dma_owned.end(self.depth) == self.free.start
            && self.free.end(self.depth) == self.app_owned.start
            && (self.app_owned.len + self.dma_owned.len + self.free.len) == self.depth
    }

    fn frame_ptr(&self, descriptor: usize) -> *mut u8 {
        debug_assert!(descriptor < self.depth);
        unsafe { self.buffer.add(descriptor * self.frame_size) }
    }

    /// The descriptor [`Self::next_dma_buffer`] would lend next.
    pub fn peek_free(&self) -> Option<usize> {
        (self.free.len > 0).then_some(self.free.start)
    }

    /// Lends the next free descriptor to the DMA engine, or `None` if every descriptor
    /// is in flight or waiting to be read.
    pub fn next_dma_buffer(&mut self) -> Option<DmaGrant> {
        let grant = self.free.pop_front(1, self.depth)?;

        let dma = DmaGrant {
            ptr: self.frame_ptr(grant.start),
            len: self.frame_size,
            descriptor: grant.start,
        };
        self.dma_owned.push_back(grant, self.depth);

        debug_assert!(self.is_consistent());
        Some(dma)
    }

    /// Takes back the oldest in-flight descriptor as a completed frame and returns its
    /// position.
    pub fn dma_done(&mut self, dma: DmaGrant) -> usize {
        let grant = self
            .dma_owned
            .pop_front(1, self.depth)
            .expect("Can only return a DMA buffer if you had one");
        assert_eq!(dma.ptr, self.frame_ptr(grant.start));

        let descriptor = grant.start;
        // Ownership is passed to app
        self.app_owned.push_back(grant, self.depth);
        debug_assert!(self.is_consistent());

        descriptor
    }

    /// Contents of a completed frame.
    pub fn frame(&self, descriptor: usize) -> &[u8] {
        unsafe { slice::from_raw_parts(self.frame_ptr(descriptor), self.frame_size) }
    }

    /// Position of the oldest completed frame, if any.
    pub fn app_descriptor(&self) -> Option<usize> {
        (self.app_owned.len > 0).then_some(self.app_owned.start)
    }

    #[cfg(test)]
    fn app_frame(&self) -> Option<&[u8]> {
        self.app_descriptor().map(|descriptor| self.frame(descriptor))
    }

    /// Releases the oldest completed frame back to the free set.
    pub fn app_done(&mut self) {
        if let Some(grant) = self.app_owned.pop_front(1, self.depth) {
            self.free.push_back(grant, self.depth);
        }
        debug_assert!(self.is_consistent());
    }

    /// Releases every completed frame without reading it.
    pub fn discard_app(&mut self) {
        let queued = self.app_owned.len;
        if let Some(grant) = self.app_owned.pop_front(queued, self.depth) {
            self.free.push_back(grant, self.depth);
        }
        debug_assert!(self.is_consistent());
    }

    /// Marks every descriptor free, with `first` lent out next. Grants still held by the
    /// DMA engine become invalid.
    pub fn reset_from(&mut self, first: usize) {
        let start = first % self.depth;
        self.app_owned = RingSlice { start, len: 0 };
        self.dma_owned = RingSlice { start, len: 0 };
        self.free = RingSlice {
            start,
            len: self.depth,
        };
        debug_assert!(self.is_consistent());
    }
}
