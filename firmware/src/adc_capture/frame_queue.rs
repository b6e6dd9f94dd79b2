use core::{marker::PhantomData, ptr, slice};

use super::ring_buffer::{DescriptorChain, DmaGrant};
use crate::error::ConfigError;

/// What happened to a frame handed back by the DMA engine.
#[derive(Debug)]
pub struct Completion {
    pub descriptor: usize,
    /// Running count of completed frames since the last reset, starting at 0.
    pub sequence: u64,
    /// Descriptor to fill next. `None` means the chain is exhausted and the queue has
    /// entered the overflow condition.
    pub next: Option<DmaGrant>,
}

/// The oldest queued frame, lent to the consumer so it can be copied without holding
/// the session lock.
///
/// The leased bytes are not handed to the DMA engine until the lease comes back
/// through [`FrameQueue::finish_lease`].
#[derive(Debug)]
pub struct FrameLease {
    ptr: *const u8,
    len: usize,
    generation: u32,
}

impl FrameLease {
    pub fn len(&self) -> usize {
        self.len
    }

    /// Copies the frame into the front of `out`.
    pub fn copy_to(&self, out: &mut [u8]) {
        let out = &mut out[..self.len];
        // Leased bytes stay inside the storage and are never lent to DMA
        unsafe { ptr::copy_nonoverlapping(self.ptr, out.as_mut_ptr(), self.len) }
    }
}

/// First descriptor past the leased bytes, so a fresh chain lends those out last.
fn first_after(lease: Option<(usize, usize)>, frame_size: usize) -> usize {
    lease.map_or(0, |(_, end)| end.div_ceil(frame_size))
}

/// Completed frames in production order, backed by a [`DescriptorChain`].
///
/// The producer side (`complete`) runs in interrupt context and does constant work:
/// no allocation, no copying. The consumer leases the oldest frame, copies it out
/// with the lock released and then hands the lease back.
pub struct FrameQueue<'d> {
    buffer: *mut u8,
    storage_len: usize,
    chain: Option<DescriptorChain<'d>>,
    overflowed: bool,
    completed: u64,
    /// Byte range of the frame being copied out.
    lease: Option<(usize, usize)>,
    /// Bumped whenever queued frames are dropped, so stale leases can be told apart.
    generation: u32,
    _storage: PhantomData<&'d mut [u8]>,
}

unsafe impl Send for FrameQueue<'_> {}

impl<'d> FrameQueue<'d> {
    pub fn new(storage: &'d mut [u8]) -> Self {
        Self {
            buffer: storage.as_mut_ptr(),
            storage_len: storage.len(),
            chain: None,
            overflowed: false,
            completed: 0,
            lease: None,
            generation: 0,
            _storage: PhantomData,
        }
    }

    pub fn storage_len(&self) -> usize {
        self.storage_len
    }

    /// Re-carves the storage into `depth` frames of `frame_size` bytes. Nothing changes
    /// if the storage is too small.
    pub fn rebuild(&mut self, frame_size: usize, depth: usize) -> Result<(), ConfigError> {
        let requested = frame_size * depth;
        let available = self.storage_len();
        if requested > available || frame_size == 0 || depth == 0 {
            return Err(ConfigError::StorageTooSmall {
                requested,
                available,
            });
        }

        let mut chain = unsafe { DescriptorChain::from_raw_parts(self.buffer, frame_size, depth) };
        chain.reset_from(first_after(self.lease, frame_size));
        self.chain = Some(chain);
        self.overflowed = false;
        self.completed = 0;
        self.generation = self.generation.wrapping_add(1);
        Ok(())
    }

    /// Un-carves the storage. Used when a session is destroyed.
    pub fn release(&mut self) {
        self.chain = None;
        self.overflowed = false;
        self.generation = self.generation.wrapping_add(1);
    }

    /// Gives the storage back. Taking `self` by value means no lease is outstanding.
    pub fn into_storage(self) -> &'d mut [u8] {
        unsafe { slice::from_raw_parts_mut(self.buffer, self.storage_len) }
    }

    pub fn overflowed(&self) -> bool {
        self.overflowed
    }

    pub fn queued(&self) -> usize {
        self.chain.as_ref().map_or(0, DescriptorChain::queued)
    }

    /// Lends the next free descriptor unless it overlaps a leased frame.
    fn next_grant(&mut self) -> Option<DmaGrant> {
        let lease = self.lease;
        let chain = self.chain.as_mut()?;
        let descriptor = chain.peek_free()?;

        let start = descriptor * chain.frame_size();
        let end = start + chain.frame_size();
        if lease.is_some_and(|(leased, leased_end)| start < leased_end && leased < end) {
            return None;
        }

        chain.next_dma_buffer()
    }

    /// Hands out the first descriptor for the DMA engine to fill.
    pub fn arm(&mut self) -> Option<DmaGrant> {
        self.next_grant()
    }

    /// Queues a filled frame and arms the next free descriptor.
    ///
    /// Returns `None` only if the queue was never carved, in which case the grant can
    /// not have come from it.
    pub fn complete(&mut self, grant: DmaGrant) -> Option<Completion> {
        let descriptor = self.chain.as_mut()?.dma_done(grant);
        let next = self.next_grant();

        let sequence = self.completed;
        self.completed += 1;
        if next.is_none() {
            self.overflowed = true;
        }

        Some(Completion {
            descriptor,
            sequence,
            next,
        })
    }

    /// Contents of a queued frame, for completion callbacks.
    pub fn frame(&self, descriptor: usize) -> &[u8] {
        self.chain
            .as_ref()
            .map_or(&[][..], |chain| chain.frame(descriptor))
    }

    /// Lends out the oldest queued frame. Returns `None` if nothing is queued or a lease
    /// is already outstanding.
    pub fn lease_front(&mut self) -> Option<FrameLease> {
        if self.lease.is_some() {
            return None;
        }
        let chain = self.chain.as_ref()?;
        let descriptor = chain.app_descriptor()?;

        let len = chain.frame_size();
        let start = descriptor * len;
        self.lease = Some((start, start + len));
        Some(FrameLease {
            ptr: self.buffer.wrapping_add(start),
            len,
            generation: self.generation,
        })
    }

    /// Takes a lease back. The frame leaves the queue unless it was dropped while it was
    /// being copied, in which case the copy must be thrown away and `false` is returned.
    pub fn finish_lease(&mut self, lease: FrameLease) -> bool {
        self.lease = None;
        if lease.generation != self.generation {
            return false;
        }
        if let Some(chain) = self.chain.as_mut() {
            chain.app_done();
        }
        true
    }

    /// Drops every queued frame. The overflow condition is kept. Returns the number of
    /// frames dropped.
    pub fn discard(&mut self) -> usize {
        let Some(chain) = self.chain.as_mut() else {
            return 0;
        };
        let dropped = chain.queued();
        chain.discard_app();
        self.generation = self.generation.wrapping_add(1);
        dropped
    }

    /// Frees every descriptor and clears the overflow condition. Grants still held by
    /// the converter must not be returned afterwards.
    pub fn reset(&mut self) {
        let lease = self.lease;
        if let Some(chain) = self.chain.as_mut() {
            chain.reset_from(first_after(lease, chain.frame_size()));
        }
        self.overflowed = false;
        self.completed = 0;
        self.generation = self.generation.wrapping_add(1);
    }
}
