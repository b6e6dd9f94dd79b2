//! A converter that produces data on demand, for running a session without hardware.

use adc_stream_core::{record::RECORD_BYTES, OutputFormat, SampleRecord, Unit};

use crate::{
    adc_capture::DmaGrant,
    sampler::{Capabilities, Converter, ScanPlan, ScanSchedule},
};

/// Fills a whole frame the moment the session asks for a completed transfer.
///
/// Values come from `source(unit, channel, conversion_number)` and are truncated to the
/// entry's bit width, the way a real converter's result register would hold them.
pub struct SimulatedConverter<F> {
    capabilities: Capabilities,
    source: F,
    plan: Option<(ScanSchedule, OutputFormat)>,
    scan: Option<ScanSchedule>,
    loaded: Option<DmaGrant>,
    conversions: u64,
}

impl<F> SimulatedConverter<F>
where
    F: FnMut(Unit, u8, u64) -> u16 + Send,
{
    pub fn new(source: F) -> Self {
        Self::with_capabilities(source, Capabilities::DEFAULT)
    }

    pub fn with_capabilities(source: F, capabilities: Capabilities) -> Self {
        Self {
            capabilities,
            source,
            plan: None,
            scan: None,
            loaded: None,
            conversions: 0,
        }
    }

    /// Conversions performed since creation.
    pub fn conversions(&self) -> u64 {
        self.conversions
    }

    fn is_running(&self) -> bool {
        self.scan.is_some()
    }
}

impl<F> Converter for SimulatedConverter<F>
where
    F: FnMut(Unit, u8, u64) -> u16 + Send,
{
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn configure(&mut self, plan: &ScanPlan) {
        self.plan = Some((plan.schedule(), plan.format()));
    }

    fn load(&mut self, grant: DmaGrant) {
        self.loaded = Some(grant);
    }

    fn start(&mut self) {
        // Every start scans from the top of the table
        self.scan = self.plan.as_ref().map(|(schedule, _)| schedule.clone());
    }

    fn take_completed(&mut self) -> Option<DmaGrant> {
        if !self.is_running() {
            return None;
        }
        let format = self.plan.as_ref()?.1;
        let scan = self.scan.as_mut()?;
        let mut grant = self.loaded.take()?;

        for word in grant.chunks_exact_mut(RECORD_BYTES) {
            let Some(entry) = scan.next() else {
                break;
            };

            let mask = ((1u32 << entry.bit_width) - 1) as u16;
            let value = (self.source)(entry.unit, entry.channel, self.conversions) & mask;
            self.conversions += 1;

            let record = if format.carries_unit() {
                SampleRecord::with_unit(entry.unit, entry.channel, value)
            } else {
                SampleRecord::new(entry.channel, value)
            };
            format.write(record, word);
        }

        Some(grant)
    }

    fn stop(&mut self) -> Option<DmaGrant> {
        self.scan = None;
        self.loaded.take()
    }
}
