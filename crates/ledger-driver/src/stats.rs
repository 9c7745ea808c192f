/// Server-reported read I/O consumed by a statement or page fetch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IOUsage {
    pub read_ios: i64,
}

/// Server-side processing time reported for a statement or page fetch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimingInformation {
    pub processing_time_ms: i64,
}

/// Running totals of usage reports across the pages and attempts of one
/// operation. Each total is unset until the first non-null report arrives,
/// and thereafter every report adds in. An omitted report contributes zero
/// without resetting the total.
#[derive(Debug, Clone, Default)]
pub(crate) struct UsageTotals {
    io: Option<IOUsage>,
    timing: Option<TimingInformation>,
}

impl UsageTotals {
    pub fn record(&mut self, io: Option<IOUsage>, timing: Option<TimingInformation>) {
        if let Some(report) = io {
            self.io.get_or_insert(IOUsage::default()).read_ios += report.read_ios;
        }
        if let Some(report) = timing {
            self.timing
                .get_or_insert(TimingInformation::default())
                .processing_time_ms += report.processing_time_ms;
        }
    }

    /// Fold another set of totals into this one.
    pub fn absorb(&mut self, other: UsageTotals) {
        self.record(other.io, other.timing);
    }

    pub fn io(&self) -> Option<IOUsage> {
        self.io
    }

    pub fn timing(&self) -> Option<TimingInformation> {
        self.timing
    }
}
