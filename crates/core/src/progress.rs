//! Transfer progress accounting.

/// Highest percentage reported before the server confirms assembly.
pub const MAX_TRANSFER_PERCENT: u8 = 99;

/// Percentage of `file_size` covered by acknowledged plus in-flight bytes,
/// capped at 99 until assembly is confirmed.
pub fn transfer_percent(acknowledged: u64, in_flight: u64, file_size: u64) -> u8 {
    if file_size == 0 {
        return 0;
    }
    let sent = acknowledged.saturating_add(in_flight).min(file_size) as u128;
    let pct = sent * 100 / file_size as u128;
    (pct as u8).min(MAX_TRANSFER_PERCENT)
}

/// Turns raw byte counts into a non-decreasing percentage sequence.
///
/// A retried chunk restarts its in-flight count from zero; the tracker
/// holds the last emitted value so the reported percentage never goes back.
#[derive(Debug)]
pub struct ProgressTracker {
    file_size: u64,
    last: Option<u8>,
    finished: bool,
}

impl ProgressTracker {
    pub fn new(file_size: u64) -> Self {
        Self {
            file_size,
            last: None,
            finished: false,
        }
    }

    /// Record progress; returns the percentage to emit if it increased.
    pub fn update(&mut self, acknowledged: u64, in_flight: u64) -> Option<u8> {
        if self.finished {
            return None;
        }
        let pct = transfer_percent(acknowledged, in_flight, self.file_size);
        match self.last {
            Some(last) if pct <= last => None,
            _ => {
                self.last = Some(pct);
                Some(pct)
            }
        }
    }

    /// Mark the transfer as assembled; returns 100 exactly once.
    pub fn finish(&mut self) -> Option<u8> {
        if self.finished {
            return None;
        }
        self.finished = true;
        self.last = Some(100);
        Some(100)
    }

    pub fn last(&self) -> u8 {
        self.last.unwrap_or(0)
    }
}
