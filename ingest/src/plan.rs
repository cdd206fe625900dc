/// The target timestamps pending since the last checkpoint.
///
/// Targets are `checkpoint + k * interval` for `k = 1..=count`, with
/// `count = floor((now - checkpoint) / interval)`, optionally capped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntervalPlan {
    checkpoint: u64,
    interval_seconds: u64,
    count: u64,
}

impl IntervalPlan {
    pub fn new(checkpoint: u64, now: u64, interval_seconds: u64) -> Self {
        let count = if interval_seconds == 0 {
            0
        } else {
            now.saturating_sub(checkpoint) / interval_seconds
        };

        Self {
            checkpoint,
            interval_seconds,
            count,
        }
    }

    /// Limits the number of intervals processed in one run.
    pub fn with_max_intervals(mut self, max_intervals: Option<u64>) -> Self {
        if let Some(max_intervals) = max_intervals {
            self.count = self.count.min(max_intervals);
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn len(&self) -> u64 {
        self.count
    }

    /// The checkpoint the plan started from.
    pub fn start(&self) -> u64 {
        self.checkpoint
    }

    /// The timestamp at the end of the last planned interval.
    pub fn end(&self) -> u64 {
        self.checkpoint + self.count * self.interval_seconds
    }

    pub fn targets(&self) -> impl Iterator<Item = u64> + '_ {
        (1..=self.count).map(move |k| self.checkpoint + k * self.interval_seconds)
    }
}
