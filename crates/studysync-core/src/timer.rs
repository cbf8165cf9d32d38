//! Clock-injected timer primitives.
//!
//! Timers never read the system clock. Owners arm them with an explicit
//! `now_ms` and ask whether they are due while polling.

/// One-shot deadline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Deadline {
    at_ms: Option<u64>,
}

impl Deadline {
    /// Arms (or re-arms) the deadline `delay_ms` after `now_ms`.
    pub fn arm(&mut self, now_ms: u64, delay_ms: u64) {
        self.at_ms = Some(now_ms.saturating_add(delay_ms));
    }

    /// Arms the deadline only when it is not already armed.
    ///
    /// Returns `true` when this call armed it. Repeated triggers inside one
    /// window coalesce into the first deadline.
    pub fn arm_if_idle(&mut self, now_ms: u64, delay_ms: u64) -> bool {
        if self.at_ms.is_some() {
            return false;
        }
        self.arm(now_ms, delay_ms);
        true
    }

    /// Disarms the deadline.
    pub fn cancel(&mut self) {
        self.at_ms = None;
    }

    /// Returns `true` while armed.
    pub fn is_armed(&self) -> bool {
        self.at_ms.is_some()
    }

    /// Scheduled fire time, if armed.
    pub fn at(&self) -> Option<u64> {
        self.at_ms
    }

    /// Disarms and returns the scheduled time when it is due at `now_ms`.
    pub fn take_if_due(&mut self, now_ms: u64) -> Option<u64> {
        match self.at_ms {
            Some(at) if at <= now_ms => {
                self.at_ms = None;
                Some(at)
            }
            _ => None,
        }
    }
}

/// Recurring timer with a fixed period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    period_ms: u64,
    next_at_ms: Option<u64>,
}

impl Interval {
    /// Creates a stopped interval. A zero period is treated as one millisecond.
    pub fn new(period_ms: u64) -> Self {
        Self {
            period_ms: period_ms.max(1),
            next_at_ms: None,
        }
    }

    /// (Re)starts the interval so the next firing is one period after `now_ms`.
    pub fn start(&mut self, now_ms: u64) {
        self.next_at_ms = Some(now_ms.saturating_add(self.period_ms));
    }

    /// Stops the interval.
    pub fn stop(&mut self) {
        self.next_at_ms = None;
    }

    /// Returns `true` while running.
    pub fn is_running(&self) -> bool {
        self.next_at_ms.is_some()
    }

    /// Configured period.
    pub fn period_ms(&self) -> u64 {
        self.period_ms
    }

    /// Next scheduled firing, if running.
    pub fn next_at(&self) -> Option<u64> {
        self.next_at_ms
    }

    /// Consumes one due firing and returns its scheduled time.
    ///
    /// The next firing is exactly one period later, so a caller looping on
    /// this method replays every missed firing in order.
    pub fn take_if_due(&mut self, now_ms: u64) -> Option<u64> {
        match self.next_at_ms {
            Some(at) if at <= now_ms => {
                self.next_at_ms = Some(at.saturating_add(self.period_ms));
                Some(at)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for timer semantics.

    use super::*;

    #[test]
    fn deadline_fires_once() {
        let mut deadline = Deadline::default();
        deadline.arm(100, 50);
        assert_eq!(deadline.take_if_due(149), None);
        assert_eq!(deadline.take_if_due(400), Some(150));
        assert_eq!(deadline.take_if_due(500), None);
    }

    #[test]
    fn interval_replays_missed_firings_in_order() {
        let mut interval = Interval::new(1_000);
        interval.start(0);
        let fired: Vec<u64> = std::iter::from_fn(|| interval.take_if_due(3_500)).collect();
        assert_eq!(fired, vec![1_000, 2_000, 3_000]);
        assert_eq!(interval.next_at(), Some(4_000));
    }
}
