use serde::{Deserialize, Serialize};

/// Position of an edit in the status-changes log.
///
/// `ledger_id` is the epoch: it grows across leadership changes and log
/// rollovers. `offset` grows within a single ledger. The pair is totally
/// ordered, first by ledger then by offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LogSequenceNumber {
    pub ledger_id: i64,
    pub offset: i64,
}

impl LogSequenceNumber {
    /// Sentinel preceding every real sequence number.
    pub const START: LogSequenceNumber = LogSequenceNumber {
        ledger_id: -1,
        offset: -1,
    };

    pub fn new(ledger_id: i64, offset: i64) -> Self {
        Self { ledger_id, offset }
    }

    pub fn after(&self, other: LogSequenceNumber) -> bool {
        *self > other
    }
}

impl std::fmt::Display for LogSequenceNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.ledger_id, self.offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_order() {
        let a = LogSequenceNumber::new(1, 5);
        let b = LogSequenceNumber::new(1, 6);
        let c = LogSequenceNumber::new(2, 0);

        assert!(b.after(a));
        assert!(c.after(b));
        assert!(c.after(a));
        assert!(!a.after(a));
    }

    #[test]
    fn test_start_precedes_everything() {
        assert!(LogSequenceNumber::new(0, 0).after(LogSequenceNumber::START));
        assert!(LogSequenceNumber::new(-1, 0).after(LogSequenceNumber::START));
    }
}
