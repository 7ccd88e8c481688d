use std::collections::HashMap;

use crate::error::SessionError;

/// Per-option answer counts for the currently active poll. Reset on every
/// new poll; `record` only accepts options the poll declared.
#[derive(Default)]
pub struct AnswerTally {
    counts: HashMap<String, u64>,
}

impl AnswerTally {
    pub fn new() -> Self {
        AnswerTally::default()
    }

    pub fn reset(&mut self, options: &[String]) {
        self.counts = options.iter().map(|o| (o.clone(), 0)).collect();
    }

    pub fn record(&mut self, option: &str) -> Result<u64, SessionError> {
        match self.counts.get_mut(option) {
            Some(count) => {
                *count += 1;
                Ok(*count)
            }
            None => Err(SessionError::state(format!(
                "Option \"{option}\" is not part of the active poll"
            ))),
        }
    }

    /// Copy of the counts, safe to hand to the dispatcher without aliasing
    /// live state.
    pub fn snapshot(&self) -> HashMap<String, u64> {
        self.counts.clone()
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(labels: &[&str]) -> Vec<String> {
        labels.iter().map(|l| (*l).to_string()).collect()
    }

    #[test]
    fn record_counts_declared_options() {
        let mut tally = AnswerTally::new();
        tally.reset(&options(&["A", "B"]));
        assert_eq!(tally.record("A").unwrap(), 1);
        assert_eq!(tally.record("A").unwrap(), 2);
        assert_eq!(tally.record("B").unwrap(), 1);
        assert_eq!(tally.total(), 3);
    }

    #[test]
    fn record_rejects_unknown_option() {
        let mut tally = AnswerTally::new();
        tally.reset(&options(&["A", "B"]));
        assert!(matches!(tally.record("C"), Err(SessionError::State(_))));
        assert_eq!(tally.total(), 0);
    }

    #[test]
    fn reset_clears_previous_counts() {
        let mut tally = AnswerTally::new();
        tally.reset(&options(&["A", "B"]));
        tally.record("A").unwrap();
        tally.reset(&options(&["X", "Y"]));
        assert_eq!(tally.total(), 0);
        assert!(matches!(tally.record("A"), Err(SessionError::State(_))));
    }

    #[test]
    fn snapshot_is_detached_from_live_counts() {
        let mut tally = AnswerTally::new();
        tally.reset(&options(&["A"]));
        let before = tally.snapshot();
        tally.record("A").unwrap();
        assert_eq!(before["A"], 0);
        assert_eq!(tally.snapshot()["A"], 1);
    }
}
