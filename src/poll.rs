use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Longest poll a coordinator may run (24 hours). Keeps `end_time`
/// arithmetic inside chrono's representable range.
pub const MAX_DURATION_SECONDS: u64 = 86_400;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PollStatus {
    Active,
    Ended,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Poll {
    pub id: String,
    pub question: String,
    pub options: Vec<String>,
    pub duration_seconds: u64,
    pub created_at: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub created_by: String,
    pub status: PollStatus,
    /// Frozen copy of the tally, present only once the poll has ended.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<HashMap<String, u64>>,
}

impl Poll {
    /// Durations beyond [`MAX_DURATION_SECONDS`] are clamped for the
    /// `end_time` computation; callers validate the bound before getting here.
    pub fn new(question: String, options: Vec<String>, duration_seconds: u64, created_by: String) -> Self {
        let created_at = Utc::now();
        let clamped = duration_seconds.min(MAX_DURATION_SECONDS) as i64;
        Poll {
            id: Uuid::new_v4().to_string(),
            question,
            options,
            duration_seconds,
            created_at,
            end_time: created_at + Duration::seconds(clamped),
            created_by,
            status: PollStatus::Active,
            results: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extreme_durations_never_panic_or_wrap() {
        for duration in [10_000_000_000_000_000, u64::MAX] {
            let poll = Poll::new(
                "Q".to_string(),
                vec!["A".to_string(), "B".to_string()],
                duration,
                "Coordinator".to_string(),
            );
            assert!(poll.end_time >= poll.created_at);
        }
    }
}
