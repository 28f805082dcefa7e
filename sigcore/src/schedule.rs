//! Supervision windows and emergency-call classification.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Length assumed for a window whose end the backend did not send.
pub const DEFAULT_WINDOW_MINUTES: i64 = 60;

/// A pre-declared supervision time window, `[start, end)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupervisionWindow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supervision_id: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl SupervisionWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            supervision_id: None,
            start,
            end,
        }
    }

    pub fn starting_at(start: DateTime<Utc>) -> Self {
        Self::new(start, start + Duration::minutes(DEFAULT_WINDOW_MINUTES))
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at < self.end
    }
}

/// A call at `at` is an emergency when it falls outside every window.
///
/// With no declared windows every call is an emergency.
pub fn is_emergency(at: DateTime<Utc>, windows: &[SupervisionWindow]) -> bool {
    !windows.iter().any(|w| w.contains(at))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 4, h, m, 0).unwrap()
    }

    #[test]
    fn test_inside_any_window_is_not_emergency() {
        let windows = vec![
            SupervisionWindow::new(at(9, 0), at(10, 0)),
            SupervisionWindow::new(at(14, 0), at(15, 30)),
        ];
        assert!(!is_emergency(at(9, 0), &windows));
        assert!(!is_emergency(at(15, 29), &windows));
    }

    #[test]
    fn test_outside_all_windows_is_emergency() {
        let windows = vec![SupervisionWindow::new(at(9, 0), at(10, 0))];
        assert!(is_emergency(at(10, 0), &windows), "end is exclusive");
        assert!(is_emergency(at(8, 59), &windows));
        assert!(is_emergency(at(12, 0), &[]));
    }

    #[test]
    fn test_starting_at_uses_default_length() {
        let w = SupervisionWindow::starting_at(at(9, 0));
        assert_eq!(w.end, at(10, 0));
    }
}
