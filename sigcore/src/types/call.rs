use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

const CALL_ID_PREFIX: &str = "call-";
const CALL_ID_SUFFIX_LEN: usize = 7;
const CALL_ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

// Last millisecond handed out by `CallId::generate`, so two ids minted in the
// same millisecond still differ in their time component.
static LAST_CALL_MILLIS: AtomicI64 = AtomicI64::new(0);

/// Globally unique call identifier, minted by the caller.
///
/// Format: `call-<millis>-<7 base36 chars>`. Ids received from the server are
/// accepted verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(String);

impl CallId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        let mut rng = rand::rng();
        let suffix: String = (0..CALL_ID_SUFFIX_LEN)
            .map(|_| CALL_ID_ALPHABET[rng.random_range(0..CALL_ID_ALPHABET.len())] as char)
            .collect();
        Self(format!("{CALL_ID_PREFIX}{}-{suffix}", monotonic_millis()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CallId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

fn monotonic_millis() -> i64 {
    let now = Utc::now().timestamp_millis();
    match LAST_CALL_MILLIS.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |prev| {
        Some(now.max(prev + 1))
    }) {
        Ok(prev) | Err(prev) => now.max(prev + 1),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CallDirection {
    Outgoing,
    Incoming,
}

/// A party of a call as described inside `callData`.
///
/// The backend uses both `id` and `_id` for the same field and writes `_id`.
/// Any other profile fields are carried through untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    #[serde(rename = "_id", alias = "id")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Participant {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            extra: Map::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

/// The `callData` object carried by call setup frames.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CallData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caller: Option<Participant>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student: Option<Participant>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<Participant>,
}

/// Why a call session left the live phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EndCallReason {
    /// We hung up.
    LocalHangUp,
    /// The other party sent `call_ended`.
    RemoteHangUp,
    /// We declined (or cancelled before connect).
    Declined,
    /// The other party sent `call_reject`.
    RemoteRejected,
    /// Another call was already in progress.
    Busy,
    /// Nobody accepted within the connect timeout.
    Timeout,
    /// The signaling connection dropped before the call connected.
    TransportLost,
}

impl EndCallReason {
    pub const fn wire_reason(&self) -> &'static str {
        match self {
            Self::LocalHangUp | Self::RemoteHangUp => "ended",
            Self::Declined | Self::RemoteRejected => "declined",
            Self::Busy => "busy",
            Self::Timeout => "timeout",
            Self::TransportLost => "transport_lost",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_have_expected_shape() {
        let id = CallId::generate();
        let parts: Vec<&str> = id.as_str().splitn(3, '-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "call");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), CALL_ID_SUFFIX_LEN);
        assert!(parts[2].bytes().all(|b| CALL_ID_ALPHABET.contains(&b)));
    }

    #[test]
    fn test_generated_ids_are_unique_within_a_burst() {
        let ids: std::collections::HashSet<CallId> = (0..500).map(|_| CallId::generate()).collect();
        assert_eq!(ids.len(), 500);
    }

    #[test]
    fn test_participant_accepts_underscore_id() {
        let p: Participant = serde_json::from_str(r#"{"_id":"u42","name":"Alice"}"#).unwrap();
        assert_eq!(p, Participant::new("u42", "Alice"));
    }

    #[test]
    fn test_participant_keeps_unknown_fields_and_writes_underscore_id() {
        let p: Participant =
            serde_json::from_str(r#"{"id":"u42","name":"Alice","avatar":"a.png","year":3}"#)
                .unwrap();
        assert_eq!(p.extra["avatar"], "a.png");

        let out = serde_json::to_value(&p).unwrap();
        assert_eq!(
            out,
            serde_json::json!({"_id":"u42","name":"Alice","avatar":"a.png","year":3})
        );
    }
}
