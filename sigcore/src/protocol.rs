//! Signaling wire protocol.
//!
//! Every frame is a UTF-8 JSON object with a `type` discriminant and a
//! sender-assigned ISO-8601 `timestamp`. Payload fields are camelCase on the
//! wire. Frames with an unrecognized `type` decode into [`UnknownMessage`]
//! instead of failing; frames that are not valid JSON objects, or whose
//! payload is missing a required field, are reported as [`DecodeError`] so the
//! caller can drop and count them.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

use crate::types::call::{CallData, CallId};

/// Message discriminants understood by this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Announce online/offline on connect.
    PresenceUpdate,
    /// Start a call.
    CallInitiate,
    /// Notify the callee of a new call.
    IncomingCall,
    /// Callee accepted.
    CallAccepted,
    /// Explicit join signal after accept.
    CallJoin,
    /// Informational join beacon.
    UserJoined,
    /// Local hang-up intent.
    CallEnd,
    /// Remote party ended the call.
    CallEnded,
    /// Decline an incoming call.
    CallReject,
    /// Non-call chat message.
    ChatMessage,
    /// Server-reported problem.
    Error,
}

impl MessageType {
    pub const ALL: [MessageType; 11] = [
        Self::PresenceUpdate,
        Self::CallInitiate,
        Self::IncomingCall,
        Self::CallAccepted,
        Self::CallJoin,
        Self::UserJoined,
        Self::CallEnd,
        Self::CallEnded,
        Self::CallReject,
        Self::ChatMessage,
        Self::Error,
    ];

    /// The `type` string used on the wire.
    pub const fn tag_name(&self) -> &'static str {
        match self {
            Self::PresenceUpdate => "presence_update",
            Self::CallInitiate => "call_initiate",
            Self::IncomingCall => "incoming_call",
            Self::CallAccepted => "call_accepted",
            Self::CallJoin => "call_join",
            Self::UserJoined => "user_joined",
            Self::CallEnd => "call_end",
            Self::CallEnded => "call_ended",
            Self::CallReject => "call_reject",
            Self::ChatMessage => "chat_message",
            Self::Error => "error",
        }
    }

    /// Parse from the wire `type` string. Matching is exact.
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.tag_name() == tag)
    }

    /// Whether frames of this type belong to the call lifecycle.
    pub const fn is_call_related(&self) -> bool {
        matches!(
            self,
            Self::CallInitiate
                | Self::IncomingCall
                | Self::CallAccepted
                | Self::CallJoin
                | Self::UserJoined
                | Self::CallEnd
                | Self::CallEnded
                | Self::CallReject
        )
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag_name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
    #[serde(other)]
    Unknown,
}

/// Typed payload of a frame, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum Payload {
    PresenceUpdate {
        user_id: String,
        status: PresenceStatus,
    },
    CallInitiate {
        call_id: CallId,
        #[serde(alias = "counterpartId")]
        student_id: String,
        supervision_id: String,
        call_data: CallData,
    },
    IncomingCall {
        call_id: CallId,
        supervision_id: String,
        call_data: CallData,
    },
    CallAccepted {
        call_id: CallId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        supervision_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        call_data: Option<CallData>,
    },
    CallJoin {
        call_id: CallId,
    },
    UserJoined {
        recipient_id: String,
        call_id: CallId,
    },
    CallEnd {
        call_id: CallId,
    },
    CallEnded {
        call_id: CallId,
    },
    CallReject {
        call_id: CallId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    ChatMessage {
        recipient_id: String,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        chat_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender_id: Option<String>,
    },
    Error {
        message: String,
    },
}

impl Payload {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::PresenceUpdate { .. } => MessageType::PresenceUpdate,
            Self::CallInitiate { .. } => MessageType::CallInitiate,
            Self::IncomingCall { .. } => MessageType::IncomingCall,
            Self::CallAccepted { .. } => MessageType::CallAccepted,
            Self::CallJoin { .. } => MessageType::CallJoin,
            Self::UserJoined { .. } => MessageType::UserJoined,
            Self::CallEnd { .. } => MessageType::CallEnd,
            Self::CallEnded { .. } => MessageType::CallEnded,
            Self::CallReject { .. } => MessageType::CallReject,
            Self::ChatMessage { .. } => MessageType::ChatMessage,
            Self::Error { .. } => MessageType::Error,
        }
    }

    /// The call this frame refers to, if it is call-related.
    pub fn call_id(&self) -> Option<&CallId> {
        match self {
            Self::CallInitiate { call_id, .. }
            | Self::IncomingCall { call_id, .. }
            | Self::CallAccepted { call_id, .. }
            | Self::CallJoin { call_id }
            | Self::UserJoined { call_id, .. }
            | Self::CallEnd { call_id }
            | Self::CallEnded { call_id }
            | Self::CallReject { call_id, .. } => Some(call_id),
            Self::PresenceUpdate { .. } | Self::ChatMessage { .. } | Self::Error { .. } => None,
        }
    }

    pub fn chat_id(&self) -> Option<&str> {
        match self {
            Self::ChatMessage { chat_id, .. } => chat_id.as_deref(),
            _ => None,
        }
    }

    /// Checks required fields that serde cannot express on its own.
    fn validate(&self) -> Result<(), &'static str> {
        match self {
            Self::IncomingCall { call_data, .. } if call_data.caller.is_none() => {
                Err("callData.caller")
            }
            _ => Ok(()),
        }
    }
}

/// An immutable frame: payload plus the sender's timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub payload: Payload,
    pub timestamp: Option<String>,
}

impl Message {
    pub fn new(payload: Payload) -> Self {
        Self {
            payload,
            timestamp: None,
        }
    }

    pub fn message_type(&self) -> MessageType {
        self.payload.message_type()
    }

    /// The sender timestamp, if present and valid RFC 3339.
    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        self.timestamp
            .as_deref()
            .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// Serializes to a text frame, stamping `timestamp` with `at`.
    ///
    /// Any timestamp already on the message is replaced: outbound frames always
    /// carry the send time.
    pub fn encode(&self, at: DateTime<Utc>) -> Result<String, EncodeError> {
        let mut value = serde_json::to_value(&self.payload)?;
        let Value::Object(map) = &mut value else {
            return Err(EncodeError::NotAnObject);
        };
        map.insert(
            "timestamp".to_string(),
            Value::String(at.to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        Ok(serde_json::to_string(&value)?)
    }
}

impl From<Payload> for Message {
    fn from(payload: Payload) -> Self {
        Self::new(payload)
    }
}

/// A frame whose `type` this client does not recognize.
#[derive(Debug, Clone, PartialEq)]
pub struct UnknownMessage {
    pub message_type: String,
    pub raw: Value,
}

/// Result of decoding one inbound text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    Message(Message),
    Unknown(UnknownMessage),
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame is not a JSON object")]
    NotAnObject,
    #[error("frame has no string `type` field")]
    MissingType,
    #[error("invalid `{message_type}` payload: {source}")]
    InvalidPayload {
        message_type: MessageType,
        source: serde_json::Error,
    },
    #[error("`{message_type}` frame is missing required field `{field}`")]
    MissingField {
        message_type: MessageType,
        field: &'static str,
    },
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("serialization failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("payload did not serialize to a JSON object")]
    NotAnObject,
}

/// Decodes one inbound text frame.
pub fn decode_frame(text: &str) -> Result<InboundFrame, DecodeError> {
    let value: Value = serde_json::from_str(text)?;
    let Value::Object(mut map) = value else {
        return Err(DecodeError::NotAnObject);
    };

    let type_tag = match map.get("type") {
        Some(Value::String(t)) => t.clone(),
        _ => return Err(DecodeError::MissingType),
    };

    let Some(message_type) = MessageType::from_tag(&type_tag) else {
        return Ok(InboundFrame::Unknown(UnknownMessage {
            message_type: type_tag,
            raw: Value::Object(map),
        }));
    };

    let timestamp = match map.remove("timestamp") {
        Some(Value::String(ts)) => Some(ts),
        Some(Value::Null) | None => None,
        Some(other) => Some(other.to_string()),
    };

    let payload: Payload = serde_json::from_value(Value::Object(map)).map_err(|source| {
        DecodeError::InvalidPayload {
            message_type,
            source,
        }
    })?;
    payload
        .validate()
        .map_err(|field| DecodeError::MissingField {
            message_type,
            field,
        })?;

    Ok(InboundFrame::Message(Message { payload, timestamp }))
}
