//! Structured messages carried inside frames (spec §3, §4.2).
//!
//! Wire messages are a plain externally-tagged `serde` enum encoded with
//! `bincode`: the derived encoding prefixes each variant with a 4-byte
//! discriminant, which gives unambiguous decoding without needing to try
//! each concrete type in turn (spec §9's open question).

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlType {
    Join,
    Leave,
    ListRooms,
}

/// A request from client to server. Created per call, consumed once,
/// never stored (spec §3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlMessage {
    pub kind: ControlType,
    pub user_id: String,
    /// Empty string is "unset" — resolves to the main channel.
    pub room_id: String,
    /// 0 is "unset"; the correlator fills this in before sending.
    pub request_id: u32,
}

impl ControlMessage {
    pub fn join(user_id: impl Into<String>, room_id: impl Into<String>) -> Self {
        Self { kind: ControlType::Join, user_id: user_id.into(), room_id: room_id.into(), request_id: 0 }
    }

    pub fn leave(user_id: impl Into<String>) -> Self {
        Self { kind: ControlType::Leave, user_id: user_id.into(), room_id: String::new(), request_id: 0 }
    }

    pub fn list_rooms(user_id: impl Into<String>) -> Self {
        Self { kind: ControlType::ListRooms, user_id: user_id.into(), room_id: String::new(), request_id: 0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Success,
    Error,
}

/// A reply from server to client. `request_id = 0` marks an unsolicited
/// message (welcome banner, async notification) that is never matched
/// against a correlator waiter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerResponse {
    pub status: Status,
    pub message: String,
    pub request_id: u32,
}

impl ServerResponse {
    pub fn success(message: impl Into<String>, request_id: u32) -> Self {
        Self { status: Status::Success, message: message.into(), request_id }
    }

    pub fn error(message: impl Into<String>, request_id: u32) -> Self {
        Self { status: Status::Error, message: message.into(), request_id }
    }

    pub fn is_unsolicited(&self) -> bool {
        self.request_id == 0
    }
}

/// One codec-opaque audio datagram. `sequence_number` is reserved (always
/// 0 today); `timestamp` is source-provided and used for debug ordering
/// only, never enforced (spec §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioFrame {
    pub user_id: String,
    pub audio_payload: Vec<u8>,
    pub timestamp: i64,
    pub sequence_number: u32,
}

/// The discriminated union carried inside every `Frame` payload (spec §4.2).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WireMessage {
    Control(ControlMessage),
    Response(ServerResponse),
    Audio(AudioFrame),
}

impl WireMessage {
    pub fn encode(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(CoreError::Decode)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(CoreError::Decode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn control_message_round_trips() {
        let msg = WireMessage::Control(ControlMessage { kind: ControlType::Join, user_id: "alice".into(), room_id: "r1".into(), request_id: 11 });
        let bytes = msg.encode().unwrap();
        assert_eq!(WireMessage::decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn server_response_round_trips() {
        let msg = WireMessage::Response(ServerResponse::success("welcome", 0));
        let bytes = msg.encode().unwrap();
        assert_eq!(WireMessage::decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn audio_frame_round_trips() {
        let msg = WireMessage::Audio(AudioFrame {
            user_id: "bob".into(),
            audio_payload: vec![0xDE, 0xAD, 0xBE, 0xEF],
            timestamp: 123_456,
            sequence_number: 0,
        });
        let bytes = msg.encode().unwrap();
        assert_eq!(WireMessage::decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn decode_of_garbage_is_an_error() {
        let bytes = [0xFF, 0xFF, 0xFF, 0xFF, 0x01];
        assert!(WireMessage::decode(&bytes).is_err());
    }
}
