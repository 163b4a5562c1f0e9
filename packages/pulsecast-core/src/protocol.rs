//! Wire protocol for the Pulsecast control channel.
//!
//! One request/response per TCP connection, UTF-8 JSON in both directions.
//! There is no length framing: the writer sends its single message and shuts
//! down its write half; the reader accumulates bytes until EOF (or the size
//! cap) and parses exactly one message.

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, ProtocolResult};

/// Default TCP port nodes listen on.
pub const DEFAULT_PORT: u16 = 9915;

/// Upper bound on a single protocol message.
///
/// Responses are small by construction; anything larger is a protocol
/// violation, not something to buffer through.
pub const MAX_MESSAGE_BYTES: usize = 64 * 1024;

fn default_volume() -> u8 {
    100
}

fn default_playcount() -> u32 {
    1
}

/// A command sent from the controller to a node.
///
/// Field names and the `command` tag are fixed wire vocabulary; missing
/// `PLAY` parameters fall back to the same defaults a node would assume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command")]
pub enum Request {
    #[serde(rename = "PLAY")]
    Play {
        #[serde(default)]
        filename: String,
        #[serde(default = "default_volume")]
        volume: u8,
        #[serde(default = "default_playcount")]
        playcount: u32,
    },
    #[serde(rename = "STOP")]
    Stop,
    #[serde(rename = "PING")]
    Ping,
}

impl Request {
    /// Short label for status displays (the registry's last-request column).
    pub fn label(&self) -> &'static str {
        match self {
            Self::Play { .. } => "PLAY",
            Self::Stop => "STOP",
            Self::Ping => "PING",
        }
    }

    /// Serializes the request for the wire.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parses a single request from an accumulated payload.
    pub fn decode(payload: &[u8]) -> ProtocolResult<Self> {
        if payload.len() > MAX_MESSAGE_BYTES {
            return Err(ProtocolError::Oversized(MAX_MESSAGE_BYTES));
        }
        Ok(serde_json::from_slice(payload)?)
    }
}

/// Outcome tag of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "ERROR")]
    Error,
}

/// A node's answer to a single request.
///
/// Context-dependent fields are omitted from the JSON when absent so that
/// responses stay well under the read buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_playing: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
}

impl Response {
    /// An `OK` response with a human-readable message.
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            status: Status::Ok,
            message: Some(message.into()),
            is_playing: None,
            current_file: None,
            hostname: None,
        }
    }

    /// An `ERROR` response with a human-readable message.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: Status::Error,
            message: Some(message.into()),
            is_playing: None,
            current_file: None,
            hostname: None,
        }
    }

    /// A `PING` status report; carries no message.
    pub fn ping_status(is_playing: bool, current_file: Option<String>, hostname: String) -> Self {
        Self {
            status: Status::Ok,
            message: None,
            is_playing: Some(is_playing),
            current_file,
            hostname: Some(hostname),
        }
    }

    /// Sets the playing flag.
    pub fn with_playing(mut self, is_playing: bool) -> Self {
        self.is_playing = Some(is_playing);
        self
    }

    /// Sets the currently playing file.
    pub fn with_file(mut self, current_file: Option<String>) -> Self {
        self.current_file = current_file;
        self
    }

    /// Serializes the response for the wire.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parses a single response from an accumulated payload.
    pub fn decode(payload: &[u8]) -> ProtocolResult<Self> {
        if payload.len() > MAX_MESSAGE_BYTES {
            return Err(ProtocolError::Oversized(MAX_MESSAGE_BYTES));
        }
        Ok(serde_json::from_slice(payload)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_play_request_wire_form() {
        let payload =
            br#"{"command": "PLAY", "filename": "heartbeat.mp3", "volume": 75, "playcount": 3}"#;
        let request = Request::decode(payload).unwrap();
        assert_eq!(
            request,
            Request::Play {
                filename: "heartbeat.mp3".into(),
                volume: 75,
                playcount: 3,
            }
        );
        assert_eq!(request.label(), "PLAY");
    }

    #[test]
    fn play_parameters_default_when_missing() {
        let request = Request::decode(br#"{"command": "PLAY"}"#).unwrap();
        assert_eq!(
            request,
            Request::Play {
                filename: String::new(),
                volume: 100,
                playcount: 1,
            }
        );
    }

    #[test]
    fn decodes_bare_commands() {
        assert_eq!(Request::decode(br#"{"command": "STOP"}"#).unwrap(), Request::Stop);
        assert_eq!(Request::decode(br#"{"command": "PING"}"#).unwrap(), Request::Ping);
    }

    #[test]
    fn rejects_unknown_command() {
        assert!(Request::decode(br#"{"command": "REWIND"}"#).is_err());
    }

    #[test]
    fn rejects_invalid_json() {
        assert!(Request::decode(b"not json at all").is_err());
    }

    #[test]
    fn response_omits_absent_fields() {
        let encoded = Response::ok("Playback stopped")
            .with_playing(false)
            .encode()
            .unwrap();
        let text = String::from_utf8(encoded).unwrap();
        assert!(text.contains(r#""status":"OK""#));
        assert!(text.contains(r#""is_playing":false"#));
        assert!(!text.contains("current_file"));
        assert!(!text.contains("hostname"));
    }

    #[test]
    fn decodes_ping_response_wire_form() {
        let payload = br#"{"status": "OK", "is_playing": true, "current_file": "a.mp3", "hostname": "pi-kitchen"}"#;
        let response = Response::decode(payload).unwrap();
        assert_eq!(response.status, Status::Ok);
        assert_eq!(response.is_playing, Some(true));
        assert_eq!(response.current_file.as_deref(), Some("a.mp3"));
        assert_eq!(response.hostname.as_deref(), Some("pi-kitchen"));
        assert_eq!(response.message, None);
    }

    #[test]
    fn oversized_payload_is_a_protocol_violation() {
        let payload = vec![b'x'; MAX_MESSAGE_BYTES + 1];
        assert!(Request::decode(&payload).is_err());
        assert!(Response::decode(&payload).is_err());
    }
}
