use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::signal::SignalSample;

/// Messages a managed process sends to the engine, one JSON document per line.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "msg", rename_all = "snake_case")]
pub enum ProcessMessage {
    Hello {
        pid: u32,
        process_name: String,
        command_line: String,
    },
    Sample(SignalSample),
    CaptureReply {
        request_id: Uuid,
        #[serde(default)]
        payload_b64: Option<String>,
        #[serde(default)]
        error: Option<String>,
    },
}

/// Messages the engine sends to a managed process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "msg", rename_all = "snake_case")]
pub enum EngineMessage {
    HelloAck { session_token: Uuid },
    CaptureRequest { request_id: Uuid, kind: CaptureKind },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(tag = "capture", rename_all = "snake_case")]
pub enum CaptureKind {
    Dump,
    Trace { duration_ms: u64 },
}

impl CaptureKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Dump => "dump",
            Self::Trace { .. } => "trace",
        }
    }
}

pub fn encode_line<T: Serialize>(msg: &T) -> Result<String, serde_json::Error> {
    let mut line = serde_json::to_string(msg)?;
    line.push('\n');
    Ok(line)
}

pub fn decode_line<'a, T: Deserialize<'a>>(line: &'a str) -> Result<T, serde_json::Error> {
    serde_json::from_str(line.trim_end())
}

pub fn encode_payload(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

pub fn decode_payload(b64: &str) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD.decode(b64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hello_line_round_trip() {
        let msg = ProcessMessage::Hello {
            pid: 7,
            process_name: "worker".into(),
            command_line: "worker --serve".into(),
        };
        let line = encode_line(&msg).unwrap();
        assert!(line.ends_with('\n'));
        let back: ProcessMessage = decode_line(&line).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn unknown_message_tag_is_an_error() {
        let err = decode_line::<ProcessMessage>(r#"{"msg":"teleport","pid":1}"#);
        assert!(err.is_err());
    }

    #[test]
    fn capture_reply_allows_missing_payload() {
        let line = format!(
            r#"{{"msg":"capture_reply","request_id":"{}","error":"denied"}}"#,
            Uuid::new_v4()
        );
        let reply: ProcessMessage = decode_line(&line).unwrap();
        match reply {
            ProcessMessage::CaptureReply { payload_b64, error, .. } => {
                assert!(payload_b64.is_none());
                assert_eq!(error.as_deref(), Some("denied"));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn payload_encoding_round_trip() {
        let bytes = vec![0u8, 1, 254, 255];
        assert_eq!(decode_payload(&encode_payload(&bytes)).unwrap(), bytes);
    }
}
