//! Messages the session layer emits over the persistent connection.
//!
//! The transport below (framing, socket management) is someone else's
//! problem; this module only defines the message-level wire shapes.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A message produced by the session controller.
///
/// Every streamed response is a correlated cycle: one
/// `gm_response_start`, zero or more `gm_response_chunk`, one
/// `gm_response_end`, all sharing a `message_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    GmResponseStart {
        message_id: Uuid,
    },
    GmResponseChunk {
        message_id: Uuid,
        text: String,
    },
    GmResponseEnd {
        message_id: Uuid,
    },
    ThemeChange {
        mood: String,
        genre: String,
        region: String,
        background_url: Option<String>,
    },
    ToolStatus {
        state: ToolState,
    },
    Error {
        code: ErrorCode,
        message: String,
        retryable: bool,
    },
}

/// Whether the session is currently working through its queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolState {
    Idle,
    Running,
}

/// Error categories surfaced to the client. Technical detail stays in
/// the logs; only a sanitized message crosses the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    NotFound,
    InvalidToken,
    Corrupted,
    Environment,
    RateLimited,
    EngineTimeout,
    EngineFailure,
    ToolFailure,
    CompactionInProgress,
    NotEnoughEntries,
    StorageFailure,
    Internal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_tags() {
        let id = Uuid::new_v4();
        let start = serde_json::to_value(ServerMessage::GmResponseStart { message_id: id }).unwrap();
        assert_eq!(start["type"], "gm_response_start");
        assert_eq!(start["message_id"], id.to_string());

        let chunk = serde_json::to_value(ServerMessage::GmResponseChunk {
            message_id: id,
            text: "The door".to_string(),
        })
        .unwrap();
        assert_eq!(chunk["type"], "gm_response_chunk");
        assert_eq!(chunk["text"], "The door");

        let end = serde_json::to_value(ServerMessage::GmResponseEnd { message_id: id }).unwrap();
        assert_eq!(end["type"], "gm_response_end");
    }

    #[test]
    fn test_tool_status_and_error_shapes() {
        let idle = serde_json::to_value(ServerMessage::ToolStatus {
            state: ToolState::Idle,
        })
        .unwrap();
        assert_eq!(idle["type"], "tool_status");
        assert_eq!(idle["state"], "idle");

        let error = serde_json::to_value(ServerMessage::Error {
            code: ErrorCode::RateLimited,
            message: "The Game Master is overwhelmed, try again shortly.".to_string(),
            retryable: true,
        })
        .unwrap();
        assert_eq!(error["code"], "RATE_LIMITED");
        assert_eq!(error["retryable"], true);
    }

    #[test]
    fn test_theme_change_shape() {
        let msg = serde_json::to_value(ServerMessage::ThemeChange {
            mood: "tense".to_string(),
            genre: "fantasy".to_string(),
            region: "moors".to_string(),
            background_url: None,
        })
        .unwrap();
        assert_eq!(msg["type"], "theme_change");
        assert_eq!(msg["mood"], "tense");
    }
}
