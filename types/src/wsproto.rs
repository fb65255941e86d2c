// Copyright (c) 2022, Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

/// A command frame sent by a WebSocket client.
///
/// The server-to-client direction carries plain JSON bodies (an event batch
/// array or a receipt object) and needs no envelope of its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientCommand {
    /// Start listening on a topic; delivery begins once this connection
    /// becomes the topic's active listener.
    Listen { topic: String },
    /// Subscribe to the implicit replies topic carrying receipts.
    ListenReplies,
    /// Acknowledge the in-flight batch on a topic.
    Ack {
        #[serde(default)]
        topic: String,
    },
    /// Reject the in-flight batch on a topic.
    Error {
        #[serde(default)]
        topic: String,
        #[serde(default)]
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_client_frames() {
        assert_eq!(
            serde_json::from_str::<ClientCommand>(r#"{"type": "listen", "topic": "tokens"}"#)
                .unwrap(),
            ClientCommand::Listen {
                topic: "tokens".into()
            }
        );
        assert_eq!(
            serde_json::from_str::<ClientCommand>(r#"{"type": "listenreplies"}"#).unwrap(),
            ClientCommand::ListenReplies
        );
        assert_eq!(
            serde_json::from_str::<ClientCommand>(r#"{"type": "ack", "topic": "tokens"}"#)
                .unwrap(),
            ClientCommand::Ack {
                topic: "tokens".into()
            }
        );
        let error = serde_json::from_str::<ClientCommand>(
            r#"{"type": "error", "topic": "tokens", "message": "bad batch"}"#,
        )
        .unwrap();
        assert_eq!(
            error,
            ClientCommand::Error {
                topic: "tokens".into(),
                message: "bad batch".into()
            }
        );
    }

    #[test]
    fn unknown_type_is_rejected() {
        assert!(serde_json::from_str::<ClientCommand>(r#"{"type": "subscribe"}"#).is_err());
    }
}
