// Wire protocol: JSON messages exchanged over the WebSocket, tagged by `type`.

use openfpl_core::export::ScoutReport;
use serde::{Deserialize, Serialize};

/// Requests sent by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    /// Upload a gameweek CSV, then compute and save its team.
    Upload { csv: String },
    /// Fetch the team for a gameweek; the latest uploaded one when omitted.
    Scout {
        #[serde(default)]
        gameweek: Option<u32>,
    },
    Health,
    Info,
}

/// Replies sent by the server, one per request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerMessage {
    ScoutTeam { report: ScoutReport },
    Health { status: String },
    Info { name: String, version: String },
    Error { message: String },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }

    pub fn healthy() -> Self {
        ServerMessage::Health {
            status: "healthy".into(),
        }
    }
}
