use actix::{Message, Recipient};
use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::lobby::{LobbySettings, LobbyStatus};
use super::player::{PlayerColor, PlayerProfile};
use super::session::{EndReason, GameResult, GameView, MoveRecord};

/// Frame delivered to a live client connection.
#[derive(Message, Debug, Clone, PartialEq)]
#[rtype(result = "()")]
pub enum Outbound {
    Text(String),
    Close { reason: Option<String> },
}

/// Handle an entity keeps for a live client connection.
#[derive(Clone)]
pub struct Connection {
    pub id: Uuid,
    recipient: Recipient<Outbound>,
}

impl Connection {
    pub fn new(id: Uuid, recipient: Recipient<Outbound>) -> Self {
        Self { id, recipient }
    }

    /// Serializes and queues an event. Delivery ignores the mailbox capacity,
    /// so a burst of broadcasts reaches the socket in order.
    pub fn send<T: Serialize>(&self, event: &T) {
        match serde_json::to_string(event) {
            Ok(text) => {
                if !self.recipient.connected() {
                    debug!("Connection {} is gone, dropping frame", self.id);
                    return;
                }
                self.recipient.do_send(Outbound::Text(text));
            }
            Err(e) => warn!("Failed to serialize frame for {}: {}", self.id, e),
        }
    }

    pub fn close(&self, reason: impl Into<String>) {
        self.recipient.do_send(Outbound::Close {
            reason: Some(reason.into()),
        });
    }

    /// Sends an error frame and closes the connection.
    pub fn reject(&self, message: impl Into<String>) {
        let message = message.into();
        self.send(&ErrorEvent::new(message.clone()));
        self.close(message);
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection").field("id", &self.id).finish()
    }
}

/// Lobby -> creator/opponent frames.
#[derive(Serialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum LobbyEvent {
    Waiting {
        status: LobbyStatus,
        created_at: DateTime<Utc>,
        settings: LobbySettings,
    },
    OpponentJoined {
        opponent: PlayerProfile,
    },
    MatchReady {
        session_id: String,
        endpoint: String,
        assigned_color: PlayerColor,
        opponent: PlayerProfile,
    },
    LobbyCancelled {
        reason: String,
    },
    Error {
        message: String,
    },
    Pong,
}

/// GameSession -> participant frames.
#[derive(Serialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum SessionEvent {
    Ready {
        state: GameView,
        assigned_color: PlayerColor,
    },
    GameStarted {
        state: GameView,
    },
    OpponentStatus {
        connected: bool,
        opponent_id: String,
    },
    MoveMade {
        #[serde(rename = "move")]
        record: MoveRecord,
        state: GameView,
    },
    GameOver {
        result: GameResult,
        reason: EndReason,
        state: GameView,
    },
    SpectatorJoined {
        state: GameView,
    },
    Sync {
        state: GameView,
    },
    Error {
        message: String,
    },
    Pong,
}

#[derive(Serialize, Debug, Clone)]
#[serde(tag = "type", rename = "error")]
pub struct ErrorEvent {
    pub message: String,
}

impl ErrorEvent {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Client -> server frames on a live connection.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Move {
        from: String,
        to: String,
        #[serde(default)]
        promotion: Option<String>,
    },
    Resign,
    Sync,
    Cancel,
    Ping,
}
