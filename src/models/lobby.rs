use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::player::{GameMode, PlayerColor, PlayerInfo, PlayerProfile};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DesiredColor {
    White,
    Black,
    #[default]
    Random,
}

/// Settings chosen by the creator of a lobby.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct LobbySettings {
    pub desired_color: DesiredColor,
    pub mode: GameMode,
    pub is_private: bool,
    pub private_code: Option<String>,
    pub allow_spectators: bool,
    pub max_spectators: usize,
    pub opening_id: Option<String>,
    pub opening_name: Option<String>,
    pub opening_start_fen: Option<String>,
}

impl Default for LobbySettings {
    fn default() -> Self {
        Self {
            desired_color: DesiredColor::Random,
            mode: GameMode::Blitz,
            is_private: false,
            private_code: None,
            allow_spectators: true,
            max_spectators: 10,
            opening_id: None,
            opening_name: None,
            opening_start_fen: None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LobbyStatus {
    Waiting,
    Matched,
    Cancelled,
}

impl LobbyStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, LobbyStatus::Waiting)
    }
}

/// Persisted state of one matchmaking attempt.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct LobbyState {
    pub id: String,
    pub creator_id: String,
    pub creator: PlayerInfo,
    pub settings: LobbySettings,
    pub status: LobbyStatus,
    pub created_at: DateTime<Utc>,
    pub opponent: Option<PlayerProfile>,
    pub session_id: Option<String>,
    pub session_endpoint: Option<String>,
    /// Fixed once at match time.
    pub creator_color: Option<PlayerColor>,
    /// Fire-at instant of the durable wait-timeout; `None` once disarmed.
    pub wait_deadline: Option<DateTime<Utc>>,
    pub cancel_reason: Option<String>,
}

impl LobbyState {
    pub fn new(
        id: String,
        creator_id: String,
        creator: PlayerInfo,
        settings: LobbySettings,
        created_at: DateTime<Utc>,
        wait_deadline: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            creator_id,
            creator,
            settings,
            status: LobbyStatus::Waiting,
            created_at,
            opponent: None,
            session_id: None,
            session_endpoint: None,
            creator_color: None,
            wait_deadline: Some(wait_deadline),
            cancel_reason: None,
        }
    }

    pub fn creator_profile(&self) -> PlayerProfile {
        PlayerProfile::new(self.creator_id.clone(), self.creator.clone())
    }

    pub fn is_creator(&self, user_id: &str) -> bool {
        self.creator_id == user_id
    }

    pub fn is_opponent(&self, user_id: &str) -> bool {
        self.opponent.as_ref().is_some_and(|o| o.id == user_id)
    }

    pub fn summary(&self) -> LobbySummary {
        LobbySummary {
            id: self.id.clone(),
            creator: self.creator_profile(),
            settings: SettingsSummary::from(&self.settings),
            status: self.status,
            spectator_count: 0,
            created_at: self.created_at,
        }
    }
}

/// Settings as exposed to other users; never carries the private code.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SettingsSummary {
    pub mode: GameMode,
    pub desired_color: DesiredColor,
    pub is_private: bool,
    pub allow_spectators: bool,
    pub max_spectators: usize,
    pub opening_name: Option<String>,
}

impl From<&LobbySettings> for SettingsSummary {
    fn from(settings: &LobbySettings) -> Self {
        Self {
            mode: settings.mode,
            desired_color: settings.desired_color,
            is_private: settings.is_private,
            allow_spectators: settings.allow_spectators,
            max_spectators: settings.max_spectators,
            opening_name: settings.opening_name.clone(),
        }
    }
}

/// Directory projection of a lobby.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LobbySummary {
    pub id: String,
    pub creator: PlayerProfile,
    pub settings: SettingsSummary,
    pub status: LobbyStatus,
    /// Spectators attach to game sessions, never to lobbies, so a listed
    /// lobby always reports 0.
    pub spectator_count: usize,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LobbyCreated {
    pub lobby_id: String,
    pub connection_endpoint: String,
}

/// What a successful join hands back to the joiner.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JoinAccepted {
    pub session_id: String,
    pub session_endpoint: String,
    pub assigned_color: PlayerColor,
    pub opponent: PlayerProfile,
}
