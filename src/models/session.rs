use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::messages::Connection;
use super::player::{GameMode, PlayerColor, PlayerProfile};
use crate::error::ServiceError;
use crate::game::clock::ClockState;
use crate::game::utils::{board_side_to_move, parse_position};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Waiting,
    Ready,
    InProgress,
    Finished,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GameResult {
    WhiteWins,
    BlackWins,
    Draw,
}

impl GameResult {
    pub fn win_for(color: PlayerColor) -> Self {
        match color {
            PlayerColor::White => GameResult::WhiteWins,
            PlayerColor::Black => GameResult::BlackWins,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    Checkmate,
    Stalemate,
    InsufficientMaterial,
    Timeout,
    Resignation,
    Abandonment,
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EndReason::Checkmate => "checkmate",
            EndReason::Stalemate => "stalemate",
            EndReason::InsufficientMaterial => "insufficient_material",
            EndReason::Timeout => "timeout",
            EndReason::Resignation => "resignation",
            EndReason::Abandonment => "abandonment",
        };
        f.write_str(name)
    }
}

/// A seat in a game. Pre-registered with `connected = false` until the
/// owning client attaches.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSession {
    pub id: String,
    pub display_name: String,
    pub rating: i32,
    pub is_provisional: bool,
    pub color: PlayerColor,
    pub connected: bool,
    pub last_seen: DateTime<Utc>,
    #[serde(skip)]
    pub connection: Option<Connection>,
}

impl PlayerSession {
    pub fn pre_registered(profile: PlayerProfile, color: PlayerColor, now: DateTime<Utc>) -> Self {
        Self {
            id: profile.id,
            display_name: profile.info.display_name,
            rating: profile.info.rating,
            is_provisional: profile.info.is_provisional,
            color,
            connected: false,
            last_seen: now,
            connection: None,
        }
    }

    pub fn holds(&self, connection_id: Uuid) -> bool {
        self.connection.as_ref().is_some_and(|c| c.id == connection_id)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Players {
    pub white: Option<PlayerSession>,
    pub black: Option<PlayerSession>,
}

impl Players {
    pub fn seat(&self, color: PlayerColor) -> Option<&PlayerSession> {
        match color {
            PlayerColor::White => self.white.as_ref(),
            PlayerColor::Black => self.black.as_ref(),
        }
    }

    pub fn seat_mut(&mut self, color: PlayerColor) -> Option<&mut PlayerSession> {
        match color {
            PlayerColor::White => self.white.as_mut(),
            PlayerColor::Black => self.black.as_mut(),
        }
    }

    pub fn color_of(&self, user_id: &str) -> Option<PlayerColor> {
        self.iter().find(|p| p.id == user_id).map(|p| p.color)
    }

    pub fn color_by_connection(&self, connection_id: Uuid) -> Option<PlayerColor> {
        self.iter().find(|p| p.holds(connection_id)).map(|p| p.color)
    }

    pub fn both_connected(&self) -> bool {
        self.white.as_ref().is_some_and(|p| p.connected)
            && self.black.as_ref().is_some_and(|p| p.connected)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PlayerSession> {
        self.white.iter().chain(self.black.iter())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut PlayerSession> {
        self.white.iter_mut().chain(self.black.iter_mut())
    }
}

/// A watcher of a game. Lives only as long as the session actor.
#[derive(Debug, Clone)]
pub struct Spectator {
    pub id: String,
    pub display_name: String,
    pub connection: Connection,
    pub joined_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MoveRecord {
    pub from: String,
    pub to: String,
    pub uci: String,
    /// Only known while the position is tracked.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub san: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub promotion: Option<String>,
}

/// Persisted fire-at record of the abandonment timer.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PendingAbandonment {
    pub player_id: String,
    pub fire_at: DateTime<Utc>,
}

/// Everything a lobby hands over when it creates a game.
#[derive(Debug, Clone)]
pub struct SessionInit {
    pub session_id: String,
    pub mode: GameMode,
    pub unrated: bool,
    pub starting_position: Option<String>,
    pub opening_name: Option<String>,
    pub allow_spectators: bool,
    pub max_spectators: usize,
    pub white: PlayerProfile,
    pub black: PlayerProfile,
}

/// Persisted state of one match.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub id: String,
    pub mode: GameMode,
    pub unrated: bool,
    pub starting_position: String,
    pub fen: String,
    /// False once a move could not be applied to the tracked board.
    pub position_tracked: bool,
    pub opening_name: Option<String>,
    pub allow_spectators: bool,
    pub max_spectators: usize,
    pub players: Players,
    pub clock: ClockState,
    pub move_history: Vec<MoveRecord>,
    pub status: SessionStatus,
    pub result: Option<GameResult>,
    pub reason: Option<EndReason>,
    pub created_at: DateTime<Utc>,
    pub abandonment: Option<PendingAbandonment>,
}

impl SessionState {
    pub fn new(init: SessionInit, now: DateTime<Utc>) -> Result<Self, ServiceError> {
        let (board, starting_position) = parse_position(init.starting_position.as_deref())?;
        let clock = ClockState::for_mode(init.mode, board_side_to_move(&board));

        Ok(Self {
            id: init.session_id,
            mode: init.mode,
            unrated: init.unrated,
            fen: starting_position.clone(),
            starting_position,
            position_tracked: true,
            opening_name: init.opening_name,
            allow_spectators: init.allow_spectators,
            max_spectators: init.max_spectators,
            players: Players {
                white: Some(PlayerSession::pre_registered(init.white, PlayerColor::White, now)),
                black: Some(PlayerSession::pre_registered(init.black, PlayerColor::Black, now)),
            },
            clock,
            move_history: Vec::new(),
            status: SessionStatus::Waiting,
            result: None,
            reason: None,
            created_at: now,
            abandonment: None,
        })
    }

    /// Drops every live connection, e.g. after the state was reloaded from storage.
    pub fn detach_all(&mut self) {
        for player in self.players.iter_mut() {
            player.connected = false;
            player.connection = None;
        }
    }
}

/// Snapshot of a session as sent to clients.
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct GameView {
    #[serde(flatten)]
    pub state: SessionState,
    pub spectator_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::player::PlayerInfo;

    fn profile(id: &str) -> PlayerProfile {
        PlayerProfile::new(
            id,
            PlayerInfo {
                display_name: id.to_uppercase(),
                rating: 1500,
                is_provisional: false,
            },
        )
    }

    fn init(mode: GameMode, fen: Option<&str>) -> SessionInit {
        SessionInit {
            session_id: "s1".to_string(),
            mode,
            unrated: false,
            starting_position: fen.map(str::to_string),
            opening_name: None,
            allow_spectators: true,
            max_spectators: 2,
            white: profile("w"),
            black: profile("b"),
        }
    }

    #[test]
    fn new_session_pre_registers_both_players_disconnected() {
        let state = SessionState::new(init(GameMode::Rapid, None), Utc::now()).unwrap();
        assert_eq!(state.status, SessionStatus::Waiting);
        let white = state.players.seat(PlayerColor::White).unwrap();
        let black = state.players.seat(PlayerColor::Black).unwrap();
        assert_eq!(white.id, "w");
        assert_eq!(black.id, "b");
        assert!(!white.connected && !black.connected);
        assert_eq!(state.clock.white.remaining_ms, 900_000);
        assert_eq!(state.clock.current_turn, PlayerColor::White);
    }

    #[test]
    fn starting_side_follows_fen() {
        let fen = "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq - 0 1";
        let state = SessionState::new(init(GameMode::Blitz, Some(fen)), Utc::now()).unwrap();
        assert_eq!(state.clock.current_turn, PlayerColor::Black);
        assert_eq!(state.starting_position, fen);
    }

    #[test]
    fn malformed_fen_is_rejected() {
        let err = SessionState::new(init(GameMode::Blitz, Some("not a fen")), Utc::now()).unwrap_err();
        assert!(matches!(err, ServiceError::InvalidRequest(_)));
    }

    #[test]
    fn status_order_is_monotonic() {
        assert!(SessionStatus::Waiting < SessionStatus::Ready);
        assert!(SessionStatus::Ready < SessionStatus::InProgress);
        assert!(SessionStatus::InProgress < SessionStatus::Finished);
    }
}
