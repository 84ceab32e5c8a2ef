use serde::{Deserialize, Serialize};
use std::fmt;

/// Side of the board a player sits on.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PlayerColor {
    White,
    Black,
}

impl PlayerColor {
    pub fn opposite(self) -> Self {
        match self {
            PlayerColor::White => PlayerColor::Black,
            PlayerColor::Black => PlayerColor::White,
        }
    }
}

impl fmt::Display for PlayerColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlayerColor::White => write!(f, "white"),
            PlayerColor::Black => write!(f, "black"),
        }
    }
}

/// Time control family. Unrecognised names fall back to blitz.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(from = "String", into = "String")]
pub enum GameMode {
    Bullet,
    #[default]
    Blitz,
    Rapid,
}

impl GameMode {
    pub fn as_str(self) -> &'static str {
        match self {
            GameMode::Bullet => "bullet",
            GameMode::Blitz => "blitz",
            GameMode::Rapid => "rapid",
        }
    }
}

impl From<String> for GameMode {
    fn from(value: String) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "bullet" => GameMode::Bullet,
            "rapid" => GameMode::Rapid,
            _ => GameMode::Blitz,
        }
    }
}

impl From<GameMode> for String {
    fn from(mode: GameMode) -> Self {
        mode.as_str().to_string()
    }
}

/// Public profile of a player as supplied by the profile store.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlayerInfo {
    pub display_name: String,
    pub rating: i32,
    #[serde(default)]
    pub is_provisional: bool,
}

/// A player identity together with their profile.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlayerProfile {
    pub id: String,
    #[serde(flatten)]
    pub info: PlayerInfo,
}

impl PlayerProfile {
    pub fn new(id: impl Into<String>, info: PlayerInfo) -> Self {
        Self { id: id.into(), info }
    }
}
