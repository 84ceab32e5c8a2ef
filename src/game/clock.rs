use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::models::{GameMode, PlayerColor};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClockSide {
    pub remaining_ms: u64,
    pub increment_ms: u64,
}

/// Result of charging the side to move for the time it spent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Charge {
    /// Time left after the increment was credited.
    Remaining(u64),
    /// The flag fell before the move arrived.
    Flagged,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClockState {
    pub white: ClockSide,
    pub black: ClockSide,
    pub current_turn: PlayerColor,
    /// Instant the side to move started thinking; `None` until the game starts.
    pub last_update: Option<DateTime<Utc>>,
}

impl ClockState {
    /// Initial time and increment per mode, in milliseconds.
    pub fn settings(mode: GameMode) -> (u64, u64) {
        match mode {
            GameMode::Bullet => (60_000, 1_000),
            GameMode::Blitz => (300_000, 3_000),
            GameMode::Rapid => (900_000, 10_000),
        }
    }

    pub fn for_mode(mode: GameMode, first_to_move: PlayerColor) -> Self {
        let (remaining_ms, increment_ms) = Self::settings(mode);
        let side = ClockSide {
            remaining_ms,
            increment_ms,
        };
        Self {
            white: side,
            black: side,
            current_turn: first_to_move,
            last_update: None,
        }
    }

    pub fn side(&self, color: PlayerColor) -> &ClockSide {
        match color {
            PlayerColor::White => &self.white,
            PlayerColor::Black => &self.black,
        }
    }

    fn side_mut(&mut self, color: PlayerColor) -> &mut ClockSide {
        match color {
            PlayerColor::White => &mut self.white,
            PlayerColor::Black => &mut self.black,
        }
    }

    pub fn start(&mut self, now: DateTime<Utc>) {
        self.last_update = Some(now);
    }

    fn elapsed_ms(&self, now: DateTime<Utc>) -> u64 {
        self.last_update
            .map(|since| (now - since).num_milliseconds().max(0) as u64)
            .unwrap_or(0)
    }

    /// Time the side to move would have left at `now`.
    pub fn remaining_now(&self, now: DateTime<Utc>) -> u64 {
        self.side(self.current_turn)
            .remaining_ms
            .saturating_sub(self.elapsed_ms(now))
    }

    /// Delay until the side to move runs out of time.
    pub fn until_flag(&self, now: DateTime<Utc>) -> Duration {
        Duration::from_millis(self.remaining_now(now))
    }

    /// Charges the mover for elapsed time, credits the increment and hands
    /// the turn over. A flagged mover is left untouched.
    pub fn complete_move(&mut self, now: DateTime<Utc>) -> Charge {
        let mover = self.current_turn;
        let elapsed = self.elapsed_ms(now);
        let side = self.side_mut(mover);
        if elapsed >= side.remaining_ms {
            return Charge::Flagged;
        }
        side.remaining_ms = side.remaining_ms - elapsed + side.increment_ms;
        let remaining = side.remaining_ms;
        self.current_turn = mover.opposite();
        self.last_update = Some(now);
        Charge::Remaining(remaining)
    }

    /// Settles the side to move at `now` so a finished game shows its final times.
    pub fn freeze(&mut self, now: DateTime<Utc>) {
        if self.last_update.is_some() {
            let remaining = self.remaining_now(now);
            let turn = self.current_turn;
            self.side_mut(turn).remaining_ms = remaining;
            self.last_update = Some(now);
        }
    }
}
