use actix::prelude::*;
use chess::{Board, ChessMove};
use chrono::Utc;
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::error::ServiceError;
use crate::game::clock::Charge;
use crate::game::utils::{apply_tracked, build_move, position_outcome, san};
use crate::models::*;
use crate::registry::{after, Registry};
use crate::storage::{save_json, session_key};

#[derive(Message, Debug)]
#[rtype(result = "Result<(), ServiceError>")]
pub struct SessionConnect {
    pub user_id: String,
    pub display_name: Option<String>,
    pub spectator: bool,
    pub connection: Connection,
}

#[derive(Message, Debug)]
#[rtype(result = "Result<MoveRecord, ServiceError>")]
pub struct SubmitMove {
    pub user_id: String,
    pub from: String,
    pub to: String,
    pub promotion: Option<String>,
}

#[derive(Message, Debug)]
#[rtype(result = "()")]
pub struct SessionDisconnect {
    pub connection_id: Uuid,
}

/// Fired by the durable abandonment timer. Advisory: re-checked against state.
#[derive(Message, Debug)]
#[rtype(result = "()")]
pub struct AbandonmentTimeout {
    pub player_id: String,
}

#[derive(Message, Debug)]
#[rtype(result = "Result<(), ServiceError>")]
pub struct Resign {
    pub user_id: String,
}

#[derive(Message, Debug)]
#[rtype(result = "GameView")]
pub struct GetSession;

/// A live match between two players, watched by up to `max_spectators`.
pub struct GameSession {
    state: SessionState,
    /// Tracked position; `None` once tracking is suspended.
    board: Option<Board>,
    spectators: HashMap<Uuid, Spectator>,
    registry: Arc<Registry>,
    flag_timer: Option<SpawnHandle>,
    abandonment_timer: Option<SpawnHandle>,
}

impl GameSession {
    pub fn new(state: SessionState, registry: Arc<Registry>) -> Self {
        let board = if state.position_tracked {
            Board::from_str(&state.fen).ok()
        } else {
            None
        };
        Self {
            state,
            board,
            spectators: HashMap::new(),
            registry,
            flag_timer: None,
            abandonment_timer: None,
        }
    }

    fn view(&self) -> GameView {
        GameView {
            state: self.state.clone(),
            spectator_count: self.spectators.len(),
        }
    }

    fn persist(&self) {
        if let Err(e) = save_json(self.registry.storage(), &session_key(&self.state.id), &self.state) {
            error!("Failed to persist session {}: {}", self.state.id, e);
        }
    }

    /// Sends to every attached player and spectator.
    fn broadcast(&self, event: &SessionEvent) {
        for conn in self.state.players.iter().filter_map(|p| p.connection.as_ref()) {
            conn.send(event);
        }
        for spectator in self.spectators.values() {
            spectator.connection.send(event);
        }
    }

    fn notify_opponent(&self, color: PlayerColor, connected: bool) {
        let Some(player) = self.state.players.seat(color) else {
            return;
        };
        let opponent = self.state.players.seat(color.opposite());
        if let Some(conn) = opponent.and_then(|o| o.connection.as_ref()) {
            conn.send(&SessionEvent::OpponentStatus {
                connected,
                opponent_id: player.id.clone(),
            });
        }
    }

    fn arm_flag_timer(&mut self, ctx: &mut Context<Self>) {
        if let Some(handle) = self.flag_timer.take() {
            ctx.cancel_future(handle);
        }
        if self.state.status != SessionStatus::InProgress {
            return;
        }
        let delay = self.state.clock.until_flag(Utc::now());
        self.flag_timer = Some(ctx.run_later(delay, |act, ctx| {
            act.flag_timer = None;
            act.on_flag(ctx);
        }));
    }

    fn on_flag(&mut self, ctx: &mut Context<Self>) {
        if self.state.status != SessionStatus::InProgress {
            return;
        }
        if self.state.clock.remaining_now(Utc::now()) > 0 {
            self.arm_flag_timer(ctx);
            return;
        }
        let flagged = self.state.clock.current_turn;
        info!("Session {}: {} ran out of time", self.state.id, flagged);
        self.end_game(GameResult::win_for(flagged.opposite()), EndReason::Timeout, ctx);
    }

    fn arm_abandonment_timer(&mut self, ctx: &mut Context<Self>) {
        if let Some(handle) = self.abandonment_timer.take() {
            ctx.cancel_future(handle);
        }
        let Some(pending) = &self.state.abandonment else {
            return;
        };
        let delay = (pending.fire_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        let player_id = pending.player_id.clone();
        info!(
            "Session {}: abandonment timer for {} armed ({:?})",
            self.state.id, player_id, delay
        );
        self.abandonment_timer = Some(ctx.notify_later(AbandonmentTimeout { player_id }, delay));
    }

    fn disarm_abandonment_timer(&mut self, ctx: &mut Context<Self>) {
        if let Some(handle) = self.abandonment_timer.take() {
            ctx.cancel_future(handle);
        }
        self.state.abandonment = None;
    }

    /// Arms the single abandonment timer for a disconnected player, unless
    /// one is already pending or the game is not in progress.
    fn watch_for_abandonment(&mut self, ctx: &mut Context<Self>) {
        if self.state.status != SessionStatus::InProgress || self.state.abandonment.is_some() {
            return;
        }
        let Some(player_id) = self.state.players.iter().find(|p| !p.connected).map(|p| p.id.clone()) else {
            return;
        };
        self.state.abandonment = Some(PendingAbandonment {
            player_id,
            fire_at: after(Utc::now(), self.registry.config().abandonment_grace),
        });
        self.arm_abandonment_timer(ctx);
    }

    fn on_abandonment(&mut self, player_id: &str, ctx: &mut Context<Self>) {
        let Some(pending) = self.state.abandonment.clone() else {
            debug!("Stale abandonment timer in session {}", self.state.id);
            return;
        };
        if pending.player_id != player_id || self.state.status != SessionStatus::InProgress {
            debug!("Stale abandonment timer for {} in session {}", player_id, self.state.id);
            return;
        }
        if Utc::now() < pending.fire_at {
            self.arm_abandonment_timer(ctx);
            return;
        }
        let Some(color) = self.state.players.color_of(player_id) else {
            return;
        };
        self.state.abandonment = None;
        if self.state.players.seat(color).is_some_and(|p| p.connected) {
            self.persist();
            return;
        }
        info!("Session {}: {} abandoned the game", self.state.id, player_id);
        self.end_game(GameResult::win_for(color.opposite()), EndReason::Abandonment, ctx);
    }

    /// After the retention window the finished game is discarded: the actor
    /// stops and its snapshot is deleted.
    fn schedule_retirement(&self, ctx: &mut Context<Self>) {
        ctx.run_later(self.registry.config().terminal_retention, |act, ctx| {
            info!("Retiring session {}", act.state.id);
            if let Err(e) = act.registry.storage().delete(&session_key(&act.state.id)) {
                warn!("Failed to delete snapshot of session {}: {}", act.state.id, e);
            }
            ctx.stop();
        });
    }

    /// Finishes the game once; later calls are ignored.
    fn end_game(&mut self, result: GameResult, reason: EndReason, ctx: &mut Context<Self>) {
        if self.state.status == SessionStatus::Finished {
            debug!("Session {} already finished", self.state.id);
            return;
        }
        if let Some(handle) = self.flag_timer.take() {
            ctx.cancel_future(handle);
        }
        self.disarm_abandonment_timer(ctx);

        self.state.clock.freeze(Utc::now());
        self.state.status = SessionStatus::Finished;
        self.state.result = Some(result);
        self.state.reason = Some(reason);
        self.persist();
        info!("Session {} finished: {:?} by {}", self.state.id, result, reason);

        self.broadcast(&SessionEvent::GameOver {
            result,
            reason,
            state: self.view(),
        });
        self.schedule_retirement(ctx);
    }

    fn attach_spectator(&mut self, msg: SessionConnect) -> Result<(), ServiceError> {
        let SessionConnect {
            user_id,
            display_name,
            connection,
            ..
        } = msg;
        if !self.state.allow_spectators {
            connection.reject(ServiceError::SpectatingDisabled.to_string());
            return Err(ServiceError::SpectatingDisabled);
        }
        if self.spectators.len() >= self.state.max_spectators {
            debug!("Session {} spectator limit reached, refusing {}", self.state.id, user_id);
            connection.reject(ServiceError::SpectatorLimitReached.to_string());
            return Err(ServiceError::SpectatorLimitReached);
        }

        self.spectators.insert(
            connection.id,
            Spectator {
                display_name: display_name.unwrap_or_else(|| user_id.clone()),
                id: user_id,
                connection: connection.clone(),
                joined_at: Utc::now(),
            },
        );
        connection.send(&SessionEvent::SpectatorJoined { state: self.view() });
        Ok(())
    }

    fn attach_player(&mut self, msg: SessionConnect, ctx: &mut Context<Self>) -> Result<(), ServiceError> {
        let SessionConnect {
            user_id, connection, ..
        } = msg;
        let Some(color) = self.state.players.color_of(&user_id) else {
            warn!("Rejecting connection from {} to session {}", user_id, self.state.id);
            connection.reject(ServiceError::Unauthorized.to_string());
            return Err(ServiceError::Unauthorized);
        };

        // Take the seat, closing any older connection for it
        let now = Utc::now();
        let seat = self
            .state
            .players
            .seat_mut(color)
            .ok_or(ServiceError::Unauthorized)?;
        if let Some(previous) = seat.connection.replace(connection.clone()) {
            if previous.id != connection.id {
                previous.close("superseded by a newer connection");
            }
        }
        seat.connected = true;
        seat.last_seen = now;
        info!("{} ({}) attached to session {}", user_id, color, self.state.id);

        // A returning player cancels their own abandonment countdown
        if self
            .state
            .abandonment
            .as_ref()
            .is_some_and(|a| a.player_id == user_id)
        {
            info!("Session {}: {} is back, abandonment disarmed", self.state.id, user_id);
            self.disarm_abandonment_timer(ctx);
            self.watch_for_abandonment(ctx);
        }

        // Late attach to a finished game only gets the outcome
        if self.state.status == SessionStatus::Finished {
            if let (Some(result), Some(reason)) = (self.state.result, self.state.reason) {
                connection.send(&SessionEvent::GameOver {
                    result,
                    reason,
                    state: self.view(),
                });
            }
            return Ok(());
        }

        if self.state.status == SessionStatus::Waiting {
            self.state.status = SessionStatus::Ready;
        }
        self.notify_opponent(color, true);
        connection.send(&SessionEvent::Ready {
            state: self.view(),
            assigned_color: color,
        });

        // Second player in: start the clock
        if self.state.status == SessionStatus::Ready && self.state.players.both_connected() {
            self.state.status = SessionStatus::InProgress;
            self.state.clock.start(now);
            self.persist();
            info!("Session {} started", self.state.id);
            self.broadcast(&SessionEvent::GameStarted { state: self.view() });
            self.arm_flag_timer(ctx);
        } else {
            self.persist();
        }
        Ok(())
    }

    fn submit_move(&mut self, msg: SubmitMove, ctx: &mut Context<Self>) -> Result<MoveRecord, ServiceError> {
        let color = self
            .state
            .players
            .color_of(&msg.user_id)
            .ok_or(ServiceError::Unauthorized)?;
        if self.state.status != SessionStatus::InProgress {
            return Err(ServiceError::InvalidPhase);
        }
        if color != self.state.clock.current_turn {
            return Err(ServiceError::NotYourTurn);
        }
        let (chess_move, uci) = build_move(&msg.from, &msg.to, msg.promotion.as_deref())?;

        // Charge the mover's clock; a fallen flag ends the game instead
        let mut clock = self.state.clock.clone();
        if clock.complete_move(Utc::now()) == Charge::Flagged {
            info!("Session {}: move from {} arrived after the flag fell", self.state.id, color);
            self.end_game(GameResult::win_for(color.opposite()), EndReason::Timeout, ctx);
            return Err(ServiceError::InvalidPhase);
        }

        self.state.clock = clock;
        let (san, outcome) = self.track(chess_move, color);
        let record = MoveRecord {
            from: msg.from.trim().to_lowercase(),
            to: msg.to.trim().to_lowercase(),
            uci,
            san,
            promotion: msg.promotion,
        };
        self.state.move_history.push(record.clone());
        debug!(
            "Session {}: {} played {} ({} moves)",
            self.state.id,
            color,
            record.uci,
            self.state.move_history.len()
        );
        self.persist();

        // Announce, then either finish or wait on the next mover's flag
        self.broadcast(&SessionEvent::MoveMade {
            record: record.clone(),
            state: self.view(),
        });
        match outcome {
            Some((result, reason)) => self.end_game(result, reason, ctx),
            None => self.arm_flag_timer(ctx),
        }
        Ok(record)
    }

    /// Applies the move to the tracked board, returning its SAN and any
    /// terminal outcome it produced.
    fn track(&mut self, chess_move: ChessMove, mover: PlayerColor) -> (Option<String>, Option<(GameResult, EndReason)>) {
        let Some(board) = self.board.as_ref() else {
            return (None, None);
        };
        match apply_tracked(board, chess_move) {
            Some(next) => {
                let notation = san(board, chess_move);
                self.state.fen = next.to_string();
                let outcome = position_outcome(&next, mover);
                self.board = Some(next);
                (notation, outcome)
            }
            None => {
                warn!(
                    "Session {}: {} does not apply to the tracked position, tracking suspended",
                    self.state.id, chess_move
                );
                self.board = None;
                self.state.position_tracked = false;
                (None, None)
            }
        }
    }

    fn disconnect(&mut self, connection_id: Uuid, ctx: &mut Context<Self>) {
        if let Some(spectator) = self.spectators.remove(&connection_id) {
            debug!("Spectator {} left session {}", spectator.id, self.state.id);
            return;
        }
        let Some(color) = self.state.players.color_by_connection(connection_id) else {
            return;
        };
        if let Some(seat) = self.state.players.seat_mut(color) {
            seat.connected = false;
            seat.connection = None;
            seat.last_seen = Utc::now();
            info!("{} ({}) left session {}", seat.id, color, self.state.id);
        }
        self.notify_opponent(color, false);
        self.watch_for_abandonment(ctx);
        self.persist();
    }
}

impl Actor for GameSession {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        match self.state.status {
            SessionStatus::Finished => self.schedule_retirement(ctx),
            SessionStatus::InProgress => {
                self.arm_flag_timer(ctx);
                self.arm_abandonment_timer(ctx);
            }
            _ => {}
        }
    }

    fn stopped(&mut self, ctx: &mut Self::Context) {
        self.registry.release_session(&self.state.id, &ctx.address());
    }
}

impl Handler<SessionConnect> for GameSession {
    type Result = Result<(), ServiceError>;

    fn handle(&mut self, msg: SessionConnect, ctx: &mut Self::Context) -> Self::Result {
        if msg.spectator {
            self.attach_spectator(msg)
        } else {
            self.attach_player(msg, ctx)
        }
    }
}

impl Handler<SubmitMove> for GameSession {
    type Result = Result<MoveRecord, ServiceError>;

    fn handle(&mut self, msg: SubmitMove, ctx: &mut Self::Context) -> Self::Result {
        self.submit_move(msg, ctx)
    }
}

impl Handler<SessionDisconnect> for GameSession {
    type Result = ();

    fn handle(&mut self, msg: SessionDisconnect, ctx: &mut Self::Context) {
        self.disconnect(msg.connection_id, ctx);
    }
}

impl Handler<AbandonmentTimeout> for GameSession {
    type Result = ();

    fn handle(&mut self, msg: AbandonmentTimeout, ctx: &mut Self::Context) {
        self.on_abandonment(&msg.player_id, ctx);
    }
}

impl Handler<Resign> for GameSession {
    type Result = Result<(), ServiceError>;

    fn handle(&mut self, msg: Resign, ctx: &mut Self::Context) -> Self::Result {
        let color = self
            .state
            .players
            .color_of(&msg.user_id)
            .ok_or(ServiceError::Unauthorized)?;
        if self.state.status != SessionStatus::InProgress {
            return Err(ServiceError::InvalidPhase);
        }
        info!("Session {}: {} resigned", self.state.id, color);
        self.end_game(GameResult::win_for(color.opposite()), EndReason::Resignation, ctx);
        Ok(())
    }
}

impl Handler<GetSession> for GameSession {
    type Result = MessageResult<GetSession>;

    fn handle(&mut self, _msg: GetSession, _ctx: &mut Self::Context) -> Self::Result {
        MessageResult(self.view())
    }
}
