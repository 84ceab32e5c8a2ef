use actix::prelude::*;
use chrono::Utc;
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::error::ServiceError;
use crate::lobby::directory::DirectoryUpdate;
use crate::models::*;
use crate::registry::Registry;
use crate::storage::{lobby_key, save_json};

pub const CREATOR_LEFT: &str = "creator_left";
pub const TIMED_OUT: &str = "timed_out";
pub const CANCELLED_BY_CREATOR: &str = "cancelled_by_creator";

#[derive(Message, Debug)]
#[rtype(result = "Result<JoinAccepted, ServiceError>")]
pub struct JoinLobby {
    pub user_id: String,
    pub player: PlayerInfo,
    pub private_code: Option<String>,
}

#[derive(Message, Debug)]
#[rtype(result = "Result<(), ServiceError>")]
pub struct LobbyConnect {
    pub user_id: String,
    pub connection: Connection,
}

#[derive(Message, Debug)]
#[rtype(result = "()")]
pub struct LobbyDisconnect {
    pub connection_id: Uuid,
}

/// Fired by the durable wait-timer. Advisory: re-checked against state.
#[derive(Message, Debug)]
#[rtype(result = "()")]
pub struct WaitTimeout;

#[derive(Message, Debug)]
#[rtype(result = "Result<(), ServiceError>")]
pub struct CancelLobby {
    pub user_id: String,
}

#[derive(Message, Debug)]
#[rtype(result = "LobbyState")]
pub struct GetLobby;

/// One matchmaking attempt. The actor mailbox serializes every operation
/// against the lobby's state.
pub struct Lobby {
    state: LobbyState,
    registry: Arc<Registry>,
    creator_conn: Option<Connection>,
    opponent_conn: Option<Connection>,
    wait_timer: Option<SpawnHandle>,
}

impl Lobby {
    pub fn new(state: LobbyState, registry: Arc<Registry>) -> Self {
        Self {
            state,
            registry,
            creator_conn: None,
            opponent_conn: None,
            wait_timer: None,
        }
    }

    fn persist(&self, state: &LobbyState) -> Result<(), ServiceError> {
        save_json(self.registry.storage(), &lobby_key(&state.id), state)?;
        Ok(())
    }

    fn list_in_directory(&self) {
        debug!("Listing lobby {} in directory", self.state.id);
        self.registry
            .directory()
            .do_send(DirectoryUpdate::Add(self.state.summary()));
    }

    fn unlist(&self) {
        debug!("Removing lobby {} from directory", self.state.id);
        self.registry.directory().do_send(DirectoryUpdate::Remove {
            lobby_id: self.state.id.clone(),
        });
    }

    fn arm_wait_timer(&mut self, ctx: &mut Context<Self>) {
        let Some(deadline) = self.state.wait_deadline else {
            return;
        };
        if let Some(handle) = self.wait_timer.take() {
            ctx.cancel_future(handle);
        }
        let delay = (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        debug!("Lobby {} wait-timeout armed for {:?}", self.state.id, delay);
        self.wait_timer = Some(ctx.notify_later(WaitTimeout, delay));
    }

    fn disarm_wait_timer(&mut self, ctx: &mut Context<Self>) {
        if let Some(handle) = self.wait_timer.take() {
            ctx.cancel_future(handle);
            debug!("Lobby {} wait-timeout disarmed", self.state.id);
        }
    }

    fn on_wait_timeout(&mut self, ctx: &mut Context<Self>) {
        if self.state.status != LobbyStatus::Waiting {
            debug!("Stale wait-timeout for lobby {} ({:?})", self.state.id, self.state.status);
            return;
        }
        let Some(deadline) = self.state.wait_deadline else {
            return;
        };
        if Utc::now() < deadline {
            info!("Wait-timeout for lobby {} fired early, re-arming", self.state.id);
            self.arm_wait_timer(ctx);
            return;
        }
        self.cancel(TIMED_OUT, ctx);
    }

    /// Stops the actor once the retention window has passed and drops the
    /// snapshot of a terminal lobby, so later lookups report it as not found.
    fn schedule_retirement(&self, ctx: &mut Context<Self>) {
        ctx.run_later(self.registry.config().terminal_retention, |act, ctx| {
            debug!("Retiring lobby {}", act.state.id);
            if act.state.status.is_terminal() {
                if let Err(e) = act.registry.storage().delete(&lobby_key(&act.state.id)) {
                    warn!("Failed to delete snapshot of lobby {}: {}", act.state.id, e);
                }
            }
            ctx.stop();
        });
    }

    /// Moves a waiting lobby to `cancelled`. Returns false when the lobby was
    /// already terminal, in which case nothing is notified or unlisted.
    fn cancel(&mut self, reason: &str, ctx: &mut Context<Self>) -> bool {
        if self.state.status != LobbyStatus::Waiting {
            debug!("Lobby {} already {:?}, not cancelling", self.state.id, self.state.status);
            return false;
        }

        self.state.status = LobbyStatus::Cancelled;
        self.state.cancel_reason = Some(reason.to_string());
        self.state.wait_deadline = None;
        self.disarm_wait_timer(ctx);
        if let Err(e) = self.persist(&self.state) {
            warn!("Failed to persist cancellation of lobby {}: {}", self.state.id, e);
        }
        info!("Lobby {} cancelled: {}", self.state.id, reason);

        for conn in self.creator_conn.iter().chain(self.opponent_conn.iter()) {
            conn.send(&LobbyEvent::LobbyCancelled {
                reason: reason.to_string(),
            });
            conn.close(reason);
        }
        self.unlist();
        self.schedule_retirement(ctx);
        true
    }

    fn match_ready_for(&self, user_id: &str) -> Option<LobbyEvent> {
        let session_id = self.state.session_id.clone()?;
        let endpoint = self.state.session_endpoint.clone()?;
        let creator_color = self.state.creator_color?;
        let opponent = self.state.opponent.clone()?;

        if self.state.is_creator(user_id) {
            Some(LobbyEvent::MatchReady {
                session_id,
                endpoint,
                assigned_color: creator_color,
                opponent,
            })
        } else if opponent.id == user_id {
            Some(LobbyEvent::MatchReady {
                session_id,
                endpoint,
                assigned_color: creator_color.opposite(),
                opponent: self.state.creator_profile(),
            })
        } else {
            None
        }
    }

    /// Parameters of the game session a matched lobby hands over to.
    fn session_init(&self) -> Option<SessionInit> {
        let session_id = self.state.session_id.clone()?;
        let creator_color = self.state.creator_color?;
        let opponent = self.state.opponent.clone()?;
        let creator = self.state.creator_profile();
        let (white, black) = match creator_color {
            PlayerColor::White => (creator, opponent),
            PlayerColor::Black => (opponent, creator),
        };
        let settings = &self.state.settings;
        Some(SessionInit {
            session_id,
            mode: settings.mode,
            unrated: settings.opening_start_fen.is_some(),
            starting_position: settings.opening_start_fen.clone(),
            opening_name: settings.opening_name.clone(),
            allow_spectators: settings.allow_spectators,
            max_spectators: settings.max_spectators,
            white,
            black,
        })
    }

    /// Brings the matched session up. Launching an existing session is a
    /// no-op, so this is safe to repeat.
    fn launch_session(&self) -> Result<String, ServiceError> {
        let init = self
            .session_init()
            .ok_or_else(|| ServiceError::Unavailable(format!("lobby {} has no match", self.state.id)))?;
        self.registry.launch_session(init)
    }

    fn join(&mut self, msg: JoinLobby, ctx: &mut Context<Self>) -> Result<JoinAccepted, ServiceError> {
        if self.state.status != LobbyStatus::Waiting {
            return Err(ServiceError::LobbyNotWaiting);
        }
        if self.state.is_creator(&msg.user_id) {
            return Err(ServiceError::SelfJoin);
        }
        let settings = &self.state.settings;
        if settings.is_private && settings.private_code != msg.private_code {
            return Err(ServiceError::Unauthorized);
        }

        // Colors and the session id are fixed here, once
        let creator_color = resolve_creator_color(settings.desired_color);
        let session_id = Uuid::new_v4().to_string();
        let opponent = PlayerProfile::new(msg.user_id, msg.player);

        // The matched status is durable before anything else happens.
        let mut next = self.state.clone();
        next.status = LobbyStatus::Matched;
        next.opponent = Some(opponent.clone());
        next.creator_color = Some(creator_color);
        next.session_id = Some(session_id.clone());
        next.session_endpoint = Some(self.registry.config().session_endpoint(&session_id));
        next.wait_deadline = None;
        self.persist(&next)?;
        self.state = next;
        info!(
            "Lobby {} matched {} ({}) with {} ({})",
            self.state.id,
            self.state.creator_id,
            creator_color,
            opponent.id,
            creator_color.opposite()
        );

        // Matchmaking is over whether or not the session comes up
        self.disarm_wait_timer(ctx);
        self.unlist();
        self.schedule_retirement(ctx);

        // Tell the creator who joined
        if let Some(conn) = &self.creator_conn {
            conn.send(&LobbyEvent::OpponentJoined { opponent });
        }

        // Start the game; a participant reconnecting later retries a failed launch
        let session_endpoint = match self.launch_session() {
            Ok(endpoint) => endpoint,
            Err(e) => {
                error!("Lobby {} could not create session {}: {}", self.state.id, session_id, e);
                if let Some(conn) = &self.creator_conn {
                    conn.send(&LobbyEvent::Error {
                        message: format!("failed to start game: {e}"),
                    });
                }
                return Err(e);
            }
        };

        // Point the creator at the session
        if let Some(conn) = &self.creator_conn {
            if let Some(ready) = self.match_ready_for(&self.state.creator_id) {
                conn.send(&ready);
            }
        }

        Ok(JoinAccepted {
            session_id,
            session_endpoint,
            assigned_color: creator_color.opposite(),
            opponent: self.state.creator_profile(),
        })
    }

    fn connect(&mut self, msg: LobbyConnect) -> Result<(), ServiceError> {
        let LobbyConnect { user_id, connection } = msg;
        let is_creator = self.state.is_creator(&user_id);
        if !is_creator && !self.state.is_opponent(&user_id) {
            warn!("Rejecting connection from {} to lobby {}", user_id, self.state.id);
            connection.reject(ServiceError::Unauthorized.to_string());
            return Err(ServiceError::Unauthorized);
        }

        if self.state.status == LobbyStatus::Cancelled {
            let reason = self.state.cancel_reason.clone().unwrap_or_default();
            connection.send(&LobbyEvent::LobbyCancelled {
                reason: reason.clone(),
            });
            connection.close(reason);
            return Ok(());
        }

        let slot = if is_creator {
            &mut self.creator_conn
        } else {
            &mut self.opponent_conn
        };
        if let Some(previous) = slot.replace(connection.clone()) {
            if previous.id != connection.id {
                previous.close("superseded by a newer connection");
            }
        }
        info!("{} attached to lobby {}", user_id, self.state.id);

        match self.state.status {
            LobbyStatus::Waiting => connection.send(&LobbyEvent::Waiting {
                status: self.state.status,
                created_at: self.state.created_at,
                settings: self.state.settings.clone(),
            }),
            _ => {
                // Make sure the session exists before pointing anyone at it
                if let Err(e) = self.launch_session() {
                    error!("Lobby {} still cannot start its session: {}", self.state.id, e);
                    connection.send(&LobbyEvent::Error {
                        message: format!("failed to start game: {e}"),
                    });
                    return Ok(());
                }
                if let Some(ready) = self.match_ready_for(&user_id) {
                    connection.send(&ready);
                }
            }
        }
        Ok(())
    }

    fn disconnect(&mut self, connection_id: Uuid, ctx: &mut Context<Self>) {
        if self.creator_conn.as_ref().is_some_and(|c| c.id == connection_id) {
            self.creator_conn = None;
            if self.state.status == LobbyStatus::Waiting {
                self.cancel(CREATOR_LEFT, ctx);
            }
        } else if self.opponent_conn.as_ref().is_some_and(|c| c.id == connection_id) {
            self.opponent_conn = None;
        }
    }
}

fn resolve_creator_color(desired: DesiredColor) -> PlayerColor {
    match desired {
        DesiredColor::White => PlayerColor::White,
        DesiredColor::Black => PlayerColor::Black,
        DesiredColor::Random => {
            if rand::random::<bool>() {
                PlayerColor::White
            } else {
                PlayerColor::Black
            }
        }
    }
}

impl Actor for Lobby {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        if self.state.status == LobbyStatus::Waiting {
            self.list_in_directory();
            self.arm_wait_timer(ctx);
        } else {
            self.schedule_retirement(ctx);
        }
    }

    fn stopped(&mut self, ctx: &mut Self::Context) {
        self.registry.release_lobby(&self.state.id, &ctx.address());
    }
}

impl Handler<JoinLobby> for Lobby {
    type Result = Result<JoinAccepted, ServiceError>;

    fn handle(&mut self, msg: JoinLobby, ctx: &mut Self::Context) -> Self::Result {
        self.join(msg, ctx)
    }
}

impl Handler<LobbyConnect> for Lobby {
    type Result = Result<(), ServiceError>;

    fn handle(&mut self, msg: LobbyConnect, _ctx: &mut Self::Context) -> Self::Result {
        self.connect(msg)
    }
}

impl Handler<LobbyDisconnect> for Lobby {
    type Result = ();

    fn handle(&mut self, msg: LobbyDisconnect, ctx: &mut Self::Context) {
        self.disconnect(msg.connection_id, ctx);
    }
}

impl Handler<WaitTimeout> for Lobby {
    type Result = ();

    fn handle(&mut self, _msg: WaitTimeout, ctx: &mut Self::Context) {
        self.on_wait_timeout(ctx);
    }
}

impl Handler<CancelLobby> for Lobby {
    type Result = Result<(), ServiceError>;

    fn handle(&mut self, msg: CancelLobby, ctx: &mut Self::Context) -> Self::Result {
        if !self.state.is_creator(&msg.user_id) {
            return Err(ServiceError::Unauthorized);
        }
        match self.state.status {
            LobbyStatus::Waiting => {
                self.cancel(CANCELLED_BY_CREATOR, ctx);
                Ok(())
            }
            LobbyStatus::Cancelled => Ok(()),
            LobbyStatus::Matched => Err(ServiceError::LobbyNotWaiting),
        }
    }
}

impl Handler<GetLobby> for Lobby {
    type Result = MessageResult<GetLobby>;

    fn handle(&mut self, _msg: GetLobby, _ctx: &mut Self::Context) -> Self::Result {
        MessageResult(self.state.clone())
    }
}
