use actix::prelude::*;
use actix_web::{web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use log::{debug, info, warn};
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::config::Config;
use crate::error::ServiceError;
use crate::game::session::{GameSession, GetSession, Resign, SessionConnect, SessionDisconnect, SubmitMove};
use crate::lobby::actor::{CancelLobby, Lobby, LobbyConnect, LobbyDisconnect};
use crate::models::*;

type Attach = Pin<Box<dyn Future<Output = Result<Result<(), ServiceError>, MailboxError>>>>;

/// Entity a socket is attached to.
pub enum SocketTarget {
    Lobby(Addr<Lobby>),
    Session {
        addr: Addr<GameSession>,
        spectator: bool,
        display_name: Option<String>,
    },
}

/// One live client connection. Inbound frames are dispatched into the owning
/// entity; the entity talks back through `Outbound`.
pub struct ClientSocket {
    pub id: Uuid,
    pub user_id: String,
    pub target: SocketTarget,
    heartbeat_interval: Duration,
    client_timeout: Duration,
    last_heartbeat: Instant,
}

impl ClientSocket {
    pub fn new(user_id: String, target: SocketTarget, config: &Config) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            target,
            heartbeat_interval: config.heartbeat_interval,
            client_timeout: config.client_timeout,
            last_heartbeat: Instant::now(),
        }
    }

    fn start_heartbeat(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(self.heartbeat_interval, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > act.client_timeout {
                warn!("Connection {} ({}) heartbeat timeout, disconnecting", act.id, act.user_id);
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    fn reply<T: Serialize>(ctx: &mut ws::WebsocketContext<Self>, frame: &T) {
        match serde_json::to_string(frame) {
            Ok(text) => ctx.text(text),
            Err(e) => warn!("Error serializing frame: {}", e),
        }
    }

    fn reply_error(ctx: &mut ws::WebsocketContext<Self>, error: impl ToString) {
        Self::reply(ctx, &ErrorEvent::new(error.to_string()));
    }

    fn attach(&self, ctx: &mut ws::WebsocketContext<Self>) {
        let connection = Connection::new(self.id, ctx.address().recipient());
        let user_id = self.user_id.clone();
        let attached: Attach = match &self.target {
            SocketTarget::Lobby(addr) => Box::pin(addr.send(LobbyConnect { user_id, connection })),
            SocketTarget::Session {
                addr,
                spectator,
                display_name,
            } => Box::pin(addr.send(SessionConnect {
                user_id,
                display_name: display_name.clone(),
                spectator: *spectator,
                connection,
            })),
        };

        // Nothing else is read from the client until the entity has answered.
        attached
            .into_actor(self)
            .then(|res, act, ctx| {
                match res {
                    Ok(Ok(())) => debug!("Connection {} attached for {}", act.id, act.user_id),
                    // The entity already sent the error frame and a close.
                    Ok(Err(e)) => debug!("Connection {} refused: {}", act.id, e),
                    Err(e) => {
                        warn!("Connection {} could not reach its entity: {}", act.id, e);
                        Self::reply_error(ctx, ServiceError::from(e));
                        ctx.stop();
                    }
                }
                fut::ready(())
            })
            .wait(ctx);
    }

    fn dispatch(&mut self, msg: ClientMessage, ctx: &mut ws::WebsocketContext<Self>) {
        let user_id = self.user_id.clone();
        match (msg, &self.target) {
            (ClientMessage::Ping, _) => Self::reply(ctx, &SessionEvent::Pong),
            (ClientMessage::Cancel, SocketTarget::Lobby(addr)) => {
                Self::forward(addr.send(CancelLobby { user_id }), ctx);
            }
            (ClientMessage::Move { from, to, promotion }, SocketTarget::Session { addr, spectator: false, .. }) => {
                let request = addr.send(SubmitMove {
                    user_id,
                    from,
                    to,
                    promotion,
                });
                Self::forward(request, ctx);
            }
            (ClientMessage::Resign, SocketTarget::Session { addr, spectator: false, .. }) => {
                Self::forward(addr.send(Resign { user_id }), ctx);
            }
            (ClientMessage::Sync, SocketTarget::Session { addr, .. }) => {
                addr.send(GetSession)
                    .into_actor(self)
                    .then(|res, _act, ctx| {
                        match res {
                            Ok(state) => Self::reply(ctx, &SessionEvent::Sync { state }),
                            Err(e) => Self::reply_error(ctx, ServiceError::from(e)),
                        }
                        fut::ready(())
                    })
                    .spawn(ctx);
            }
            (other, _) => {
                debug!("Connection {} sent unsupported {:?}", self.id, other);
                Self::reply_error(ctx, "message not supported on this connection");
            }
        }
    }

    /// Runs a request against the entity and reports a failure as an error
    /// frame. Successes are announced by the entity's own broadcasts.
    fn forward<T, F>(request: F, ctx: &mut ws::WebsocketContext<Self>)
    where
        T: 'static,
        F: Future<Output = Result<Result<T, ServiceError>, MailboxError>> + 'static,
    {
        fut::wrap_future::<_, Self>(request)
            .then(|res, _act, ctx| {
                if let Err(e) = res.map_err(ServiceError::from).and_then(|r| r) {
                    Self::reply_error(ctx, e);
                }
                fut::ready(())
            })
            .spawn(ctx);
    }
}

impl Actor for ClientSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!("Connection {} opened by {}", self.id, self.user_id);
        self.start_heartbeat(ctx);
        self.attach(ctx);
    }

    fn stopping(&mut self, _: &mut Self::Context) -> Running {
        let connection_id = self.id;
        match &self.target {
            SocketTarget::Lobby(addr) => addr.do_send(LobbyDisconnect { connection_id }),
            SocketTarget::Session { addr, .. } => addr.do_send(SessionDisconnect { connection_id }),
        }
        info!("Connection {} closed for {}", self.id, self.user_id);
        Running::Stop
    }
}

impl Handler<Outbound> for ClientSocket {
    type Result = ();

    fn handle(&mut self, msg: Outbound, ctx: &mut Self::Context) {
        match msg {
            Outbound::Text(text) => ctx.text(text),
            Outbound::Close { reason } => {
                ctx.close(Some(ws::CloseReason {
                    code: ws::CloseCode::Normal,
                    description: reason,
                }));
                ctx.stop();
            }
        }
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for ClientSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Text(text)) => {
                self.last_heartbeat = Instant::now();
                match serde_json::from_str::<ClientMessage>(text.as_ref()) {
                    Ok(client_msg) => self.dispatch(client_msg, ctx),
                    Err(e) => {
                        warn!("Error parsing client message on {}: {}", self.id, e);
                        Self::reply_error(ctx, format!("Invalid message format: {e}"));
                    }
                }
            }
            Ok(ws::Message::Binary(_)) => {
                warn!("Binary messages are not supported");
                Self::reply_error(ctx, "Binary messages are not supported");
            }
            Ok(ws::Message::Close(reason)) => {
                debug!("Connection {} closed by client: {:?}", self.id, reason);
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) | Ok(ws::Message::Nop) => {}
            Err(e) => {
                warn!("Protocol error on {}: {}", self.id, e);
                ctx.stop();
            }
        }
    }
}

/// Upgrades the request into a lobby live connection.
pub fn lobby_socket(
    req: &HttpRequest,
    stream: web::Payload,
    user_id: String,
    lobby: Addr<Lobby>,
    config: &Config,
) -> Result<HttpResponse, Error> {
    ws::start(
        ClientSocket::new(user_id, SocketTarget::Lobby(lobby), config),
        req,
        stream,
    )
}

/// Upgrades the request into a session live connection.
pub fn session_socket(
    req: &HttpRequest,
    stream: web::Payload,
    user_id: String,
    session: Addr<GameSession>,
    spectator: bool,
    display_name: Option<String>,
    config: &Config,
) -> Result<HttpResponse, Error> {
    let target = SocketTarget::Session {
        addr: session,
        spectator,
        display_name,
    };
    ws::start(ClientSocket::new(user_id, target, config), req, stream)
}
