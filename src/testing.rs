//! Test doubles shared by the actor and route tests.

use actix::prelude::*;
use actix_web::web;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::auth::TrustedGatewayVerifier;
use crate::config::Config;
use crate::game::session::GameSession;
use crate::lobby::actor::Lobby;
use crate::lobby::directory::{DirectoryUpdate, LobbyDirectory};
use crate::models::*;
use crate::registry::Registry;
use crate::storage::MemoryStorage;

/// Records every frame and directory update it receives.
#[derive(Default)]
pub struct Probe {
    frames: Vec<Outbound>,
    updates: Vec<DirectoryUpdate>,
}

impl Actor for Probe {
    type Context = Context<Self>;
}

impl Handler<Outbound> for Probe {
    type Result = ();

    fn handle(&mut self, msg: Outbound, _ctx: &mut Context<Self>) {
        self.frames.push(msg);
    }
}

impl Handler<DirectoryUpdate> for Probe {
    type Result = ();

    fn handle(&mut self, msg: DirectoryUpdate, _ctx: &mut Context<Self>) {
        self.updates.push(msg);
    }
}

#[derive(Message)]
#[rtype(result = "Vec<Outbound>")]
pub struct TakeFrames;

impl Handler<TakeFrames> for Probe {
    type Result = MessageResult<TakeFrames>;

    fn handle(&mut self, _msg: TakeFrames, _ctx: &mut Context<Self>) -> Self::Result {
        MessageResult(std::mem::take(&mut self.frames))
    }
}

#[derive(Message)]
#[rtype(result = "Vec<DirectoryUpdate>")]
pub struct TakeUpdates;

impl Handler<TakeUpdates> for Probe {
    type Result = MessageResult<TakeUpdates>;

    fn handle(&mut self, _msg: TakeUpdates, _ctx: &mut Context<Self>) -> Self::Result {
        MessageResult(std::mem::take(&mut self.updates))
    }
}

pub fn connection(probe: &Addr<Probe>) -> Connection {
    Connection::new(Uuid::new_v4(), probe.clone().recipient())
}

/// Frames received so far; anything sent before this call is included.
pub async fn take_frames(probe: &Addr<Probe>) -> Vec<Outbound> {
    probe.send(TakeFrames).await.unwrap()
}

pub fn texts(frames: &[Outbound]) -> Vec<serde_json::Value> {
    frames
        .iter()
        .filter_map(|f| match f {
            Outbound::Text(text) => Some(serde_json::from_str(text).unwrap()),
            Outbound::Close { .. } => None,
        })
        .collect()
}

pub fn event_types(frames: &[Outbound]) -> Vec<String> {
    texts(frames)
        .iter()
        .map(|e| e["type"].as_str().unwrap_or_default().to_string())
        .collect()
}

pub fn player(name: &str, rating: i32) -> PlayerInfo {
    PlayerInfo {
        display_name: name.to_string(),
        rating,
        is_provisional: false,
    }
}

/// Timers long enough not to fire unless a test shortens them.
pub fn test_config() -> Config {
    Config {
        lobby_wait_timeout: Duration::from_secs(30),
        abandonment_grace: Duration::from_secs(30),
        terminal_retention: Duration::from_secs(30),
        ..Config::default()
    }
}

/// A registry over in-memory storage whose directory is a `Probe`.
pub struct Harness {
    pub registry: Arc<Registry>,
    pub directory: Addr<Probe>,
    storage: Arc<MemoryStorage>,
    config: Config,
}

impl Harness {
    pub fn new(config: Config) -> Self {
        Self::over(config, Arc::new(MemoryStorage::new()))
    }

    fn over(config: Config, storage: Arc<MemoryStorage>) -> Self {
        let directory = Probe::default().start();
        let registry = Registry::new(
            Arc::new(config.clone()),
            storage.clone(),
            directory.clone().recipient(),
        );
        Self {
            registry,
            directory,
            storage,
            config,
        }
    }

    /// A fresh registry over the same storage, as after a process restart.
    pub fn restart(&self) -> Self {
        Self::over(self.config.clone(), Arc::clone(&self.storage))
    }

    pub fn create_lobby(&self, creator: &str, settings: LobbySettings) -> (String, Addr<Lobby>) {
        let created = self
            .registry
            .create_lobby(creator.to_string(), player(creator, 1500), settings)
            .unwrap();
        let addr = self.registry.lobby(&created.lobby_id).unwrap();
        (created.lobby_id, addr)
    }

    pub fn launch_session(&self, init: SessionInit) -> Addr<GameSession> {
        let id = init.session_id.clone();
        self.registry.launch_session(init).unwrap();
        self.registry.session(&id).unwrap()
    }

    pub async fn directory_updates(&self) -> Vec<DirectoryUpdate> {
        self.directory.send(TakeUpdates).await.unwrap()
    }
}

/// Full application state with a real directory, for extractor and route tests.
pub fn app_state(config: Config) -> web::Data<AppState> {
    let config = Arc::new(config);
    let directory = LobbyDirectory::new().start();
    let registry = Registry::new(
        Arc::clone(&config),
        Arc::new(MemoryStorage::new()),
        directory.clone().recipient(),
    );
    web::Data::new(AppState {
        config,
        registry,
        directory,
        verifier: Arc::new(TrustedGatewayVerifier),
    })
}
