//! Identity-based routing: maps a lobby or session id to its single live
//! actor, rehydrating it from storage when it is not resident.

use actix::{Actor, Addr, Recipient};
use chrono::{DateTime, Utc};
use log::{info, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use uuid::Uuid;

use crate::config::Config;
use crate::error::ServiceError;
use crate::game::session::GameSession;
use crate::game::utils::parse_position;
use crate::lobby::actor::Lobby;
use crate::lobby::directory::DirectoryUpdate;
use crate::models::{
    LobbyCreated, LobbySettings, LobbyState, PlayerInfo, SessionInit, SessionState, SessionStatus,
};
use crate::storage::{load_json, lobby_key, save_json, session_key, Storage, StorageError};

pub struct Registry {
    config: Arc<Config>,
    storage: Arc<dyn Storage>,
    directory: Recipient<DirectoryUpdate>,
    lobbies: Mutex<HashMap<String, Addr<Lobby>>>,
    sessions: Mutex<HashMap<String, Addr<GameSession>>>,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct Recovered {
    pub lobbies: usize,
    pub sessions: usize,
    /// Terminal entities brought back only to sit out their retention window.
    pub retiring: usize,
}

pub fn after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    now + chrono::Duration::milliseconds(delay.as_millis() as i64)
}

impl Registry {
    pub fn new(
        config: Arc<Config>,
        storage: Arc<dyn Storage>,
        directory: Recipient<DirectoryUpdate>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            storage,
            directory,
            lobbies: Mutex::new(HashMap::new()),
            sessions: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn storage(&self) -> &dyn Storage {
        self.storage.as_ref()
    }

    pub fn directory(&self) -> &Recipient<DirectoryUpdate> {
        &self.directory
    }

    /// `Lobby.create`: persist a waiting lobby and bring its actor up. The
    /// actor arms the wait-timeout and lists itself once started.
    pub fn create_lobby(
        self: &Arc<Self>,
        creator_id: String,
        creator: PlayerInfo,
        settings: LobbySettings,
    ) -> Result<LobbyCreated, ServiceError> {
        if creator_id.trim().is_empty() {
            return Err(ServiceError::InvalidRequest("creator id is required".into()));
        }
        if settings.is_private && settings.private_code.as_deref().map_or(true, str::is_empty) {
            return Err(ServiceError::InvalidRequest(
                "private lobbies need a private code".into(),
            ));
        }
        if let Some(fen) = settings.opening_start_fen.as_deref() {
            parse_position(Some(fen))?;
        }

        let now = Utc::now();
        let id = Uuid::new_v4().to_string();
        let state = LobbyState::new(
            id.clone(),
            creator_id,
            creator,
            settings,
            now,
            after(now, self.config.lobby_wait_timeout),
        );
        save_json(self.storage(), &lobby_key(&id), &state)?;

        let addr = Lobby::new(state, Arc::clone(self)).start();
        self.lock_lobbies().insert(id.clone(), addr);
        info!("Lobby {} created", id);

        Ok(LobbyCreated {
            connection_endpoint: self.config.lobby_endpoint(&id),
            lobby_id: id,
        })
    }

    /// Resident lobby actor for `id`, rehydrated from storage if needed.
    pub fn lobby(self: &Arc<Self>, id: &str) -> Result<Addr<Lobby>, ServiceError> {
        let mut lobbies = self.lock_lobbies();
        if let Some(addr) = lobbies.get(id).filter(|a| a.connected()) {
            return Ok(addr.clone());
        }
        let state: LobbyState =
            load_json(self.storage(), &lobby_key(id))?.ok_or(ServiceError::LobbyNotFound)?;
        info!("Rehydrating lobby {} ({:?})", id, state.status);
        let addr = Lobby::new(state, Arc::clone(self)).start();
        lobbies.insert(id.to_string(), addr.clone());
        Ok(addr)
    }

    /// Resident session actor for `id`, rehydrated from storage if needed.
    pub fn session(self: &Arc<Self>, id: &str) -> Result<Addr<GameSession>, ServiceError> {
        let mut sessions = self.lock_sessions();
        if let Some(addr) = sessions.get(id).filter(|a| a.connected()) {
            return Ok(addr.clone());
        }
        let mut state: SessionState =
            load_json(self.storage(), &session_key(id))?.ok_or(ServiceError::SessionNotFound)?;
        state.detach_all();
        info!("Rehydrating session {} ({:?})", id, state.status);
        let addr = GameSession::new(state, Arc::clone(self)).start();
        sessions.insert(id.to_string(), addr.clone());
        Ok(addr)
    }

    /// `GameSession.init`: create the session once and return its endpoint.
    /// Launching an id that already exists is a no-op.
    pub fn launch_session(self: &Arc<Self>, init: SessionInit) -> Result<String, ServiceError> {
        let id = init.session_id.clone();
        let endpoint = self.config.session_endpoint(&id);

        let exists = self.lock_sessions().contains_key(&id)
            || self.storage.get(&session_key(&id))?.is_some();
        if exists {
            self.session(&id)?;
            return Ok(endpoint);
        }

        let state = SessionState::new(init, Utc::now())?;
        save_json(self.storage(), &session_key(&id), &state)?;
        let addr = GameSession::new(state, Arc::clone(self)).start();
        self.lock_sessions().insert(id.clone(), addr);
        info!("Game session {} created", id);
        Ok(endpoint)
    }

    pub(crate) fn release_lobby(&self, id: &str, addr: &Addr<Lobby>) {
        let mut lobbies = self.lock_lobbies();
        if lobbies.get(id) == Some(addr) {
            lobbies.remove(id);
        }
    }

    pub(crate) fn release_session(&self, id: &str, addr: &Addr<GameSession>) {
        let mut sessions = self.lock_sessions();
        if sessions.get(id) == Some(addr) {
            sessions.remove(id);
        }
    }

    /// Re-spawns every entity found in storage. Live ones re-arm their timers
    /// from the persisted fire-at instants; terminal ones schedule their
    /// retirement, which also deletes their snapshot.
    pub fn recover(self: &Arc<Self>) -> Result<Recovered, StorageError> {
        let mut recovered = Recovered::default();

        for key in self.storage.keys("lobby/")? {
            match load_json::<LobbyState>(self.storage(), &key) {
                Ok(Some(state)) => {
                    if state.status.is_terminal() {
                        recovered.retiring += 1;
                    } else {
                        recovered.lobbies += 1;
                    }
                    let id = state.id.clone();
                    let addr = Lobby::new(state, Arc::clone(self)).start();
                    self.lock_lobbies().insert(id, addr);
                }
                Ok(None) => {}
                Err(e) => warn!("Skipping unreadable snapshot {}: {}", key, e),
            }
        }

        for key in self.storage.keys("session/")? {
            match load_json::<SessionState>(self.storage(), &key) {
                Ok(Some(mut state)) => {
                    if state.status == SessionStatus::Finished {
                        recovered.retiring += 1;
                    } else {
                        recovered.sessions += 1;
                    }
                    state.detach_all();
                    let id = state.id.clone();
                    let addr = GameSession::new(state, Arc::clone(self)).start();
                    self.lock_sessions().insert(id, addr);
                }
                Ok(None) => {}
                Err(e) => warn!("Skipping unreadable snapshot {}: {}", key, e),
            }
        }

        Ok(recovered)
    }

    fn lock_lobbies(&self) -> std::sync::MutexGuard<'_, HashMap<String, Addr<Lobby>>> {
        self.lobbies.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_sessions(&self) -> std::sync::MutexGuard<'_, HashMap<String, Addr<GameSession>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
