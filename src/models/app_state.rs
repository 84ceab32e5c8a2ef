use actix::Addr;
use std::sync::Arc;

use crate::auth::CredentialVerifier;
use crate::config::Config;
use crate::lobby::directory::LobbyDirectory;
use crate::registry::Registry;

/// Application state shared between request handlers
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<Registry>,
    pub directory: Addr<LobbyDirectory>,
    pub verifier: Arc<dyn CredentialVerifier>,
}
