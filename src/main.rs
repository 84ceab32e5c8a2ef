use actix::Actor;
use actix_web::{web, App, HttpServer};
use log::{info, warn};
use std::io;
use std::sync::Arc;

mod auth;
mod config;
mod error;
mod game;
mod lobby;
mod models;
mod registry;
mod routes;
mod storage;
#[cfg(test)]
mod testing;
mod websocket;

use auth::TrustedGatewayVerifier;
use config::Config;
use lobby::directory::LobbyDirectory;
use models::AppState;
use registry::Registry;
use storage::{FileStorage, MemoryStorage, Storage};

#[actix_web::main]
async fn main() -> io::Result<()> {
    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = Config::from_env().map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let config = Arc::new(config);

    let storage: Arc<dyn Storage> = match &config.data_dir {
        Some(dir) => {
            info!("Persisting lobbies and sessions under {}", dir.display());
            Arc::new(FileStorage::open(dir.clone()).map_err(|e| io::Error::new(io::ErrorKind::Other, e))?)
        }
        None => {
            warn!("CHESS_DATA_DIR is not set, state will not survive a restart");
            Arc::new(MemoryStorage::new())
        }
    };

    let directory = LobbyDirectory::new().start();
    let registry = Registry::new(Arc::clone(&config), storage, directory.clone().recipient());
    let recovered = registry
        .recover()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
    info!(
        "Recovered {} lobbies and {} sessions ({} terminal, retiring)",
        recovered.lobbies, recovered.sessions, recovered.retiring
    );

    // Create shared application state
    let app_state = web::Data::new(AppState {
        config: Arc::clone(&config),
        registry,
        directory,
        verifier: Arc::new(TrustedGatewayVerifier),
    });

    info!("Starting chess match server at http://{}", config.bind_addr);

    HttpServer::new(move || {
        App::new()
            .app_data(app_state.clone())
            .configure(routes::configure_routes)
    })
    .bind(config.bind_addr.as_str())?
    .run()
    .await
}
