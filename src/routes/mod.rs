use actix_web::{web, Error, HttpRequest, HttpResponse, Responder};
use log::info;
use serde::Deserialize;

use crate::auth::Identity;
use crate::error::ServiceError;
use crate::game::session::GetSession;
use crate::lobby::actor::{CancelLobby, GetLobby, JoinLobby};
use crate::lobby::directory::ListLobbies;
use crate::models::*;
use crate::websocket::{lobby_socket, session_socket};

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CreateLobbyRequest {
    pub player: PlayerInfo,
    #[serde(default)]
    pub settings: LobbySettings,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct JoinLobbyRequest {
    pub player: PlayerInfo,
    #[serde(default)]
    pub private_code: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    pub status: Option<LobbyStatus>,
    #[serde(default)]
    pub include_private: bool,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct SessionSocketQuery {
    #[serde(default)]
    pub spectator: bool,
    pub display_name: Option<String>,
}

pub async fn health() -> impl Responder {
    HttpResponse::Ok().body("ok")
}

pub async fn create_lobby(
    state: web::Data<AppState>,
    identity: Identity,
    body: web::Json<CreateLobbyRequest>,
) -> Result<HttpResponse, ServiceError> {
    let CreateLobbyRequest { player, settings } = body.into_inner();
    let created = state.registry.create_lobby(identity.user_id, player, settings)?;
    Ok(HttpResponse::Created().json(created))
}

pub async fn join_lobby(
    state: web::Data<AppState>,
    identity: Identity,
    path: web::Path<String>,
    body: web::Json<JoinLobbyRequest>,
) -> Result<HttpResponse, ServiceError> {
    let JoinLobbyRequest {
        player,
        private_code,
    } = body.into_inner();
    let lobby = state.registry.lobby(&path)?;
    let accepted = lobby
        .send(JoinLobby {
            user_id: identity.user_id,
            player,
            private_code,
        })
        .await??;
    Ok(HttpResponse::Ok().json(accepted))
}

pub async fn cancel_lobby(
    state: web::Data<AppState>,
    identity: Identity,
    path: web::Path<String>,
) -> Result<HttpResponse, ServiceError> {
    let lobby = state.registry.lobby(&path)?;
    lobby
        .send(CancelLobby {
            user_id: identity.user_id,
        })
        .await??;
    Ok(HttpResponse::NoContent().finish())
}

pub async fn list_lobbies(
    state: web::Data<AppState>,
    query: web::Query<ListQuery>,
) -> Result<HttpResponse, ServiceError> {
    let ListQuery {
        status,
        include_private,
    } = query.into_inner();
    let lobbies = state
        .directory
        .send(ListLobbies {
            status,
            include_private,
        })
        .await?;
    Ok(HttpResponse::Ok().json(lobbies))
}

pub async fn get_lobby(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ServiceError> {
    let lobby = state.registry.lobby(&path)?;
    let summary = lobby.send(GetLobby).await?.summary();
    Ok(HttpResponse::Ok().json(summary))
}

pub async fn get_session(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ServiceError> {
    let session = state.registry.session(&path)?;
    let view = session.send(GetSession).await?;
    Ok(HttpResponse::Ok().json(view))
}

pub async fn lobby_ws(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
    identity: Identity,
    path: web::Path<String>,
) -> Result<HttpResponse, Error> {
    let lobby = state.registry.lobby(&path)?;
    info!("Lobby connection request from {} for {}", identity.user_id, path);
    lobby_socket(&req, stream, identity.user_id, lobby, &state.config)
}

pub async fn session_ws(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
    identity: Identity,
    path: web::Path<String>,
    query: web::Query<SessionSocketQuery>,
) -> Result<HttpResponse, Error> {
    let session = state.registry.session(&path)?;
    let SessionSocketQuery {
        spectator,
        display_name,
    } = query.into_inner();
    info!(
        "Session connection request from {} for {} (spectator: {})",
        identity.user_id, path, spectator
    );
    session_socket(
        &req,
        stream,
        identity.user_id,
        session,
        spectator,
        display_name,
        &state.config,
    )
}

/// Configure the HTTP routes
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health))
        .service(
            web::resource("/lobbies")
                .route(web::get().to(list_lobbies))
                .route(web::post().to(create_lobby)),
        )
        .service(
            web::resource("/lobbies/{id}")
                .route(web::get().to(get_lobby))
                .route(web::delete().to(cancel_lobby)),
        )
        .route("/lobbies/{id}/join", web::post().to(join_lobby))
        .route("/lobbies/{id}/ws", web::get().to(lobby_ws))
        .route("/sessions/{id}", web::get().to(get_session))
        .route("/sessions/{id}/ws", web::get().to(session_ws));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{app_state, test_config};
    use actix_web::http::{header, StatusCode};
    use actix_web::{test, App};
    use serde_json::{json, Value};

    fn player_json(name: &str) -> Value {
        json!({"displayName": name, "rating": 1500, "isProvisional": false})
    }

    #[actix_rt::test]
    async fn health_is_ok() {
        let app = test::init_service(App::new().app_data(app_state(test_config())).configure(configure_routes)).await;
        let resp = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
        assert!(resp.status().is_success());
    }

    #[actix_rt::test]
    async fn lobby_lifecycle_over_http() {
        let state = app_state(test_config());
        let app = test::init_service(App::new().app_data(state.clone()).configure(configure_routes)).await;

        let req = test::TestRequest::post()
            .uri("/lobbies")
            .insert_header((header::AUTHORIZATION, "Bearer alice"))
            .set_json(json!({"player": player_json("Alice"), "settings": {"mode": "rapid", "desiredColor": "white"}}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let created: Value = test::read_body_json(resp).await;
        let lobby_id = created["lobbyId"].as_str().unwrap().to_string();
        assert!(created["connectionEndpoint"]
            .as_str()
            .unwrap()
            .ends_with(&format!("/lobbies/{lobby_id}/ws")));

        // Wait for the lobby to list itself.
        state.registry.lobby(&lobby_id).unwrap().send(GetLobby).await.unwrap();
        let req = test::TestRequest::get().uri("/lobbies?status=waiting").to_request();
        let listed: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(listed.as_array().unwrap().len(), 1);
        assert_eq!(listed[0]["settings"]["mode"], "rapid");
        assert_eq!(listed[0]["spectatorCount"], 0);

        let join = |user: &str| {
            test::TestRequest::post()
                .uri(&format!("/lobbies/{lobby_id}/join"))
                .insert_header((header::AUTHORIZATION, format!("Bearer {user}")))
                .set_json(json!({"player": player_json(user)}))
                .to_request()
        };
        let resp = test::call_service(&app, join("bob")).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let accepted: Value = test::read_body_json(resp).await;
        assert_eq!(accepted["assignedColor"], "black");
        assert_eq!(accepted["opponent"]["id"], "alice");

        let resp = test::call_service(&app, join("carol")).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["code"], "lobby_not_waiting");

        let session_id = accepted["sessionId"].as_str().unwrap();
        let req = test::TestRequest::get().uri(&format!("/sessions/{session_id}")).to_request();
        let view: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(view["status"], "waiting");
        assert_eq!(view["mode"], "rapid");
        assert_eq!(view["clock"]["white"]["remainingMs"], 900_000);

        let req = test::TestRequest::get().uri("/lobbies").to_request();
        let listed: Value = test::call_and_read_body_json(&app, req).await;
        assert!(listed.as_array().unwrap().is_empty());
    }

    #[actix_rt::test]
    async fn creator_can_cancel_over_http() {
        let state = app_state(test_config());
        let app = test::init_service(App::new().app_data(state.clone()).configure(configure_routes)).await;
        let created = state
            .registry
            .create_lobby("alice".into(), crate::testing::player("alice", 1200), LobbySettings::default())
            .unwrap();

        let delete = |user: &str| {
            test::TestRequest::delete()
                .uri(&format!("/lobbies/{}", created.lobby_id))
                .insert_header((header::AUTHORIZATION, format!("Bearer {user}")))
                .to_request()
        };
        let resp = test::call_service(&app, delete("mallory")).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        let resp = test::call_service(&app, delete("alice")).await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        let req = test::TestRequest::get()
            .uri(&format!("/lobbies/{}", created.lobby_id))
            .to_request();
        let summary: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(summary["status"], "cancelled");
    }

    #[actix_rt::test]
    async fn unknown_ids_and_missing_identity() {
        let app = test::init_service(App::new().app_data(app_state(test_config())).configure(configure_routes)).await;

        let req = test::TestRequest::get().uri("/lobbies/nope").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
        let req = test::TestRequest::get().uri("/sessions/nope").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);

        let req = test::TestRequest::post()
            .uri("/lobbies")
            .set_json(json!({"player": player_json("anon")}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);
    }

    #[actix_rt::test]
    async fn private_lobbies_are_hidden_unless_requested() {
        let state = app_state(test_config());
        let app = test::init_service(App::new().app_data(state.clone()).configure(configure_routes)).await;
        let settings = LobbySettings {
            is_private: true,
            private_code: Some("k7".into()),
            ..LobbySettings::default()
        };
        let created = state
            .registry
            .create_lobby("alice".into(), crate::testing::player("alice", 1200), settings)
            .unwrap();
        state.registry.lobby(&created.lobby_id).unwrap().send(GetLobby).await.unwrap();

        let req = test::TestRequest::get().uri("/lobbies").to_request();
        let listed: Value = test::call_and_read_body_json(&app, req).await;
        assert!(listed.as_array().unwrap().is_empty());

        let req = test::TestRequest::get().uri("/lobbies?includePrivate=true").to_request();
        let listed: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(listed.as_array().unwrap().len(), 1);
        assert!(!listed.to_string().contains("k7"));
    }
}
