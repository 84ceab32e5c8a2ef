use actix_web::dev::Payload;
use actix_web::http::header;
use actix_web::{web, FromRequest, HttpRequest};
use serde::Deserialize;
use std::future::{ready, Ready};

use crate::error::ServiceError;
use crate::models::AppState;

/// Turns a presented credential into a verified user id.
pub trait CredentialVerifier: Send + Sync {
    fn verify(&self, credential: &str) -> Result<String, ServiceError>;
}

/// For deployments behind a gateway that has already authenticated the
/// caller: the credential is the user id.
pub struct TrustedGatewayVerifier;

impl CredentialVerifier for TrustedGatewayVerifier {
    fn verify(&self, credential: &str) -> Result<String, ServiceError> {
        let user_id = credential.trim();
        if user_id.is_empty() {
            return Err(ServiceError::Unauthorized);
        }
        Ok(user_id.to_string())
    }
}

/// Verified caller of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
}

#[derive(Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

fn bearer(req: &HttpRequest) -> Option<String> {
    req.headers()
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(|c| c.trim().to_string())
}

// Browsers cannot set headers on websocket upgrades.
fn query_token(req: &HttpRequest) -> Option<String> {
    web::Query::<TokenQuery>::from_query(req.query_string())
        .ok()?
        .into_inner()
        .token
}

fn identify(req: &HttpRequest) -> Result<Identity, ServiceError> {
    let state = req
        .app_data::<web::Data<AppState>>()
        .ok_or_else(|| ServiceError::Unavailable("application state is not configured".into()))?;
    let credential = bearer(req)
        .or_else(|| query_token(req))
        .ok_or(ServiceError::Unauthorized)?;
    let user_id = state.verifier.verify(&credential)?;
    Ok(Identity { user_id })
}

impl FromRequest for Identity {
    type Error = ServiceError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(identify(req))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{app_state, test_config};
    use actix_web::test::TestRequest;

    #[test]
    fn gateway_verifier_rejects_blank_credentials() {
        assert_eq!(TrustedGatewayVerifier.verify(" alice ").unwrap(), "alice");
        assert_eq!(TrustedGatewayVerifier.verify("  ").unwrap_err(), ServiceError::Unauthorized);
    }

    #[actix_rt::test]
    async fn identity_from_bearer_header() {
        let req = TestRequest::default()
            .insert_header((header::AUTHORIZATION, "Bearer alice"))
            .app_data(app_state(test_config()))
            .to_http_request();
        let identity = Identity::extract(&req).await.unwrap();
        assert_eq!(identity.user_id, "alice");
    }

    #[actix_rt::test]
    async fn identity_from_query_token() {
        let req = TestRequest::with_uri("/lobbies/x/ws?token=bob")
            .app_data(app_state(test_config()))
            .to_http_request();
        assert_eq!(Identity::extract(&req).await.unwrap().user_id, "bob");
    }

    #[actix_rt::test]
    async fn missing_credential_is_unauthorized() {
        let req = TestRequest::default()
            .app_data(app_state(test_config()))
            .to_http_request();
        assert_eq!(Identity::extract(&req).await.unwrap_err(), ServiceError::Unauthorized);
    }
}
