//! HTTP event intake
//!
//! Verifies, deduplicates and routes each delivery, then acknowledges before
//! the substantive work runs. Status codes:
//! - 200 for pings, duplicates and kinds nobody handles
//! - 202 once work has been handed to the supervisor
//! - 400 for bodies that do not decode or name an unknown identity
//! - 401 for missing or bad signatures
//! - 503 when the dedup or key store cannot be reached

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

use chorus_core::{Envelope, InboundEvent};

use crate::{AuthError, Authenticator, Deduplicator, EventRouter, TaskSupervisor, SIGNATURE_HEADER, TIMESTAMP_HEADER};

pub const EVENT_ENDPOINT: &str = "/event";
pub const HEALTH_ENDPOINT: &str = "/healthz";

pub struct AppState {
    pub authenticator: Authenticator,
    pub deduplicator: Deduplicator,
    pub router: Arc<EventRouter>,
    pub supervisor: TaskSupervisor,
}

pub fn build_http_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(EVENT_ENDPOINT, post(handle_event))
        .route(HEALTH_ENDPOINT, get(handle_health))
        .with_state(state)
}

async fn handle_health() -> Response {
    (StatusCode::OK, Json(json!({"status": "ok"}))).into_response()
}

fn reject(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({"error": message.into()}))).into_response()
}

fn auth_status(error: &AuthError) -> StatusCode {
    match error {
        AuthError::BadSignature | AuthError::StaleTimestamp => StatusCode::UNAUTHORIZED,
        AuthError::UnknownIdentity(_) | AuthError::Malformed(_) => StatusCode::BAD_REQUEST,
        AuthError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

async fn handle_event(State(state): State<Arc<AppState>>, headers: HeaderMap, body: Bytes) -> Response {
    let (Some(signature), Some(timestamp)) = (header(&headers, SIGNATURE_HEADER), header(&headers, TIMESTAMP_HEADER)) else {
        return reject(StatusCode::UNAUTHORIZED, "missing signature headers");
    };

    let identity = match state.authenticator.verify(&body, timestamp, signature).await {
        Ok(identity) => identity,
        Err(e) => return reject(auth_status(&e), e.to_string()),
    };

    let envelope = match Envelope::decode(&body) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!("Undecodable delivery for {:?}: {}", identity, e);
            return reject(StatusCode::BAD_REQUEST, e.to_string());
        }
    };
    if envelope.event == InboundEvent::Ping {
        return (StatusCode::OK, Json(json!({"type": 1}))).into_response();
    }

    match state.deduplicator.claim(&body).await {
        Ok(true) => {}
        Ok(false) => return (StatusCode::OK, Json(json!({"outcome": "duplicate"}))).into_response(),
        Err(e) => return reject(StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
    }

    let kind = envelope.event.kind();
    let Some(handler) = state.router.handler(kind) else {
        debug!("No handler for {}", kind.as_str());
        return (StatusCode::OK, Json(json!({"outcome": "ignored"}))).into_response();
    };

    state
        .supervisor
        .spawn(kind.as_str(), async move { handler.handle(envelope).await });
    (StatusCode::ACCEPTED, Json(json!({"outcome": "accepted"}))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{build_router, TestBed};
    use chorus_proxy::testing::SERVICE_APP_ID;
    use ed25519_dalek::{Signer, SigningKey};
    use std::net::SocketAddr;
    use std::time::Duration;
    use tokio::net::TcpListener;

    const TIMESTAMP: &str = "1700000000";

    struct Served {
        addr: SocketAddr,
        key: SigningKey,
        supervisor: TaskSupervisor,
    }

    async fn serve(bed: &TestBed) -> Served {
        let key = SigningKey::from_bytes(&[7; 32]);
        let supervisor = TaskSupervisor::new();
        let state = Arc::new(AppState {
            authenticator: Authenticator::new(SERVICE_APP_ID, key.verifying_key(), bed.backends.personas.clone()),
            deduplicator: Deduplicator::new(bed.backends.markers.clone(), "test", Duration::from_secs(10)),
            router: Arc::new(build_router(bed.services.clone())),
            supervisor: supervisor.clone(),
        });

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, build_http_router(state)).await.unwrap();
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        Served { addr, key, supervisor }
    }

    async fn post(served: &Served, body: &str, signer: &SigningKey) -> reqwest::Response {
        let signed = format!("{TIMESTAMP}{body}");
        let signature = hex::encode(signer.sign(signed.as_bytes()).to_bytes());
        reqwest::Client::new()
            .post(format!("http://{}{}", served.addr, EVENT_ENDPOINT))
            .header(SIGNATURE_HEADER, signature)
            .header(TIMESTAMP_HEADER, TIMESTAMP)
            .body(body.to_string())
            .send()
            .await
            .unwrap()
    }

    fn message_create(id: u64, content: &str) -> String {
        json!({
            "type": "MESSAGE_CREATE",
            "data": {
                "id": id.to_string(),
                "channel_id": TestBed::CHANNEL.to_string(),
                "guild_id": TestBed::GUILD.to_string(),
                "author": {"id": TestBed::AUTHOR.to_string(), "username": "author"},
                "content": content,
                "type": 0
            }
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_ping_and_health() {
        let bed = TestBed::new();
        let served = serve(&bed).await;

        let response = post(&served, r#"{"type":1}"#, &served.key).await;
        assert_eq!(response.status(), 200);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["type"], 1);

        let health = reqwest::get(format!("http://{}{}", served.addr, HEALTH_ENDPOINT))
            .await
            .unwrap();
        assert_eq!(health.status(), 200);
    }

    #[tokio::test]
    async fn test_rejects_bad_and_missing_signatures() {
        let bed = TestBed::new();
        let served = serve(&bed).await;

        let stranger = SigningKey::from_bytes(&[9; 32]);
        let response = post(&served, &message_create(600, "s:hi"), &stranger).await;
        assert_eq!(response.status(), 401);

        let response = reqwest::Client::new()
            .post(format!("http://{}{}", served.addr, EVENT_ENDPOINT))
            .body(message_create(600, "s:hi"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 401);
        assert!(bed.platform.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_identity_is_bad_request() {
        let bed = TestBed::new();
        let served = serve(&bed).await;
        let body = json!({"application_id": "31337", "type": 1}).to_string();
        let response = post(&served, &body, &served.key).await;
        assert_eq!(response.status(), 400);
    }

    #[tokio::test]
    async fn test_delivery_is_proxied_end_to_end() {
        let bed = TestBed::new();
        let served = serve(&bed).await;

        let response = post(&served, &message_create(601, "s:hello there"), &served.key).await;
        assert_eq!(response.status(), 202);
        assert!(served.supervisor.drain(Duration::from_secs(2)).await);

        let posted = bed.platform.messages();
        assert_eq!(posted.len(), 1);
        assert_eq!(posted[0].content, "hello there");
        assert_eq!(posted[0].username.as_deref(), Some("Steve"));
        assert_eq!(bed.platform.deleted(), vec![(TestBed::CHANNEL, 601)]);
    }

    #[tokio::test]
    async fn test_redelivery_is_processed_once() {
        let bed = TestBed::new();
        let served = serve(&bed).await;
        let body = message_create(602, "s:once");

        let first = post(&served, &body, &served.key).await;
        let second = post(&served, &body, &served.key).await;
        assert_eq!(first.status(), 202);
        assert_eq!(second.status(), 200);
        let outcome: serde_json::Value = second.json().await.unwrap();
        assert_eq!(outcome["outcome"], "duplicate");

        assert!(served.supervisor.drain(Duration::from_secs(2)).await);
        assert_eq!(bed.platform.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_unrouted_kind_is_ignored() {
        let bed = TestBed::new();
        let key = SigningKey::from_bytes(&[7; 32]);
        let supervisor = TaskSupervisor::new();
        let state = Arc::new(AppState {
            authenticator: Authenticator::new(SERVICE_APP_ID, key.verifying_key(), bed.backends.personas.clone()),
            deduplicator: Deduplicator::new(bed.backends.markers.clone(), "test", Duration::from_secs(10)),
            router: Arc::new(EventRouter::builder().build()),
            supervisor: supervisor.clone(),
        });
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, build_http_router(state)).await.unwrap();
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let served = Served { addr, key, supervisor };
        let response = post(&served, &message_create(603, "s:hi"), &served.key).await;
        assert_eq!(response.status(), 200);
        let outcome: serde_json::Value = response.json().await.unwrap();
        assert_eq!(outcome["outcome"], "ignored");
    }
}
