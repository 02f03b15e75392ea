//! Delivery authentication
//!
//! Deliveries are signed with ed25519 over `timestamp || body`. The key
//! depends on the addressed application: the service's own key, or the key
//! stored on the persona bot the delivery claims to be for.

use chrono::Utc;
use ed25519_dalek::{Signature, VerifyingKey};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use chorus_core::{Envelope, Snowflake};
use chorus_proxy::{SharedPersonaStore, StoreError};

use crate::parse_public_key;

pub const SIGNATURE_HEADER: &str = "x-signature-ed25519";
pub const TIMESTAMP_HEADER: &str = "x-signature-timestamp";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Signature does not verify")]
    BadSignature,

    #[error("Timestamp is outside the accepted window")]
    StaleTimestamp,

    #[error("Delivery is addressed to unknown application {0}")]
    UnknownIdentity(Snowflake),

    #[error("Delivery is malformed: {0}")]
    Malformed(String),

    #[error("Key lookup failed: {0}")]
    Store(#[from] StoreError),
}

/// Who a verified delivery was addressed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Identity {
    Service,
    PersonaBot(Snowflake),
}

pub struct Authenticator {
    application_id: Snowflake,
    service_key: VerifyingKey,
    personas: SharedPersonaStore,
    max_skew: Option<Duration>,
}

impl Authenticator {
    pub fn new(application_id: Snowflake, service_key: VerifyingKey, personas: SharedPersonaStore) -> Self {
        Self {
            application_id,
            service_key,
            personas,
            max_skew: None,
        }
    }

    pub fn with_max_skew(mut self, skew: Duration) -> Self {
        self.max_skew = Some(skew);
        self
    }

    pub async fn verify(&self, body: &[u8], timestamp: &str, signature: &str) -> Result<Identity, AuthError> {
        let claimed = Envelope::claimed_identity(body).map_err(|e| AuthError::Malformed(e.to_string()))?;
        let (identity, key) = self.key_for(claimed).await?;

        let signature: [u8; 64] = hex::decode(signature.trim())
            .ok()
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or(AuthError::BadSignature)?;
        let signature = Signature::from_bytes(&signature);

        let mut message = Vec::with_capacity(timestamp.len() + body.len());
        message.extend_from_slice(timestamp.as_bytes());
        message.extend_from_slice(body);
        if key.verify_strict(&message, &signature).is_err() {
            warn!("Rejected delivery for {:?}: bad signature", identity);
            return Err(AuthError::BadSignature);
        }

        if let Some(skew) = self.max_skew {
            let sent: i64 = timestamp.trim().parse().map_err(|_| AuthError::StaleTimestamp)?;
            let drift = Utc::now().timestamp().abs_diff(sent);
            if drift > skew.as_secs() {
                warn!("Rejected delivery for {:?}: timestamp {}s off", identity, drift);
                return Err(AuthError::StaleTimestamp);
            }
        }

        debug!("Verified delivery for {:?}", identity);
        Ok(identity)
    }

    async fn key_for(&self, claimed: Option<Snowflake>) -> Result<(Identity, VerifyingKey), AuthError> {
        let bot_id = match claimed {
            None => return Ok((Identity::Service, self.service_key)),
            Some(id) if id == self.application_id => return Ok((Identity::Service, self.service_key)),
            Some(id) => id,
        };

        let key = self
            .personas
            .member_by_bot(bot_id)
            .await?
            .and_then(|member| member.bot)
            .and_then(|bot| parse_public_key(&bot.public_key))
            .ok_or(AuthError::UnknownIdentity(bot_id))?;
        Ok((Identity::PersonaBot(bot_id), key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chorus_core::{BotToken, Member, PersonaBot};
    use chorus_proxy::MemoryStore;
    use ed25519_dalek::{Signer, SigningKey};
    use std::sync::Arc;

    const SERVICE: Snowflake = 100;

    fn sign(key: &SigningKey, timestamp: &str, body: &[u8]) -> String {
        let mut message = timestamp.as_bytes().to_vec();
        message.extend_from_slice(body);
        hex::encode(key.sign(&message).to_bytes())
    }

    fn setup() -> (Authenticator, SigningKey, SigningKey) {
        let service = SigningKey::from_bytes(&[1; 32]);
        let persona = SigningKey::from_bytes(&[2; 32]);
        let store = Arc::new(MemoryStore::new());
        let bot = PersonaBot::new(
            200,
            BotToken::new("persona"),
            &hex::encode(persona.verifying_key().to_bytes()),
        );
        store.put_member(Member::new("Steve").with_bot(bot));
        let auth = Authenticator::new(SERVICE, service.verifying_key(), store);
        (auth, service, persona)
    }

    #[tokio::test]
    async fn test_service_and_persona_keys() {
        let (auth, service, persona) = setup();

        let body = br#"{"type":"PING","application_id":"100"}"#;
        let identity = auth.verify(body, "1700000000", &sign(&service, "1700000000", body)).await.unwrap();
        assert_eq!(identity, Identity::Service);

        let body = br#"{"type":"PING","application_id":"200"}"#;
        let identity = auth.verify(body, "1700000000", &sign(&persona, "1700000000", body)).await.unwrap();
        assert_eq!(identity, Identity::PersonaBot(200));

        // the service key does not vouch for a persona bot
        let forged = sign(&service, "1700000000", body);
        assert!(matches!(auth.verify(body, "1700000000", &forged).await, Err(AuthError::BadSignature)));
    }

    #[tokio::test]
    async fn test_rejections() {
        let (auth, service, _) = setup();
        let body = br#"{"type":"PING"}"#;
        let signature = sign(&service, "1700000000", body);

        assert!(matches!(auth.verify(body, "1700000001", &signature).await, Err(AuthError::BadSignature)));
        assert!(matches!(auth.verify(body, "1700000000", "zz").await, Err(AuthError::BadSignature)));
        assert!(matches!(auth.verify(b"not json", "1", &signature).await, Err(AuthError::Malformed(_))));

        let body = br#"{"type":"PING","application_id":"999"}"#;
        let signature = sign(&service, "1700000000", body);
        assert!(matches!(
            auth.verify(body, "1700000000", &signature).await,
            Err(AuthError::UnknownIdentity(999))
        ));
    }

    #[tokio::test]
    async fn test_timestamp_skew() {
        let (auth, service, _) = setup();
        let auth = auth.with_max_skew(Duration::from_secs(60));
        let body = br#"{"type":"PING"}"#;

        let old = "1700000000";
        assert!(matches!(
            auth.verify(body, old, &sign(&service, old, body)).await,
            Err(AuthError::StaleTimestamp)
        ));

        let now = Utc::now().timestamp().to_string();
        assert!(auth.verify(body, &now, &sign(&service, &now, body)).await.is_ok());
    }
}
