// ============================
// crates/backend-lib/src/identity.rs
// ============================
//! Bearer credential handling.
//!
//! The server never authenticates users itself; it exchanges an opaque bearer
//! token for a user id through an [`IdentityService`]. [`TokenIdentity`] is the
//! in-process implementation that also issues tokens.
use crate::error::AppError;
use crate::validation;
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use eventroom_common::UserId;
use rand::RngCore;
use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, SystemTime},
};
use tokio::{sync::RwLock, task::JoinHandle};

/// 32 bytes = 256 bits of entropy
const TOKEN_BYTES: usize = 32;

/// How often expired tokens are purged
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 10);

#[async_trait]
pub trait IdentityService: Send + Sync {
    /// Resolve a bearer credential to the user it was issued for
    async fn resolve(&self, token: &str) -> Option<UserId>;

    /// Issue a credential for a user
    async fn issue(&self, _user_id: &str) -> Result<String, AppError> {
        Err(AppError::Forbidden(
            "Token issuance is not supported by this identity service".to_string(),
        ))
    }
}

/// Random URL-safe token
pub fn generate_token() -> String {
    let mut buffer = [0u8; TOKEN_BYTES];
    rand::rng().fill_bytes(&mut buffer);
    URL_SAFE_NO_PAD.encode(buffer)
}

#[derive(Clone, Debug)]
struct Grant {
    user_id: UserId,
    expires_at: SystemTime,
}

/// In-memory token store with a fixed lifetime per token
#[derive(Clone)]
pub struct TokenIdentity {
    grants: Arc<RwLock<HashMap<String, Grant>>>,
    ttl: Duration,
}

impl TokenIdentity {
    pub fn new(ttl: Duration) -> Self {
        Self {
            grants: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    /// Spawn the task that periodically purges expired tokens
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let identity = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = identity.sweep().await;
                if removed > 0 {
                    tracing::debug!(removed, "purged expired tokens");
                }
            }
        })
    }

    /// Drop expired tokens; returns how many were removed
    pub async fn sweep(&self) -> usize {
        let now = SystemTime::now();
        let mut grants = self.grants.write().await;
        let before = grants.len();
        grants.retain(|_, grant| now < grant.expires_at);
        before - grants.len()
    }

    pub async fn revoke(&self, token: &str) -> bool {
        self.grants.write().await.remove(token).is_some()
    }
}

#[async_trait]
impl IdentityService for TokenIdentity {
    async fn resolve(&self, token: &str) -> Option<UserId> {
        let grants = self.grants.read().await;
        grants
            .get(token)
            .filter(|grant| SystemTime::now() < grant.expires_at)
            .map(|grant| grant.user_id.clone())
    }

    async fn issue(&self, user_id: &str) -> Result<String, AppError> {
        let user_id = validation::validate_user_id(user_id)?;
        let token = generate_token();
        let grant = Grant {
            user_id: user_id.to_string(),
            expires_at: SystemTime::now() + self.ttl,
        };
        self.grants.write().await.insert(token.clone(), grant);
        tracing::debug!(%user_id, "token issued");
        Ok(token)
    }
}
