use std::sync::Arc;

use jsonwebtoken::{DecodingKey, Validation, decode};
use tokio::sync::watch;
use tracing::{info, warn};
use uuid::Uuid;

use foundit_types::api::Claims;

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentUser {
    pub id: Uuid,
    pub email: String,
    pub full_name: Option<String>,
}

impl From<Claims> for CurrentUser {
    fn from(claims: Claims) -> Self {
        Self {
            id: claims.sub,
            email: claims.email,
            full_name: claims.full_name,
        }
    }
}

/// Who is signed in. Cheap to clone; all clones share one state and see the
/// same auth-state changes.
///
/// Views take a `&Session` when they activate and from then on pass the user
/// id explicitly to every query.
#[derive(Clone)]
pub struct Session {
    tx: Arc<watch::Sender<Option<CurrentUser>>>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    /// A signed-out session.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    pub fn signed_in(user: CurrentUser) -> Self {
        let session = Self::new();
        session.sign_in(user);
        session
    }

    pub fn sign_in(&self, user: CurrentUser) {
        info!("{} ({}) signed in", user.email, user.id);
        self.tx.send_replace(Some(user));
    }

    /// Validate an HS256 session token from the identity provider and sign in
    /// as its subject. An invalid or expired token leaves the session as it
    /// was.
    pub fn sign_in_with_token(&self, token: &str, secret: &str) -> Result<CurrentUser> {
        let token_data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|e| {
            warn!("Rejected session token: {}", e);
            SyncError::Unauthenticated
        })?;

        let user = CurrentUser::from(token_data.claims);
        self.sign_in(user.clone());
        Ok(user)
    }

    /// [`Session::sign_in_with_token`] against the configured secret.
    pub fn sign_in_with_config(&self, config: &SyncConfig, token: &str) -> Result<CurrentUser> {
        self.sign_in_with_token(token, &config.jwt_secret)
    }

    pub fn sign_out(&self) {
        if let Some(user) = self.tx.send_replace(None) {
            info!("{} ({}) signed out", user.email, user.id);
        }
    }

    pub fn current_user(&self) -> Option<CurrentUser> {
        self.tx.borrow().clone()
    }

    pub fn current_user_id(&self) -> Option<Uuid> {
        self.tx.borrow().as_ref().map(|u| u.id)
    }

    pub fn require_user_id(&self) -> Result<Uuid> {
        self.current_user_id().ok_or(SyncError::Unauthenticated)
    }

    /// Auth-state notifications. The receiver starts with the current value
    /// marked as seen.
    pub fn changes(&self) -> watch::Receiver<Option<CurrentUser>> {
        self.tx.subscribe()
    }
}
