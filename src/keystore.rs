//! In-memory registry of session key pairs
//!
//! Key material lives only as long as the owning [`KeyStore`]; nothing is
//! persisted. Sessions can expire after a configurable TTL, and rotation
//! keeps the old sessions so records sealed under them stay readable until
//! the caller removes them.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{ErrorCategory, ErrorKind, PqsealError, Result};
use crate::kem::{KemProvider, PublicKey, SecretKey};

/// A generated key pair and its bookkeeping.
#[derive(Debug, Clone)]
pub struct KeyPair {
    pub session_id: String,
    pub user_id: String,
    pub public_key: PublicKey,
    pub secret_key: SecretKey,
    pub created_at: DateTime<Utc>,
}

/// Thread-safe session key registry.
pub struct KeyStore {
    kem: Arc<dyn KemProvider>,
    ttl: Option<Duration>,
    sessions: RwLock<HashMap<String, KeyPair>>,
}

impl KeyStore {
    /// Creates an empty store whose sessions never expire.
    pub fn new(kem: Arc<dyn KemProvider>) -> Self {
        Self {
            kem,
            ttl: None,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Creates an empty store whose sessions expire `ttl` after creation.
    pub fn with_ttl(kem: Arc<dyn KemProvider>, ttl: Duration) -> Self {
        Self {
            kem,
            ttl: Some(ttl),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn kem(&self) -> &Arc<dyn KemProvider> {
        &self.kem
    }

    /// Generates and registers a fresh key pair for `user_id`.
    pub fn create_session(&self, user_id: &str) -> Result<String> {
        // Key generation happens outside the lock.
        let (public_key, secret_key) = self.kem.generate_keypair()?;
        let session_id = Uuid::new_v4().to_string();
        let pair = KeyPair {
            session_id: session_id.clone(),
            user_id: user_id.to_string(),
            public_key,
            secret_key,
            created_at: Utc::now(),
        };

        self.sessions.write().insert(session_id.clone(), pair);
        info!(%session_id, user_id, scheme = %self.kem.scheme(), "session created");
        Ok(session_id)
    }

    /// Starts a new session for `user_id`. Earlier sessions remain valid.
    pub fn rotate(&self, user_id: &str) -> Result<String> {
        let session_id = self.create_session(user_id)?;
        debug!(%session_id, user_id, "session rotated");
        Ok(session_id)
    }

    pub fn get_public_key(&self, session_id: &str) -> Result<PublicKey> {
        self.with_live(session_id, |pair| pair.public_key.clone())
    }

    pub fn get_secret_key(&self, session_id: &str) -> Result<SecretKey> {
        self.with_live(session_id, |pair| pair.secret_key.clone())
    }

    /// Returns a copy of the whole entry.
    pub fn get(&self, session_id: &str) -> Result<KeyPair> {
        self.with_live(session_id, KeyPair::clone)
    }

    /// Live session ids belonging to `user_id`, ordered by creation time.
    pub fn sessions_for(&self, user_id: &str) -> Vec<String> {
        let now = Utc::now();
        let sessions = self.sessions.read();
        let mut owned: Vec<&KeyPair> = sessions
            .values()
            .filter(|pair| pair.user_id == user_id && !self.is_expired(pair, now))
            .collect();
        owned.sort_by_key(|pair| pair.created_at);
        owned.into_iter().map(|pair| pair.session_id.clone()).collect()
    }

    /// Drops a session. Returns whether it existed.
    pub fn remove_session(&self, session_id: &str) -> bool {
        let removed = self.sessions.write().remove(session_id).is_some();
        if removed {
            info!(%session_id, "session removed");
        }
        removed
    }

    /// Drops every session that has outlived the TTL. Returns how many.
    pub fn evict_expired(&self) -> usize {
        self.evict_expired_at(Utc::now())
    }

    /// Like [`KeyStore::evict_expired`] with an explicit clock reading.
    pub fn evict_expired_at(&self, now: DateTime<Utc>) -> usize {
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, pair| !self.is_expired(pair, now));
        let evicted = before - sessions.len();
        if evicted > 0 {
            info!(evicted, "expired sessions evicted");
        }
        evicted
    }

    /// Number of stored sessions, including expired ones not yet evicted.
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    fn is_expired(&self, pair: &KeyPair, now: DateTime<Utc>) -> bool {
        match self.ttl {
            Some(ttl) => now - pair.created_at >= ttl,
            None => false,
        }
    }

    fn with_live<T>(&self, session_id: &str, f: impl FnOnce(&KeyPair) -> T) -> Result<T> {
        let sessions = self.sessions.read();
        match sessions.get(session_id) {
            Some(pair) if !self.is_expired(pair, Utc::now()) => Ok(f(pair)),
            Some(_) => Err(PqsealError::with_kind(
                ErrorCategory::User,
                ErrorKind::UnknownSession,
                format!("session {} has expired", session_id),
            )),
            None => Err(PqsealError::with_kind(
                ErrorCategory::User,
                ErrorKind::UnknownSession,
                format!("unknown session {}", session_id),
            )),
        }
    }
}

impl std::fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyStore")
            .field("scheme", &self.kem.scheme())
            .field("ttl", &self.ttl)
            .field("sessions", &self.len())
            .finish()
    }
}
