//! Public entry point: sealing and opening structured payloads
//!
//! [`Crypto`] composes a [`KemProvider`], the AES-GCM envelope cipher and
//! the codec. Encryption always produces the current sealed format.
//! Decryption also accepts every historical blob format the codec knows,
//! so callers can hand it whatever was stored.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Duration;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::cipher;
use crate::codec;
use crate::config::{CryptoConfig, KeyMode};
use crate::error::{ErrorCategory, ErrorKind, PqsealError, Result};
use crate::kem::{DemoKem, KemProvider, KemScheme, PublicKey, SecretKey, WrappedKey};
use crate::keystore::KeyStore;

/// Plaintext domain object: a JSON mapping with string keys.
pub type Payload = serde_json::Map<String, Value>;

/// The two strings stored for one encrypted payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedRecord {
    pub encrypted_blob: String,
    pub wrapped_key: String,
}

/// Several independently encrypted sections nested inside one outer
/// envelope. The per-section wrapped keys travel next to the outer blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NestedRecord {
    pub encrypted_blob: String,
    pub wrapped_key: String,
    #[serde(default)]
    pub section_keys: BTreeMap<String, String>,
}

enum KeySource {
    Fixed {
        public_key: PublicKey,
        secret_key: SecretKey,
    },
    Session {
        store: Arc<KeyStore>,
        owner: String,
        active: RwLock<String>,
    },
}

pub struct Crypto {
    kem: Arc<dyn KemProvider>,
    keys: KeySource,
}

impl std::fmt::Debug for Crypto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mode = match &self.keys {
            KeySource::Fixed { .. } => "fixed",
            KeySource::Session { .. } => "session",
        };
        f.debug_struct("Crypto")
            .field("scheme", &self.kem.scheme())
            .field("key_mode", &mode)
            .finish()
    }
}

fn serialization_error(msg: impl Into<String>, source: serde_json::Error) -> PqsealError {
    PqsealError::with_kind_and_source(
        ErrorCategory::User,
        ErrorKind::SerializationFailure,
        msg,
        source,
    )
}

fn into_payload(value: Value) -> Result<Payload> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(PqsealError::with_kind(
            ErrorCategory::User,
            ErrorKind::SerializationFailure,
            format!("expected a JSON mapping, got {}", json_type(&other)),
        )),
    }
}

fn has_wrapped_key(wrapped_key: &str) -> bool {
    codec::decode_wrapped_key(wrapped_key).is_ok_and(|bytes| !bytes.is_empty())
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "a mapping",
    }
}

impl Crypto {
    /// Builds the service described by `config`.
    pub fn from_config(config: &CryptoConfig) -> Result<Self> {
        config.validate()?;
        let kem: Arc<dyn KemProvider> = Arc::from(config.scheme.provider());

        match &config.key_mode {
            KeyMode::Fixed if config.scheme == KemScheme::Demo => Ok(Self::legacy_demo()),
            KeyMode::Fixed => {
                let (public_key, secret_key) = kem.generate_keypair()?;
                Ok(Self::fixed(kem, public_key, secret_key))
            }
            KeyMode::Session { owner } => {
                let store = match config.session_ttl_secs {
                    Some(secs) => {
                        let ttl = i64::try_from(secs)
                            .ok()
                            .and_then(Duration::try_seconds)
                            .ok_or_else(|| {
                                PqsealError::new(ErrorCategory::User, "session TTL out of range")
                            })?;
                        KeyStore::with_ttl(Arc::clone(&kem), ttl)
                    }
                    None => KeyStore::new(Arc::clone(&kem)),
                };
                Self::with_session(Arc::new(store), owner)
            }
        }
    }

    /// Uses one key pair for every operation.
    pub fn fixed(kem: Arc<dyn KemProvider>, public_key: PublicKey, secret_key: SecretKey) -> Self {
        Self {
            kem,
            keys: KeySource::Fixed {
                public_key,
                secret_key,
            },
        }
    }

    /// Demo KEM under the bundled key pair, compatible with records from
    /// early deployments. Provides no confidentiality.
    pub fn legacy_demo() -> Self {
        warn!("using the bundled demo key pair; records are not confidential");
        let (public_key, secret_key) = DemoKem::bundled_keypair();
        Self::fixed(Arc::new(DemoKem), public_key, secret_key)
    }

    /// Draws keys from `store`, starting with a new session for `owner`.
    pub fn with_session(store: Arc<KeyStore>, owner: &str) -> Result<Self> {
        let session_id = store.create_session(owner)?;
        Ok(Self {
            kem: Arc::clone(store.kem()),
            keys: KeySource::Session {
                store,
                owner: owner.to_string(),
                active: RwLock::new(session_id),
            },
        })
    }

    pub fn scheme(&self) -> KemScheme {
        self.kem.scheme()
    }

    pub fn key_store(&self) -> Option<&Arc<KeyStore>> {
        match &self.keys {
            KeySource::Session { store, .. } => Some(store),
            KeySource::Fixed { .. } => None,
        }
    }

    /// The session new records are sealed under, in session mode.
    pub fn active_session(&self) -> Option<String> {
        match &self.keys {
            KeySource::Session { active, .. } => Some(active.read().clone()),
            KeySource::Fixed { .. } => None,
        }
    }

    /// Starts a new session and seals subsequent records under it. Records
    /// sealed under earlier sessions stay readable via
    /// [`Crypto::decrypt_for_session`] until those sessions are removed.
    pub fn rotate(&self) -> Result<String> {
        match &self.keys {
            KeySource::Session {
                store,
                owner,
                active,
            } => {
                let session_id = store.rotate(owner)?;
                *active.write() = session_id.clone();
                Ok(session_id)
            }
            KeySource::Fixed { .. } => Err(PqsealError::new(
                ErrorCategory::User,
                "a fixed key pair cannot be rotated",
            )),
        }
    }

    fn store(&self) -> Result<&Arc<KeyStore>> {
        self.key_store().ok_or_else(|| {
            PqsealError::with_kind(
                ErrorCategory::User,
                ErrorKind::UnknownSession,
                "no session store configured",
            )
        })
    }

    /// Public key new records are sealed under. An active session that has
    /// expired or been removed is replaced by a fresh one for the same owner.
    fn public_key(&self) -> Result<PublicKey> {
        match &self.keys {
            KeySource::Fixed { public_key, .. } => Ok(public_key.clone()),
            KeySource::Session {
                store,
                owner,
                active,
            } => {
                let current = active.read().clone();
                match store.get_public_key(&current) {
                    Err(e) if e.kind == Some(ErrorKind::UnknownSession) => {
                        let mut active = active.write();
                        // Another caller may have renewed it while we waited.
                        if *active == current {
                            *active = store.rotate(owner)?;
                            info!(expired = %current, renewed = %active.as_str(), "active session renewed");
                        }
                        store.get_public_key(&active)
                    }
                    other => other,
                }
            }
        }
    }

    fn secret_key(&self) -> Result<SecretKey> {
        match &self.keys {
            KeySource::Fixed { secret_key, .. } => Ok(secret_key.clone()),
            KeySource::Session { store, active, .. } => store.get_secret_key(&active.read()),
        }
    }

    /// Seals a payload, returning the blob and wrapped key to store.
    pub fn encrypt(&self, payload: &Payload) -> Result<EncryptedRecord> {
        let public_key = self.public_key()?;
        self.seal_payload(&public_key, payload)
    }

    /// Seals any value that serializes to a JSON mapping.
    pub fn encrypt_value<T: Serialize + ?Sized>(&self, value: &T) -> Result<EncryptedRecord> {
        let value = serde_json::to_value(value)
            .map_err(|e| serialization_error(format!("payload is not serializable: {}", e), e))?;
        self.encrypt(&into_payload(value)?)
    }

    /// Seals a payload under an explicit session's public key.
    pub fn encrypt_for_session(&self, session_id: &str, payload: &Payload) -> Result<EncryptedRecord> {
        let public_key = self.store()?.get_public_key(session_id)?;
        self.seal_payload(&public_key, payload)
    }

    fn seal_payload(&self, public_key: &PublicKey, payload: &Payload) -> Result<EncryptedRecord> {
        let (wrapped_key, shared_secret) = self.kem.encapsulate(public_key)?;
        let plaintext = Zeroizing::new(
            serde_json::to_vec(payload)
                .map_err(|e| serialization_error("failed to serialize payload", e))?,
        );
        let envelope = cipher::seal(&plaintext, shared_secret.as_bytes())?;
        debug!(scheme = %self.kem.scheme(), bytes = plaintext.len(), "payload sealed");

        Ok(EncryptedRecord {
            encrypted_blob: codec::encode(&envelope),
            wrapped_key: codec::encode_wrapped_key(wrapped_key.as_bytes()),
        })
    }

    /// Recovers a payload from a stored blob and wrapped key.
    ///
    /// `blob` is normally a string. Structured values are returned as they
    /// are, and strings in any legacy format go through the codec's
    /// fallback chain, in which case the wrapped key is not consulted.
    pub fn decrypt(&self, blob: &Value, wrapped_key: &str) -> Result<Payload> {
        self.open_payload(blob, wrapped_key, || self.secret_key())
    }

    /// [`Crypto::decrypt`] for a record produced by [`Crypto::encrypt`].
    pub fn decrypt_record(&self, record: &EncryptedRecord) -> Result<Payload> {
        self.decrypt(
            &Value::String(record.encrypted_blob.clone()),
            &record.wrapped_key,
        )
    }

    /// Like [`Crypto::decrypt`], using an explicit session's secret key.
    pub fn decrypt_for_session(
        &self,
        session_id: &str,
        blob: &Value,
        wrapped_key: &str,
    ) -> Result<Payload> {
        let store = self.store()?;
        self.open_payload(blob, wrapped_key, || store.get_secret_key(session_id))
    }

    fn open_payload(
        &self,
        blob: &Value,
        wrapped_key: &str,
        secret_key: impl FnOnce() -> Result<SecretKey>,
    ) -> Result<Payload> {
        let Value::String(text) = blob else {
            return into_payload(codec::decode(blob)?);
        };
        let Some(envelope) = codec::sealed_envelope(text) else {
            debug!("blob is not a sealed envelope, trying legacy formats");
            let value = codec::decode(blob).map_err(|e| match e.kind {
                // A key was stored next to it, so this was meant to be an
                // envelope and the text itself has been damaged.
                Some(ErrorKind::DecodingExhausted) if has_wrapped_key(wrapped_key) => {
                    PqsealError::with_kind_and_source(
                        ErrorCategory::User,
                        ErrorKind::IntegrityFailure,
                        "blob is neither an envelope nor a legacy record: corrupt input or tampered-with data",
                        e,
                    )
                }
                _ => e,
            })?;
            return into_payload(value);
        };

        let wrapped_key = WrappedKey::from_bytes(codec::decode_wrapped_key(wrapped_key)?);
        let secret_key = secret_key()?;
        let shared_secret = self.kem.decapsulate(&wrapped_key, &secret_key)?;
        let plaintext = Zeroizing::new(cipher::open(&envelope, shared_secret.as_bytes())?);

        let value = match serde_json::from_slice::<Value>(&plaintext) {
            Ok(value) => value,
            Err(e) => {
                debug!(error = %e, "sealed plaintext is not JSON, trying legacy formats");
                codec::decode_text(&String::from_utf8_lossy(&plaintext))?
            }
        };
        into_payload(value)
    }

    /// Seals each section on its own, then seals the mapping of section
    /// name to inner blob as one outer payload.
    pub fn encrypt_nested(&self, sections: &BTreeMap<String, Payload>) -> Result<NestedRecord> {
        if sections.is_empty() {
            return Err(PqsealError::with_kind(
                ErrorCategory::User,
                ErrorKind::MalformedRecord,
                "a nested record needs at least one section",
            ));
        }

        let mut outer = Payload::new();
        let mut section_keys = BTreeMap::new();
        for (name, payload) in sections {
            let inner = self
                .encrypt(payload)
                .map_err(|e| e.with_context(format!("failed to encrypt section {}", name)))?;
            outer.insert(name.clone(), Value::String(inner.encrypted_blob));
            section_keys.insert(name.clone(), inner.wrapped_key);
        }

        let record = self.encrypt(&outer)?;
        Ok(NestedRecord {
            encrypted_blob: record.encrypted_blob,
            wrapped_key: record.wrapped_key,
            section_keys,
        })
    }

    /// Reverses [`Crypto::encrypt_nested`].
    ///
    /// Older nested records stored a single key for every layer; a section
    /// without its own key is opened with the outer wrapped key.
    pub fn decrypt_nested(&self, record: &NestedRecord) -> Result<BTreeMap<String, Payload>> {
        let outer = self
            .decrypt(
                &Value::String(record.encrypted_blob.clone()),
                &record.wrapped_key,
            )
            .map_err(|e| e.with_context("failed to decrypt outer layer"))?;

        if let Some(missing) = record.section_keys.keys().find(|name| !outer.contains_key(*name)) {
            return Err(PqsealError::with_kind(
                ErrorCategory::User,
                ErrorKind::MalformedRecord,
                format!("section {} is missing from the outer layer", missing),
            ));
        }

        let mut sections = BTreeMap::new();
        for (name, inner_blob) in outer {
            let wrapped_key: &str = match record.section_keys.get(&name) {
                Some(key) => key,
                None => {
                    debug!(section = %name, "no section key recorded, using outer key");
                    &record.wrapped_key
                }
            };
            let payload = self
                .decrypt(&inner_blob, wrapped_key)
                .map_err(|e| e.with_context(format!("failed to decrypt section {}", name)))?;
            sections.insert(name, payload);
        }
        Ok(sections)
    }
}
