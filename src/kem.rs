//! Key encapsulation providers
//!
//! A [`KemProvider`] generates asymmetric key pairs and establishes a 32-byte
//! shared secret by encapsulating against a public key. Two providers exist:
//!
//! - [`DemoKem`]: hash-of-random-bytes construction that mirrors records
//!   produced by earlier deployments. It offers no real security and is kept
//!   for compatibility and tests.
//! - [`MlKem768`]: ML-KEM-768 (FIPS 203) lattice-based KEM.
//!
//! Neither provider signals a mismatched secret key. Decapsulating with the
//! wrong secret key yields a different secret, and the mismatch is detected
//! later when the AEAD tag fails to verify.

use std::fmt;

use ml_kem::kem::{Decapsulate, Encapsulate};
use ml_kem::{EncodedSizeUser, KemCore};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::{ErrorCategory, ErrorKind, PqsealError, Result};

/// Length of every shared secret in bytes.
pub const SHARED_SECRET_LEN: usize = 32;

/// Length of demo secret keys, public keys and wrapped keys.
const DEMO_KEY_LEN: usize = 32;

const DEMO_PK_DOMAIN: &[u8] = b"pqseal/demo-kem/public-key/v1";
const DEMO_SS_DOMAIN: &[u8] = b"pqseal/demo-kem/shared-secret/v1";

/// Secret key bundled with early demo deployments. Everyone who has the
/// source has this key; records sealed under it are not confidential.
const BUNDLED_DEMO_SECRET: [u8; DEMO_KEY_LEN] = *b"pqseal-bundled-demo-secret-key!!";

type MlKemEncapsulationKey = <ml_kem::MlKem768 as KemCore>::EncapsulationKey;
type MlKemDecapsulationKey = <ml_kem::MlKem768 as KemCore>::DecapsulationKey;

/// Identifies which encapsulation algorithm backs a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KemScheme {
    /// Reference construction, not secure.
    Demo,
    /// ML-KEM-768.
    #[serde(rename = "ml-kem-768")]
    MlKem768,
}

impl KemScheme {
    /// Instantiates the provider for this scheme.
    pub fn provider(self) -> Box<dyn KemProvider> {
        match self {
            KemScheme::Demo => Box::new(DemoKem),
            KemScheme::MlKem768 => Box::new(MlKem768),
        }
    }
}

impl fmt::Display for KemScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KemScheme::Demo => f.write_str("demo"),
            KemScheme::MlKem768 => f.write_str("ml-kem-768"),
        }
    }
}

/// Public half of a key pair.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey(Vec<u8>);

impl PublicKey {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({} bytes)", self.0.len())
    }
}

/// Secret half of a key pair. Wiped from memory when dropped.
#[derive(Clone)]
pub struct SecretKey(Zeroizing<Vec<u8>>);

impl SecretKey {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(Zeroizing::new(bytes.into()))
    }

    /// Raw key bytes. Avoid logging or persisting them.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey([REDACTED])")
    }
}

/// Encapsulation ciphertext stored alongside a sealed blob.
#[derive(Clone, PartialEq, Eq)]
pub struct WrappedKey(Vec<u8>);

impl WrappedKey {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for WrappedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WrappedKey({} bytes)", self.0.len())
    }
}

/// Symmetric key material produced by encapsulation.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret([u8; SHARED_SECRET_LEN]);

impl SharedSecret {
    pub fn as_bytes(&self) -> &[u8; SHARED_SECRET_LEN] {
        &self.0
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedSecret([REDACTED])")
    }
}

/// Capability interface for key encapsulation.
///
/// Everything above this layer depends only on this trait, so the demo and
/// lattice providers are interchangeable.
pub trait KemProvider: Send + Sync {
    fn scheme(&self) -> KemScheme;

    /// Generates a fresh key pair. Every call draws new randomness.
    fn generate_keypair(&self) -> Result<(PublicKey, SecretKey)>;

    /// Produces a fresh wrapped key and the shared secret it carries.
    fn encapsulate(&self, public_key: &PublicKey) -> Result<(WrappedKey, SharedSecret)>;

    /// Recovers the shared secret from a wrapped key.
    ///
    /// With a secret key that does not match the public key used for
    /// encapsulation this returns an unrelated secret rather than an error.
    fn decapsulate(&self, wrapped_key: &WrappedKey, secret_key: &SecretKey)
    -> Result<SharedSecret>;
}

fn fill_random(buf: &mut [u8]) -> Result<()> {
    OsRng.try_fill_bytes(buf).map_err(|e| {
        PqsealError::with_kind_and_source(
            ErrorCategory::Internal,
            ErrorKind::KeyGenerationFailure,
            format!("system entropy source failed: {}", e),
            e,
        )
    })
}

fn check_len(what: &str, actual: usize, expected: usize) -> Result<()> {
    if actual != expected {
        return Err(PqsealError::with_kind(
            ErrorCategory::User,
            ErrorKind::MalformedRecord,
            format!("{} must be {} bytes, got {}", what, expected, actual),
        ));
    }
    Ok(())
}

/// Reference construction: the wrapped key is random, the shared secret is a
/// hash of it bound to the recipient's public key.
#[derive(Debug, Clone, Copy, Default)]
pub struct DemoKem;

impl DemoKem {
    fn public_from_secret(secret: &[u8]) -> [u8; DEMO_KEY_LEN] {
        let mut hasher = Sha256::new();
        hasher.update(DEMO_PK_DOMAIN);
        hasher.update(secret);
        hasher.finalize().into()
    }

    fn derive_secret(public: &[u8], wrapped: &[u8]) -> SharedSecret {
        let mut hasher = Sha256::new();
        hasher.update(DEMO_SS_DOMAIN);
        hasher.update(public);
        hasher.update(wrapped);
        SharedSecret(hasher.finalize().into())
    }

    /// The fixed key pair shared by every caller of early deployments.
    pub fn bundled_keypair() -> (PublicKey, SecretKey) {
        let public = Self::public_from_secret(&BUNDLED_DEMO_SECRET);
        (
            PublicKey::from_bytes(public.to_vec()),
            SecretKey::from_bytes(BUNDLED_DEMO_SECRET.to_vec()),
        )
    }
}

impl KemProvider for DemoKem {
    fn scheme(&self) -> KemScheme {
        KemScheme::Demo
    }

    fn generate_keypair(&self) -> Result<(PublicKey, SecretKey)> {
        let mut secret = Zeroizing::new([0u8; DEMO_KEY_LEN]);
        fill_random(&mut secret[..])?;
        let public = Self::public_from_secret(&secret[..]);
        Ok((
            PublicKey::from_bytes(public.to_vec()),
            SecretKey::from_bytes(secret.to_vec()),
        ))
    }

    fn encapsulate(&self, public_key: &PublicKey) -> Result<(WrappedKey, SharedSecret)> {
        check_len("demo public key", public_key.as_bytes().len(), DEMO_KEY_LEN)?;
        let mut wrapped = [0u8; DEMO_KEY_LEN];
        fill_random(&mut wrapped)?;
        let secret = Self::derive_secret(public_key.as_bytes(), &wrapped);
        Ok((WrappedKey::from_bytes(wrapped.to_vec()), secret))
    }

    fn decapsulate(
        &self,
        wrapped_key: &WrappedKey,
        secret_key: &SecretKey,
    ) -> Result<SharedSecret> {
        check_len("demo wrapped key", wrapped_key.as_bytes().len(), DEMO_KEY_LEN)?;
        check_len("demo secret key", secret_key.as_bytes().len(), DEMO_KEY_LEN)?;
        let public = Self::public_from_secret(secret_key.as_bytes());
        Ok(Self::derive_secret(&public, wrapped_key.as_bytes()))
    }
}

/// ML-KEM-768 (FIPS 203).
#[derive(Debug, Clone, Copy, Default)]
pub struct MlKem768;

impl MlKem768 {
    pub const PUBLIC_KEY_LEN: usize = 1184;
    pub const SECRET_KEY_LEN: usize = 2400;
    pub const WRAPPED_KEY_LEN: usize = 1088;
}

impl KemProvider for MlKem768 {
    fn scheme(&self) -> KemScheme {
        KemScheme::MlKem768
    }

    fn generate_keypair(&self) -> Result<(PublicKey, SecretKey)> {
        // Probe the entropy source first so an exhausted source surfaces as
        // an error instead of a panic inside the KEM.
        fill_random(&mut [0u8; 1])?;
        let (dk, ek) = ml_kem::MlKem768::generate(&mut OsRng);
        Ok((
            PublicKey::from_bytes(ek.as_bytes().as_slice().to_vec()),
            SecretKey::from_bytes(dk.as_bytes().as_slice().to_vec()),
        ))
    }

    fn encapsulate(&self, public_key: &PublicKey) -> Result<(WrappedKey, SharedSecret)> {
        let bytes = public_key.as_bytes();
        check_len("ML-KEM public key", bytes.len(), Self::PUBLIC_KEY_LEN)?;
        let encoded = ml_kem::Encoded::<MlKemEncapsulationKey>::try_from(bytes).map_err(|_| {
            PqsealError::with_kind(
                ErrorCategory::User,
                ErrorKind::MalformedRecord,
                "invalid ML-KEM public key",
            )
        })?;
        let ek = MlKemEncapsulationKey::from_bytes(&encoded);
        let (ct, shared) = ek.encapsulate(&mut OsRng).map_err(|_| {
            PqsealError::with_kind(
                ErrorCategory::Internal,
                ErrorKind::KeyGenerationFailure,
                "ML-KEM encapsulation failed",
            )
        })?;
        let mut secret = [0u8; SHARED_SECRET_LEN];
        secret.copy_from_slice(shared.as_slice());
        Ok((
            WrappedKey::from_bytes(ct.as_slice().to_vec()),
            SharedSecret(secret),
        ))
    }

    fn decapsulate(
        &self,
        wrapped_key: &WrappedKey,
        secret_key: &SecretKey,
    ) -> Result<SharedSecret> {
        check_len(
            "ML-KEM wrapped key",
            wrapped_key.as_bytes().len(),
            Self::WRAPPED_KEY_LEN,
        )?;
        check_len(
            "ML-KEM secret key",
            secret_key.as_bytes().len(),
            Self::SECRET_KEY_LEN,
        )?;
        let encoded = ml_kem::Encoded::<MlKemDecapsulationKey>::try_from(secret_key.as_bytes())
            .map_err(|_| {
                PqsealError::with_kind(
                    ErrorCategory::User,
                    ErrorKind::MalformedRecord,
                    "invalid ML-KEM secret key",
                )
            })?;
        let dk = MlKemDecapsulationKey::from_bytes(&encoded);
        let ct = ml_kem::Ciphertext::<ml_kem::MlKem768>::try_from(wrapped_key.as_bytes())
            .map_err(|_| {
                PqsealError::with_kind(
                    ErrorCategory::User,
                    ErrorKind::MalformedRecord,
                    "invalid ML-KEM wrapped key",
                )
            })?;
        // Implicit rejection: a wrong key produces a pseudorandom secret.
        let shared = dk.decapsulate(&ct).map_err(|_| {
            PqsealError::with_kind(
                ErrorCategory::User,
                ErrorKind::MalformedRecord,
                "ML-KEM decapsulation failed",
            )
        })?;
        let mut secret = [0u8; SHARED_SECRET_LEN];
        secret.copy_from_slice(shared.as_slice());
        Ok(SharedSecret(secret))
    }
}
