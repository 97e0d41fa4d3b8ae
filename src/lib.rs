//! pqseal - hybrid post-quantum envelope encryption for structured records
//!
//! A key encapsulation mechanism produces a fresh shared secret per record,
//! which keys AES-256-GCM. Stored blobs from older producers that predate
//! the envelope format are recovered through a chain of decode strategies.

#![forbid(unsafe_code)]

pub mod cipher;
pub mod codec;
pub mod config;
pub mod error;
pub mod file_ops;
pub mod kem;
pub mod keystore;
pub mod service;

pub use config::{CryptoConfig, KeyMode};
pub use error::{ErrorCategory, ErrorKind, PqsealError, Result};
pub use kem::{KemProvider, KemScheme};
pub use keystore::KeyStore;
pub use service::{Crypto, EncryptedRecord, NestedRecord, Payload};
