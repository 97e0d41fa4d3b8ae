//! Record files on disk
//!
//! A plaintext file holds one JSON mapping. A record file holds the JSON
//! form of an [`EncryptedRecord`] or, for sectioned encryption, a
//! [`NestedRecord`]. Output files are written atomically and are readable
//! by the owner only on Unix systems.

use crate::codec;
use crate::error::{ErrorCategory, ErrorKind, PqsealError, Result};
use crate::service::{Crypto, EncryptedRecord, NestedRecord, Payload};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use tracing::info;

/// Record file as found on disk. Older deployments stored the blob as a
/// structured value, and some stored no key at all.
#[derive(Debug, Deserialize)]
struct RecordFile {
    encrypted_blob: Value,
    #[serde(default)]
    wrapped_key: String,
    #[serde(default)]
    section_keys: Option<BTreeMap<String, String>>,
}

/// Encrypt the JSON mapping in `input_path` into a record file
///
/// With `sections`, each top-level entry whose value is itself a mapping is
/// sealed on its own inside an outer envelope (see [`Crypto::encrypt_nested`]).
pub fn encrypt_file(
    input_path: &Path,
    output_path: &Path,
    crypto: &Crypto,
    sections: bool,
) -> Result<()> {
    let payload = read_payload(input_path)?;

    let record = if sections {
        let nested = crypto
            .encrypt_nested(&split_sections(payload)?)
            .map_err(|e| e.with_context("encryption failed"))?;
        to_pretty_json(&nested)?
    } else {
        let record = crypto
            .encrypt(&payload)
            .map_err(|e| e.with_context("encryption failed"))?;
        to_pretty_json(&record)?
    };

    write_file_atomic(output_path, record.as_bytes())
        .map_err(|e| e.with_context(format!("failed to write to {}", output_path.display())))?;
    info!(output = %output_path.display(), sections, "record written");
    Ok(())
}

/// Decrypt a record file, writing the recovered mapping as pretty JSON
///
/// A record carrying `section_keys` is treated as nested and produces a
/// mapping of section name to section payload.
pub fn decrypt_file(input_path: &Path, output_path: &Path, crypto: &Crypto) -> Result<()> {
    let contents = read_text(input_path)?;
    let record: RecordFile = serde_json::from_str(&contents).map_err(|e| {
        PqsealError::with_kind_and_source(
            ErrorCategory::User,
            ErrorKind::MalformedRecord,
            format!("{} is not a record file", input_path.display()),
            e,
        )
    })?;

    let plaintext = match record.section_keys {
        Some(section_keys) => {
            let Value::String(encrypted_blob) = record.encrypted_blob else {
                return Err(PqsealError::with_kind(
                    ErrorCategory::User,
                    ErrorKind::MalformedRecord,
                    "a nested record needs a string blob",
                ));
            };
            let nested = NestedRecord {
                encrypted_blob,
                wrapped_key: record.wrapped_key,
                section_keys,
            };
            let sections = crypto
                .decrypt_nested(&nested)
                .map_err(|e| e.with_context("failed to decrypt"))?;
            to_pretty_json(&sections)?
        }
        None => {
            let payload = crypto
                .decrypt(&record.encrypted_blob, &record.wrapped_key)
                .map_err(|e| e.with_context("failed to decrypt"))?;
            to_pretty_json(&payload)?
        }
    };

    write_file_atomic(output_path, plaintext.as_bytes())
        .map_err(|e| e.with_context(format!("failed to write to {}", output_path.display())))?;
    Ok(())
}

/// Run a stored legacy blob through the decode chain alone
///
/// The input may be a JSON document (a quoted string or a structured value)
/// or the bare blob text.
pub fn decode_file(input_path: &Path, output_path: &Path) -> Result<()> {
    let contents = read_text(input_path)?;
    let blob = serde_json::from_str::<Value>(&contents)
        .unwrap_or_else(|_| Value::String(contents.trim().to_string()));

    let value = codec::decode(&blob).map_err(|e| e.with_context("failed to decode"))?;
    write_file_atomic(output_path, to_pretty_json(&value)?.as_bytes())
        .map_err(|e| e.with_context(format!("failed to write to {}", output_path.display())))?;
    Ok(())
}

/// Read back a record written by [`encrypt_file`] without sections.
pub fn read_record(path: &Path) -> Result<EncryptedRecord> {
    let contents = read_text(path)?;
    serde_json::from_str(&contents).map_err(|e| {
        PqsealError::with_kind_and_source(
            ErrorCategory::User,
            ErrorKind::MalformedRecord,
            format!("{} is not a record file", path.display()),
            e,
        )
    })
}

fn split_sections(payload: Payload) -> Result<BTreeMap<String, Payload>> {
    payload
        .into_iter()
        .map(|(name, value)| match value {
            Value::Object(section) => Ok((name, section)),
            _ => Err(PqsealError::with_kind(
                ErrorCategory::User,
                ErrorKind::SerializationFailure,
                format!("section {} is not a mapping", name),
            )),
        })
        .collect()
}

fn read_payload(path: &Path) -> Result<Payload> {
    let contents = read_text(path)?;
    let value: Value = serde_json::from_str(&contents).map_err(|e| {
        PqsealError::with_kind_and_source(
            ErrorCategory::User,
            ErrorKind::SerializationFailure,
            format!("{} is not valid JSON", path.display()),
            e,
        )
    })?;
    match value {
        Value::Object(payload) => Ok(payload),
        _ => Err(PqsealError::with_kind(
            ErrorCategory::User,
            ErrorKind::SerializationFailure,
            format!("{} does not contain a JSON mapping", path.display()),
        )),
    }
}

fn read_text(path: &Path) -> Result<String> {
    let bytes = fs::read(path).map_err(|e| read_error(path, e))?;
    String::from_utf8(bytes).map_err(|e| {
        PqsealError::with_kind_and_source(
            ErrorCategory::User,
            ErrorKind::Io,
            format!("{} is not valid UTF-8", path.display()),
            e,
        )
    })
}

fn to_pretty_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<String> {
    let mut json = serde_json::to_string_pretty(value).map_err(|e| {
        PqsealError::with_kind_and_source(
            ErrorCategory::Internal,
            ErrorKind::SerializationFailure,
            "failed to serialize output",
            e,
        )
    })?;
    json.push('\n');
    Ok(json)
}

fn io_error(msg: impl Into<String>, err: io::Error) -> PqsealError {
    PqsealError::with_kind_and_source(ErrorCategory::Internal, ErrorKind::Io, msg, err)
}

/// Write `contents` to `path` via a temp file in the same directory
///
/// Either the old file or the complete new one exists afterwards, never a
/// partial write.
fn write_file_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let mut temp_file =
        tempfile::NamedTempFile::new_in(dir).map_err(|e| io_error("failed to create tempfile", e))?;

    temp_file
        .write_all(contents)
        .map_err(|e| io_error("failed to write to tempfile", e))?;
    // The rename below must only ever point at fully synced data.
    temp_file
        .flush()
        .map_err(|e| io_error("failed to flush tempfile", e))?;
    temp_file
        .as_file()
        .sync_all()
        .map_err(|e| io_error("failed to sync file prior to rename", e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = temp_file
            .as_file()
            .metadata()
            .map_err(|e| io_error("failed to get tempfile metadata", e))?
            .permissions();
        perms.set_mode(0o600);
        temp_file
            .as_file()
            .set_permissions(perms)
            .map_err(|e| io_error("failed to set tempfile permissions", e))?;
    }

    temp_file.persist(path).map_err(|e| {
        PqsealError::with_kind_and_source(
            ErrorCategory::Internal,
            ErrorKind::Io,
            format!("failed to rename to target file {}", path.display()),
            e,
        )
    })?;
    Ok(())
}

fn read_error(path: &Path, err: io::Error) -> PqsealError {
    let category = if err.kind() == io::ErrorKind::NotFound {
        ErrorCategory::User
    } else {
        ErrorCategory::Internal
    };
    PqsealError::with_kind_and_source(
        category,
        ErrorKind::Io,
        format!("failed to read from {}", path.display()),
        err,
    )
}
