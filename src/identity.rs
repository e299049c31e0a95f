//! Client identity
//!
//! Every install gets one opaque identifier that attributes submitted jobs
//! to this client. It is generated on first use, persisted in the user's
//! config directory, and never regenerated while the file exists.

use once_cell::sync::OnceCell;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::fs;
use std::path::PathBuf;
use tracing::info;

/// Process-wide cache so the file is read at most once per run
static CLIENT_ID: OnceCell<String> = OnceCell::new();

/// Length of the random suffix after the `client-` prefix
const ID_SUFFIX_LEN: usize = 13;

/// Identity storage errors
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("Could not find config directory")]
    NoConfigDir,

    #[error("Failed to read client id: {0}")]
    Read(#[source] std::io::Error),

    #[error("Failed to persist client id: {0}")]
    Write(#[source] std::io::Error),
}

/// Get the stable client identifier, creating and persisting it on first use.
pub fn client_id() -> Result<&'static str, IdentityError> {
    CLIENT_ID
        .get_or_try_init(load_or_create)
        .map(String::as_str)
}

fn identity_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("vidqa").join("client_id"))
}

fn load_or_create() -> Result<String, IdentityError> {
    let path = identity_path().ok_or(IdentityError::NoConfigDir)?;

    if path.exists() {
        let id = fs::read_to_string(&path).map_err(IdentityError::Read)?;
        let id = id.trim().to_string();
        if !id.is_empty() {
            return Ok(id);
        }
        // Empty file: fall through and regenerate
    }

    let id = generate_id();

    if let Some(parent) = path.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent).map_err(IdentityError::Write)?;
        }
    }
    fs::write(&path, &id).map_err(IdentityError::Write)?;
    info!("Created client id at {:?}", path);

    Ok(id)
}

/// Generate a fresh identifier of the form `client-<13 alphanumerics>`
fn generate_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(ID_SUFFIX_LEN)
        .map(|c| (c as char).to_ascii_lowercase())
        .collect();
    format!("client-{}", suffix)
}
