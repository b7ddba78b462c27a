//! Shared helper functions used across CLI subcommands.
//!
//! Includes tracing initialization, master key resolution, and session
//! construction.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use keygate_auth::{AuthConfig, AuthService, LoopbackAgent, RequestContext, Session, VaultStorage};
use keygate_vault::{Vault, crypto};
use tracing::info;
use tracing_subscriber::EnvFilter;

// ---------------------------------------------------------------------------
// Tracing
// ---------------------------------------------------------------------------

/// Initialize the tracing subscriber with the given default log level.
///
/// Logs go to stderr so stdout stays clean for tokens and JSON.
pub fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

// ---------------------------------------------------------------------------
// Master key
// ---------------------------------------------------------------------------

/// Where the PBKDF2 salt for passphrase-derived keys lives.
pub fn salt_path(vault_path: &Path) -> PathBuf {
    let mut name = vault_path.as_os_str().to_owned();
    name.push(".salt");
    PathBuf::from(name)
}

/// Resolve the vault master key.
///
/// `KEYGATE_MASTER_KEY` (base64, 32 bytes) wins. Otherwise the key is derived
/// from `KEYGATE_PASSPHRASE`, creating the salt file next to the vault on
/// first use.
pub fn resolve_master_key(vault_path: &Path) -> Result<[u8; crypto::KEY_LEN]> {
    if let Ok(encoded) = std::env::var("KEYGATE_MASTER_KEY") {
        return decode_master_key(&encoded);
    }

    let passphrase = std::env::var("KEYGATE_PASSPHRASE")
        .context("set KEYGATE_MASTER_KEY or KEYGATE_PASSPHRASE to unlock the vault")?;
    derive_from_passphrase(passphrase.as_bytes(), &salt_path(vault_path))
}

fn decode_master_key(encoded: &str) -> Result<[u8; crypto::KEY_LEN]> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .context("KEYGATE_MASTER_KEY is not valid base64")?;
    match <[u8; crypto::KEY_LEN]>::try_from(bytes.as_slice()) {
        Ok(key) => Ok(key),
        Err(_) => bail!(
            "KEYGATE_MASTER_KEY must decode to {} bytes, got {}",
            crypto::KEY_LEN,
            bytes.len()
        ),
    }
}

fn derive_from_passphrase(passphrase: &[u8], salt_file: &Path) -> Result<[u8; crypto::KEY_LEN]> {
    if salt_file.exists() {
        let salt = std::fs::read(salt_file)
            .with_context(|| format!("failed to read salt file {}", salt_file.display()))?;
        if salt.len() != crypto::SALT_LEN {
            bail!("salt file {} is corrupt", salt_file.display());
        }
        return Ok(crypto::derive_key_with_salt(passphrase, &salt));
    }

    let (salt, key) = crypto::derive_key_from_password(passphrase).context("key derivation failed")?;
    std::fs::write(salt_file, salt)
        .with_context(|| format!("failed to write salt file {}", salt_file.display()))?;
    info!(path = %salt_file.display(), "created vault salt");
    Ok(key)
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Everything a subcommand needs.
pub struct Runtime {
    pub session: Session,
    pub vault: Arc<Mutex<Vault>>,
    pub namespace: String,
    pub ctx: RequestContext,
}

/// Load the config, unlock the vault, and build a session around them.
pub fn build_runtime(
    config_path: &Path,
    vault_path: &Path,
    timeout_secs: Option<u64>,
    redirect_wait: Duration,
) -> Result<Runtime> {
    let config = AuthConfig::load(config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    if let Some(dir) = vault_path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).context("failed to create vault directory")?;
    }
    let key = resolve_master_key(vault_path)?;
    let vault = Vault::open(vault_path, &key).context("failed to open credential vault")?;
    let vault = Arc::new(Mutex::new(vault));

    let namespace = config.namespace.clone();
    let storage = Arc::new(VaultStorage::shared(Arc::clone(&vault), namespace.clone()));
    let agent = Arc::new(LoopbackAgent::new().with_timeout(redirect_wait).on_url(|url| {
        eprintln!("Open this URL in your browser to sign in:\n\n  {url}\n");
    }));

    let service = AuthService::new(config, storage, agent).context("invalid client configuration")?;

    let mut ctx = RequestContext::new();
    if let Some(secs) = timeout_secs {
        ctx = ctx.with_timeout(Duration::from_secs(secs));
    }

    Ok(Runtime {
        session: Session::new(Arc::new(service)),
        vault,
        namespace,
        ctx,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
