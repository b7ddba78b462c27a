//! Integration tests for the keygate-vault crate.
//!
//! These exercise the on-disk lifecycle: values written under one vault
//! handle survive a reopen with the same key and are unreadable with another.

use keygate_vault::{Vault, VaultError, crypto};

fn temp_db() -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vault.db");
    (dir, path)
}

#[test]
fn entries_survive_reopen() {
    let (_dir, path) = temp_db();
    let key = crypto::generate_key().unwrap();

    {
        let vault = Vault::open(&path, &key).unwrap();
        vault.put("default", "access_token", "tok_a").unwrap();
        vault.put("default", "token_expiry", "1700000000000").unwrap();
    }

    let vault = Vault::open(&path, &key).unwrap();
    assert_eq!(
        vault.get("default", "access_token").unwrap().as_deref(),
        Some("tok_a")
    );
    assert_eq!(
        vault.keys("default").unwrap(),
        vec!["access_token", "token_expiry"]
    );
}

#[test]
fn reopen_with_other_key_cannot_decrypt() {
    let (_dir, path) = temp_db();
    let key = crypto::generate_key().unwrap();
    let other = crypto::generate_key().unwrap();

    Vault::open(&path, &key)
        .unwrap()
        .put("default", "refresh_token", "ref_b")
        .unwrap();

    let vault = Vault::open(&path, &other).unwrap();
    let result = vault.get("default", "refresh_token");
    assert!(matches!(result, Err(VaultError::DecryptionFailed { .. })));
}

#[test]
fn passphrase_key_reopens_vault() {
    let (_dir, path) = temp_db();
    let (salt, key) = crypto::derive_key_from_password(b"hunter2").unwrap();

    Vault::open(&path, &key)
        .unwrap()
        .put("default", "user", r#"{"sub":"u-1"}"#)
        .unwrap();

    let rederived = crypto::derive_key_with_salt(b"hunter2", &salt);
    let vault = Vault::open(&path, &rederived).unwrap();
    assert_eq!(
        vault.get("default", "user").unwrap().as_deref(),
        Some(r#"{"sub":"u-1"}"#)
    );
}

#[test]
fn purge_leaves_other_namespaces() {
    let (_dir, path) = temp_db();
    let key = crypto::generate_key().unwrap();
    let vault = Vault::open(&path, &key).unwrap();

    for k in ["access_token", "refresh_token", "id_token"] {
        vault.put("work", k, "w").unwrap();
        vault.put("home", k, "h").unwrap();
    }

    assert_eq!(vault.purge_namespace("work").unwrap(), 3);
    assert!(vault.keys("work").unwrap().is_empty());
    assert_eq!(vault.keys("home").unwrap().len(), 3);
}
