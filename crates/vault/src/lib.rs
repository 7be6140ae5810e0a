//! Key vault: signing credentials, encrypted at rest.
//!
//! The cryptography itself is an external collaborator — the vault only
//! consumes the [`SecretCipher`] contract, guaranteeing that a plaintext
//! key handed to `store` is encrypted exactly once and only ever leaves
//! through `get`.

use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum VaultError {
    /// No key is stored for the requested (network, account, key_type).
    /// Callers treat this as a configuration fault for the current attempt.
    #[error("authority missing: no {key_type} key for network {network}, account {account}")]
    AuthorityMissing {
        network: String,
        account: String,
        key_type: String,
    },

    #[error("cipher error: {0}")]
    Cipher(String),
}

/// Encrypt/decrypt contract satisfied by the external crypto service.
pub trait SecretCipher: Send + Sync {
    fn encrypt(&self, plaintext: &str) -> Result<String, VaultError>;
    fn decrypt(&self, stored: &str) -> Result<String, VaultError>;

    /// Whether a value is already in encrypted form, so keys are never
    /// double-encrypted on re-save.
    fn is_encrypted(&self, value: &str) -> bool;
}

/// One stored key pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyEntry {
    /// Network the key belongs to (e.g. "graphene", "bitcoind")
    pub network: String,

    /// Account/wallet the key is for, if the network uses accounts
    pub account: Option<String>,

    /// Key role (e.g. "active", "owner"); None for single-key networks
    pub key_type: Option<String>,

    /// Private key, encrypted at rest
    pub private_key: String,

    pub public_key: Option<String>,

    /// For disposable deposit addresses: whether this key's address has
    /// already received a deposit
    pub used: bool,
}

impl KeyEntry {
    pub fn new(network: impl Into<String>, private_key: impl Into<String>) -> Self {
        Self {
            network: network.into(),
            account: None,
            key_type: None,
            private_key: private_key.into(),
            public_key: None,
            used: false,
        }
    }

    pub fn with_account(mut self, account: impl Into<String>) -> Self {
        self.account = Some(account.into());
        self
    }

    pub fn with_key_type(mut self, key_type: impl Into<String>) -> Self {
        self.key_type = Some(key_type.into());
        self
    }

    pub fn with_public_key(mut self, public_key: impl Into<String>) -> Self {
        self.public_key = Some(public_key.into());
        self
    }
}

pub struct KeyVault {
    cipher: Box<dyn SecretCipher>,
    keys: RwLock<Vec<KeyEntry>>,
}

impl KeyVault {
    pub fn new(cipher: Box<dyn SecretCipher>) -> Self {
        Self {
            cipher,
            keys: RwLock::new(Vec::new()),
        }
    }

    /// Store a key, encrypting the private key if it arrived as plaintext.
    pub fn store(&self, mut entry: KeyEntry) -> Result<(), VaultError> {
        if !self.cipher.is_encrypted(&entry.private_key) {
            entry.private_key = self.cipher.encrypt(&entry.private_key)?;
        }
        debug!(network = %entry.network, account = ?entry.account, "storing key");
        self.keys
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(entry);
        Ok(())
    }

    /// Fetch and decrypt a signing key on demand.
    ///
    /// `account`/`key_type` of `None` match entries regardless of those
    /// fields, so single-key networks can look up by network alone.
    pub fn get(
        &self,
        network: &str,
        account: Option<&str>,
        key_type: Option<&str>,
    ) -> Result<String, VaultError> {
        let keys = self.keys.read().unwrap_or_else(|e| e.into_inner());
        let entry = keys
            .iter()
            .find(|k| {
                k.network == network
                    && account.map_or(true, |a| k.account.as_deref() == Some(a))
                    && key_type.map_or(true, |t| k.key_type.as_deref() == Some(t))
            })
            .ok_or_else(|| VaultError::AuthorityMissing {
                network: network.to_string(),
                account: account.unwrap_or("<any>").to_string(),
                key_type: key_type.unwrap_or("<any>").to_string(),
            })?;
        self.cipher.decrypt(&entry.private_key)
    }

    /// Flag a disposable address key as consumed by a deposit.
    pub fn mark_used(&self, network: &str, public_key: &str) -> bool {
        let mut keys = self.keys.write().unwrap_or_else(|e| e.into_inner());
        for entry in keys.iter_mut() {
            if entry.network == network && entry.public_key.as_deref() == Some(public_key) {
                entry.used = true;
                return true;
            }
        }
        false
    }

    /// Unused disposable keys for a network, for deposit address rotation.
    pub fn unused_keys(&self, network: &str) -> Vec<KeyEntry> {
        self.keys
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|k| k.network == network && !k.used)
            .cloned()
            .collect()
    }
}

/// Marker-prefix cipher for tests and local development ONLY — it provides
/// no secrecy whatsoever.
pub struct PlaintextCipher;

const MARKER: &str = "plain$";

impl SecretCipher for PlaintextCipher {
    fn encrypt(&self, plaintext: &str) -> Result<String, VaultError> {
        Ok(format!("{MARKER}{plaintext}"))
    }

    fn decrypt(&self, stored: &str) -> Result<String, VaultError> {
        stored
            .strip_prefix(MARKER)
            .map(str::to_string)
            .ok_or_else(|| VaultError::Cipher("value is not encrypted".to_string()))
    }

    fn is_encrypted(&self, value: &str) -> bool {
        value.starts_with(MARKER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_vault() -> KeyVault {
        KeyVault::new(Box::new(PlaintextCipher))
    }

    #[test]
    fn keys_are_encrypted_once_and_decrypted_on_get() {
        let vault = new_vault();
        vault
            .store(
                KeyEntry::new("graphene", "5Ksecret")
                    .with_account("bridge")
                    .with_key_type("active"),
            )
            .unwrap();

        // Stored form is encrypted
        let stored = vault.keys.read().unwrap()[0].private_key.clone();
        assert!(stored.starts_with("plain$"));

        // Re-storing the already-encrypted value does not double-encrypt
        let vault2 = new_vault();
        vault2.store(KeyEntry::new("graphene", stored.clone())).unwrap();
        assert_eq!(vault2.keys.read().unwrap()[0].private_key, stored);

        let key = vault.get("graphene", Some("bridge"), Some("active")).unwrap();
        assert_eq!(key, "5Ksecret");
    }

    #[test]
    fn missing_key_is_authority_missing() {
        let vault = new_vault();
        let err = vault.get("graphene", Some("bridge"), None).unwrap_err();
        assert!(matches!(err, VaultError::AuthorityMissing { .. }));
    }

    #[test]
    fn lookup_filters_are_optional() {
        let vault = new_vault();
        vault
            .store(KeyEntry::new("bitcoind", "L1secret").with_public_key("pub1"))
            .unwrap();

        assert_eq!(vault.get("bitcoind", None, None).unwrap(), "L1secret");
    }

    #[test]
    fn mark_used_consumes_disposable_keys() {
        let vault = new_vault();
        vault
            .store(KeyEntry::new("bitcoind", "L1secret").with_public_key("pub1"))
            .unwrap();

        assert_eq!(vault.unused_keys("bitcoind").len(), 1);
        assert!(vault.mark_used("bitcoind", "pub1"));
        assert!(vault.unused_keys("bitcoind").is_empty());
        assert!(!vault.mark_used("bitcoind", "missing"));
    }
}
