//! In-memory credential vault
//!
//! Holds one [`Credential`] per username, encrypted at rest in process
//! memory with AES-256-GCM under a key generated once at startup
//! (`Vault::new`) and never persisted - credentials do not survive a
//! restart, matching the proxy's job of forwarding live Subsonic sessions
//! rather than owning user accounts. Guarded by a `RwLock` the same way the
//! proxy's shared state guards its maps: many concurrent readers (every
//! forwarded request looks up a credential), rare writers (a new user
//! authenticates).

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;
use tracing::{debug, warn};

use crate::error::AppError;

const NONCE_LEN: usize = 12;
const PING_TIMEOUT: Duration = Duration::from_secs(10);

/// A validated Subsonic credential, exactly as the client sent it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    /// `u`/`p` auth: plaintext (or hex-encoded `enc:`) password
    Password(String),
    /// `u`/`t`/`s` auth: token plus the salt it was derived from
    Token { token: String, salt: String },
}

struct SealedEntry {
    nonce: [u8; NONCE_LEN],
    ciphertext: Vec<u8>,
}

/// Encrypted, reader-writer-locked map of username -> credential
pub struct Vault {
    cipher: Aes256Gcm,
    entries: RwLock<HashMap<String, SealedEntry>>,
}

impl Vault {
    /// Generate a fresh process-lifetime 256-bit key. The key is never
    /// written to disk or logged; it exists only for this process's lifetime.
    pub fn new() -> Self {
        let mut key_bytes = [0u8; 32];
        OsRng.fill_bytes(&mut key_bytes);
        let key = Key::<Aes256Gcm>::from_slice(&key_bytes);
        Self {
            cipher: Aes256Gcm::new(key),
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn seal(&self, credential: &Credential) -> Result<SealedEntry, AppError> {
        let plaintext = serialize_credential(credential);
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| AppError::credentials("seal_failed", "failed to encrypt credential"))?;
        Ok(SealedEntry { nonce: nonce_bytes, ciphertext })
    }

    fn unseal(&self, entry: &SealedEntry) -> Result<Credential, AppError> {
        let nonce = Nonce::from_slice(&entry.nonce);
        let plaintext = self
            .cipher
            .decrypt(nonce, entry.ciphertext.as_slice())
            .map_err(|_| AppError::credentials("unseal_failed", "failed to decrypt credential"))?;
        let text = String::from_utf8(plaintext)
            .map_err(|e| AppError::credentials("unseal_failed", "decrypted credential was not utf8").with_cause(e))?;
        deserialize_credential(&text)
    }

    /// Validate a credential against the upstream's `/rest/ping` endpoint and,
    /// on success, store it (overwriting any prior credential for the user).
    /// Returns `Ok(true)` if the credential was newly accepted and stored, or
    /// `Ok(false)` if it was already stored and valid (no upstream call made)
    /// or was rejected by the upstream.
    pub async fn validate_and_store(
        &self,
        client: &reqwest::Client,
        upstream_url: &str,
        username: &str,
        credential: Credential,
    ) -> Result<bool, AppError> {
        if let Some(existing) = self.get_one(username)? {
            if existing == credential {
                return Ok(false);
            }
        }

        let mut url = reqwest::Url::parse(&format!("{}/rest/ping", upstream_url))
            .map_err(|e| AppError::network("bad_upstream_url", "could not build ping URL").with_cause(e))?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("u", username);
            pairs.append_pair("v", "1.15.0");
            pairs.append_pair("c", "subsoxy");
            pairs.append_pair("f", "json");
            match &credential {
                Credential::Password(p) => {
                    pairs.append_pair("p", p);
                }
                Credential::Token { token, salt } => {
                    pairs.append_pair("t", token);
                    pairs.append_pair("s", salt);
                }
            }
        }

        let response = client
            .get(url)
            .timeout(PING_TIMEOUT)
            .send()
            .await
            .map_err(|e| AppError::network("ping_failed", "upstream ping request failed").with_cause(e))?;

        if !response.status().is_success() {
            warn!(username, status = %response.status(), "upstream ping returned non-success status");
            return Ok(false);
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AppError::network("ping_parse_failed", "upstream ping response was not JSON").with_cause(e))?;

        let status = body
            .get("subsonic-response")
            .and_then(|r| r.get("status"))
            .and_then(|s| s.as_str())
            .unwrap_or("failed");

        if status != "ok" {
            debug!(username, status, "credential rejected by upstream ping");
            return Ok(false);
        }

        let sealed = self.seal(&credential)?;
        self.entries.write().unwrap().insert(username.to_string(), sealed);
        debug!(username, "credential stored in vault");
        Ok(true)
    }

    /// Look up a single user's stored credential
    pub fn get_one(&self, username: &str) -> Result<Option<Credential>, AppError> {
        let entries = self.entries.read().unwrap();
        match entries.get(username) {
            Some(entry) => self.unseal(entry).map(Some),
            None => Ok(None),
        }
    }

    /// Decrypt and return every stored credential, keyed by username
    pub fn get_all(&self) -> Result<HashMap<String, Credential>, AppError> {
        let entries = self.entries.read().unwrap();
        let mut result = HashMap::with_capacity(entries.len());
        for (user, entry) in entries.iter() {
            result.insert(user.clone(), self.unseal(entry)?);
        }
        Ok(result)
    }

    /// Number of users with a stored credential
    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every stored credential
    pub fn clear_all(&self) {
        self.entries.write().unwrap().clear();
    }
}

impl Default for Vault {
    fn default() -> Self {
        Self::new()
    }
}

fn serialize_credential(credential: &Credential) -> String {
    match credential {
        Credential::Password(p) => format!("p\x1f{}", p),
        Credential::Token { token, salt } => format!("t\x1f{}\x1f{}", token, salt),
    }
}

fn deserialize_credential(text: &str) -> Result<Credential, AppError> {
    let mut parts = text.split('\x1f');
    match parts.next() {
        Some("p") => {
            let password = parts
                .next()
                .ok_or_else(|| AppError::credentials("malformed_entry", "password entry missing value"))?;
            Ok(Credential::Password(password.to_string()))
        }
        Some("t") => {
            let token = parts
                .next()
                .ok_or_else(|| AppError::credentials("malformed_entry", "token entry missing token"))?;
            let salt = parts
                .next()
                .ok_or_else(|| AppError::credentials("malformed_entry", "token entry missing salt"))?;
            Ok(Credential::Token { token: token.to_string(), salt: salt.to_string() })
        }
        _ => Err(AppError::credentials("malformed_entry", "unknown credential tag")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_password_credential() {
        let vault = Vault::new();
        let sealed = vault.seal(&Credential::Password("hunter2".into())).unwrap();
        let opened = vault.unseal(&sealed).unwrap();
        assert_eq!(opened, Credential::Password("hunter2".into()));
    }

    #[test]
    fn round_trips_token_credential() {
        let vault = Vault::new();
        let original = Credential::Token { token: "abc123".into(), salt: "deadbeef".into() };
        let sealed = vault.seal(&original).unwrap();
        let opened = vault.unseal(&sealed).unwrap();
        assert_eq!(opened, original);
    }

    #[test]
    fn tampered_ciphertext_fails_to_unseal() {
        let vault = Vault::new();
        let mut sealed = vault.seal(&Credential::Password("hunter2".into())).unwrap();
        let last = sealed.ciphertext.len() - 1;
        sealed.ciphertext[last] ^= 0xFF;
        assert!(vault.unseal(&sealed).is_err());
    }

    #[test]
    fn separate_vaults_use_independent_keys() {
        let a = Vault::new();
        let b = Vault::new();
        let sealed = a.seal(&Credential::Password("hunter2".into())).unwrap();
        assert!(b.unseal(&sealed).is_err());
    }

    #[test]
    fn get_one_returns_none_for_unknown_user() {
        let vault = Vault::new();
        assert_eq!(vault.get_one("nobody").unwrap(), None);
    }

    #[tokio::test]
    async fn validate_and_store_skips_the_upstream_ping_for_an_unchanged_credential() {
        let vault = Vault::new();
        let client = reqwest::Client::new();
        let credential = Credential::Password("hunter2".into());
        let sealed = vault.seal(&credential).unwrap();
        vault.entries.write().unwrap().insert("alice".into(), sealed);

        // The upstream URL is unreachable; if this call tried to ping it the
        // request would time out and return an `Err`, not `Ok(false)`.
        let is_new = vault
            .validate_and_store(&client, "http://127.0.0.1:1", "alice", credential)
            .await
            .unwrap();
        assert!(!is_new);
    }

    #[test]
    fn clear_all_empties_the_vault() {
        let vault = Vault::new();
        let sealed = vault.seal(&Credential::Password("x".into())).unwrap();
        vault.entries.write().unwrap().insert("alice".into(), sealed);
        assert_eq!(vault.len(), 1);
        vault.clear_all();
        assert!(vault.is_empty());
    }
}
