//! Per-document password credential.
//!
//! The hash is written exactly once, when the first user sets the
//! password. Hashing suspends the caller (it runs on the blocking pool),
//! so two first-joiners can both be hashing at the same time; the commit
//! is a set-once cell and the loser gets [`CollabError::CredentialConflict`].

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use std::sync::{Arc, OnceLock};

use crate::error::CollabError;

/// Password hashing primitive.
pub trait CredentialHasher: Send + Sync + 'static {
    /// Hash a password into a self-describing string.
    fn hash(&self, password: &str) -> Result<String, CollabError>;

    /// Check a password against a string produced by [`hash`](Self::hash).
    fn verify(&self, password: &str, hash: &str) -> Result<bool, CollabError>;
}

/// Argon2id with a random salt, PHC string output.
#[derive(Debug, Clone)]
pub struct Argon2Hasher {
    params: Params,
}

impl Default for Argon2Hasher {
    fn default() -> Self {
        Self {
            params: Params::default(),
        }
    }
}

impl Argon2Hasher {
    /// Custom cost parameters (memory in KiB, iterations, lanes).
    pub fn with_params(m_cost: u32, t_cost: u32, p_cost: u32) -> Result<Self, CollabError> {
        let params = Params::new(m_cost, t_cost, p_cost, None)
            .map_err(|e| CollabError::Hashing(e.to_string()))?;
        Ok(Self { params })
    }

    /// Cheapest parameters Argon2 accepts. Only for tests.
    pub fn for_testing() -> Self {
        Self {
            params: Params::new(Params::MIN_M_COST, Params::MIN_T_COST, Params::MIN_P_COST, None)
                .unwrap_or_default(),
        }
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }
}

impl CredentialHasher for Argon2Hasher {
    fn hash(&self, password: &str) -> Result<String, CollabError> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| CollabError::Hashing(e.to_string()))?;
        Ok(hash.to_string())
    }

    fn verify(&self, password: &str, hash: &str) -> Result<bool, CollabError> {
        let parsed = PasswordHash::new(hash).map_err(|e| CollabError::Hashing(e.to_string()))?;
        Ok(self
            .argon2()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok())
    }
}

/// One document's credential slot.
pub struct CredentialStore {
    hash: OnceLock<String>,
    hasher: Arc<dyn CredentialHasher>,
}

impl CredentialStore {
    pub fn new(hasher: Arc<dyn CredentialHasher>) -> Self {
        Self {
            hash: OnceLock::new(),
            hasher,
        }
    }

    /// Whether setup has completed.
    pub fn is_configured(&self) -> bool {
        self.hash.get().is_some()
    }

    /// Hash `password` and commit it as the document's credential.
    ///
    /// Checked on entry and again at commit; whoever commits second gets
    /// `CredentialConflict` and the stored hash is left untouched.
    pub async fn setup(&self, password: &str) -> Result<(), CollabError> {
        if self.is_configured() {
            return Err(CollabError::CredentialConflict);
        }

        let hasher = self.hasher.clone();
        let password = password.to_owned();
        let hash = tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| CollabError::Hashing(e.to_string()))??;

        self.hash.set(hash).map_err(|_| CollabError::CredentialConflict)
    }

    /// Check `password` against the committed credential.
    ///
    /// An unconfigured store never matches.
    pub async fn verify(&self, password: &str) -> Result<bool, CollabError> {
        let Some(hash) = self.hash.get().cloned() else {
            return Ok(false);
        };

        let hasher = self.hasher.clone();
        let password = password.to_owned();
        tokio::task::spawn_blocking(move || hasher.verify(&password, &hash))
            .await
            .map_err(|e| CollabError::Hashing(e.to_string()))?
    }
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("configured", &self.is_configured())
            .finish()
    }
}
