use keyring::Entry;
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::sync::{Mutex, PoisonError};

const KEYRING_SERVICE: &str = "mcp-assistant";

/// Describes failures when attempting to access the system keyring.
///
/// Recoverable errors indicate that the credential backend was
/// temporarily unavailable (for example when the keychain is locked).
#[derive(Debug)]
pub enum CredentialError {
    Recoverable(keyring::Error),
    Permanent(keyring::Error),
}

impl CredentialError {
    fn inner(&self) -> &keyring::Error {
        match self {
            CredentialError::Recoverable(err) | CredentialError::Permanent(err) => err,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        matches!(self, CredentialError::Recoverable(_))
    }
}

impl From<keyring::Error> for CredentialError {
    fn from(err: keyring::Error) -> Self {
        match err {
            keyring::Error::PlatformFailure(_) | keyring::Error::NoStorageAccess(_) => {
                CredentialError::Recoverable(err)
            }
            other => CredentialError::Permanent(other),
        }
    }
}

impl fmt::Display for CredentialError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner())
    }
}

impl Error for CredentialError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(self.inner())
    }
}

/// API credentials per provider account, kept in the OS keyring.
///
/// With `use_keyring = false` credentials live only in memory, which keeps
/// tests away from the user's real keychain.
#[derive(Debug)]
pub struct CredentialStore {
    use_keyring: bool,
    memory: Mutex<HashMap<String, String>>,
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::new_with_keyring(true)
    }

    pub fn new_with_keyring(use_keyring: bool) -> Self {
        Self {
            use_keyring,
            memory: Mutex::new(HashMap::new()),
        }
    }

    /// Looks up `account`, falling back to `env_var` when nothing is stored.
    pub fn get(
        &self,
        account: &str,
        env_var: Option<&str>,
    ) -> Result<Option<String>, CredentialError> {
        let stored = if self.use_keyring {
            let entry = Entry::new(KEYRING_SERVICE, account)?;
            match entry.get_password() {
                Ok(secret) => Some(secret),
                Err(keyring::Error::NoEntry) => None,
                Err(err) => return Err(CredentialError::from(err)),
            }
        } else {
            self.memory
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get(account)
                .cloned()
        };

        Ok(stored.or_else(|| {
            env_var
                .and_then(|name| std::env::var(name).ok())
                .filter(|value| !value.trim().is_empty())
        }))
    }

    pub fn set(&self, account: &str, secret: &str) -> Result<(), CredentialError> {
        if !self.use_keyring {
            self.memory
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(account.to_string(), secret.to_string());
            return Ok(());
        }

        let entry = Entry::new(KEYRING_SERVICE, account)?;
        entry.set_password(secret).map_err(CredentialError::from)
    }

    pub fn remove(&self, account: &str) -> Result<bool, CredentialError> {
        if !self.use_keyring {
            return Ok(self
                .memory
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(account)
                .is_some());
        }

        let entry = Entry::new(KEYRING_SERVICE, account)?;
        match entry.delete_credential() {
            Ok(()) => Ok(true),
            Err(keyring::Error::NoEntry) => Ok(false),
            Err(err) => Err(CredentialError::from(err)),
        }
    }
}
