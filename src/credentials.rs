// src/credentials.rs
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

pub const API_KEY_VAR: &str = "KRAKEN_API_KEY";
pub const PRIVATE_KEY_VAR: &str = "KRAKEN_PRIVATE_KEY";

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("{0} is not set in the environment or {1}")]
    Missing(&'static str, String),

    #[error("private key is not valid base64: {0}")]
    InvalidSecret(#[from] base64::DecodeError),
}

/// API key plus the decoded signing secret. Lives for the whole process.
#[derive(Clone)]
pub struct Credentials {
    api_key: String,
    secret: Vec<u8>,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>, private_key_b64: &str) -> Result<Self, CredentialError> {
        let secret = BASE64.decode(private_key_b64.trim())?;
        Ok(Self {
            api_key: api_key.into(),
            secret,
        })
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn secret(&self) -> &[u8] {
        &self.secret
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"<redacted>")
            .field("secret", &"<redacted>")
            .finish()
    }
}

pub trait CredentialProvider {
    fn load(&self) -> Result<Credentials, CredentialError>;
}

/// Environment first, then `KEY=value` lines from a local env file.
pub struct EnvFileCredentialProvider {
    path: PathBuf,
}

impl EnvFileCredentialProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn read_file(path: &Path) -> HashMap<String, String> {
        match dotenvy::from_path_iter(path) {
            Ok(iter) => iter.filter_map(Result::ok).collect(),
            Err(e) => {
                debug!("Credentials file {} not readable: {}", path.display(), e);
                HashMap::new()
            }
        }
    }

    fn lookup(
        &self,
        var: &'static str,
        file_values: &HashMap<String, String>,
    ) -> Result<String, CredentialError> {
        env::var(var)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .or_else(|| file_values.get(var).cloned())
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| CredentialError::Missing(var, self.path.display().to_string()))
    }
}

impl CredentialProvider for EnvFileCredentialProvider {
    fn load(&self) -> Result<Credentials, CredentialError> {
        let file_values = Self::read_file(&self.path);
        let api_key = self.lookup(API_KEY_VAR, &file_values)?;
        let private_key = self.lookup(PRIVATE_KEY_VAR, &file_values)?;
        Credentials::new(api_key, &private_key)
    }
}
