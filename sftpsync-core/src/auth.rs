use std::fmt;
use std::path::PathBuf;

use serde::Deserialize;

const DEFAULT_SSH_PORT: u16 = 22;

/// SFTP login data. Either a password or a private key must be present;
/// checking that is up to whoever loads the credentials.
#[derive(Clone, Deserialize)]
pub struct Credentials {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub private_key_path: Option<PathBuf>,
    #[serde(default)]
    pub private_key_passphrase: Option<String>,
}

impl Credentials {
    pub fn has_auth_method(&self) -> bool {
        self.password.as_deref().is_some_and(|p| !p.is_empty()) || self.private_key_path.is_some()
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("private_key_path", &self.private_key_path)
            .field(
                "private_key_passphrase",
                &self.private_key_passphrase.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

fn default_port() -> u16 {
    DEFAULT_SSH_PORT
}
