use crate::error::{Result, X402Error};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Stored agent credentials. Every field is optional; the file may be partially filled.
#[derive(Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub private_key: Option<String>,
    pub wallet: Option<String>,
    pub model: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("private_key", &self.private_key.as_ref().map(|_| "<redacted>"))
            .field("wallet", &self.wallet)
            .field("model", &self.model)
            .finish()
    }
}

/// Read-only view of wherever credentials live. Writing them is someone else's job.
pub trait CredentialStore: Send + Sync {
    fn get_credentials(&self) -> Result<Credentials>;
}

/// Credentials kept as a JSON object on disk.
#[derive(Debug, Clone)]
pub struct FileCredentials {
    path: PathBuf,
}

impl FileCredentials {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialStore for FileCredentials {
    fn get_credentials(&self) -> Result<Credentials> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No credentials file at {}", self.path.display());
                return Ok(Credentials::default());
            }
            Err(e) => {
                return Err(X402Error::Credentials(format!(
                    "cannot read {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };

        serde_json::from_str(&contents).map_err(|e| {
            X402Error::Credentials(format!("malformed {}: {}", self.path.display(), e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_means_no_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentials::new(dir.path().join("credentials.json"));
        let creds = store.get_credentials().unwrap();
        assert!(creds.private_key.is_none());
        assert!(creds.model.is_none());
    }

    #[test]
    fn reads_partial_file_and_redacts_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        std::fs::write(&path, r#"{"privateKey":"0xsecret","model":"gpt-4o-mini"}"#).unwrap();

        let creds = FileCredentials::new(&path).get_credentials().unwrap();
        assert_eq!(creds.private_key.as_deref(), Some("0xsecret"));
        assert_eq!(creds.model.as_deref(), Some("gpt-4o-mini"));
        assert!(creds.wallet.is_none());
        assert!(!format!("{:?}", creds).contains("secret"));
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        std::fs::write(&path, "{").unwrap();
        assert!(matches!(
            FileCredentials::new(&path).get_credentials(),
            Err(X402Error::Credentials(_))
        ));
    }
}
