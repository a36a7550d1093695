//! GitHub token lookup
//!
//! The token comes from the `GITHUB_TOKEN` environment variable when set,
//! otherwise from `~/.config/pulse/secrets.toml`:
//!
//! ```toml
//! [github]
//! token = "ghp_..."
//! ```
//!
//! The secrets file is kept apart from `config.toml` so the config can be
//! shared, and on Unix it must not be readable by group or others.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::{Error, Result};

/// Environment variable consulted before the secrets file
pub const TOKEN_ENV: &str = "GITHUB_TOKEN";

/// Contents of the secrets file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Secrets {
    pub github: GitHubSecrets,
}

#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct GitHubSecrets {
    /// Personal access token
    pub token: Option<String>,
}

impl std::fmt::Debug for GitHubSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubSecrets")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Secrets {
    /// Load the secrets file from its default location
    ///
    /// A missing file yields empty secrets.
    pub fn load() -> Result<Self> {
        match Self::default_secrets_path() {
            Some(path) if path.exists() => Self::load_from_file(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load a secrets file, refusing ones with loose permissions
    pub fn load_from_file(path: &Path) -> Result<Self> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;

            let mode = std::fs::metadata(path).map_err(Error::Io)?.permissions().mode();
            if mode & 0o077 != 0 {
                return Err(Error::Config(format!(
                    "Secrets file {} has insecure permissions {:o}; run: chmod 600 {}",
                    path.display(),
                    mode & 0o777,
                    path.display()
                )));
            }
        }

        let contents = std::fs::read_to_string(path).map_err(Error::Io)?;
        toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("Failed to parse secrets: {}", e)))
    }

    /// `~/.config/pulse/secrets.toml` on Unix
    pub fn default_secrets_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("pulse").join("secrets.toml"))
    }

    /// Resolve the token, preferring `GITHUB_TOKEN`
    pub fn github_token(&self) -> Option<String> {
        self.github_token_with(std::env::var(TOKEN_ENV).ok())
    }

    /// Resolve the token given the value of the environment variable
    pub fn github_token_with(&self, env_token: Option<String>) -> Option<String> {
        let clean = |t: &str| Some(t.trim().to_string()).filter(|t| !t.is_empty());

        if let Some(token) = env_token.as_deref().and_then(clean) {
            debug!("Using GitHub token from {}", TOKEN_ENV);
            return Some(token);
        }

        let token = self.github.token.as_deref().and_then(clean);
        if token.is_some() {
            debug!("Using GitHub token from secrets file");
        }
        token
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn from_file(token: &str) -> Secrets {
        Secrets {
            github: GitHubSecrets {
                token: Some(token.to_string()),
            },
        }
    }

    #[test]
    fn test_env_token_wins() {
        let secrets = from_file("ghp_file");
        assert_eq!(
            secrets.github_token_with(Some("ghp_env".to_string())),
            Some("ghp_env".to_string())
        );
    }

    #[test]
    fn test_blank_env_falls_back_to_file() {
        let secrets = from_file("  ghp_file \n");
        assert_eq!(
            secrets.github_token_with(Some("   ".to_string())),
            Some("ghp_file".to_string())
        );
    }

    #[test]
    fn test_no_token_anywhere() {
        assert!(Secrets::default().github_token_with(None).is_none());
        assert!(from_file("").github_token_with(None).is_none());
    }

    #[test]
    fn test_debug_redacts_token() {
        let rendered = format!("{:?}", from_file("ghp_secret"));
        assert!(!rendered.contains("ghp_secret"));
        assert!(rendered.contains("redacted"));
    }

    #[cfg(unix)]
    #[test]
    fn test_insecure_permissions_rejected() {
        use std::os::unix::fs::PermissionsExt;

        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[github]\ntoken = \"test\"").unwrap();
        std::fs::set_permissions(file.path(), std::fs::Permissions::from_mode(0o644)).unwrap();

        let err = Secrets::load_from_file(file.path()).unwrap_err();
        assert!(err.to_string().contains("insecure permissions"));
    }

    #[cfg(unix)]
    #[test]
    fn test_secure_permissions_accepted() {
        use std::os::unix::fs::PermissionsExt;

        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[github]\ntoken = \"ghp_test\"").unwrap();
        std::fs::set_permissions(file.path(), std::fs::Permissions::from_mode(0o600)).unwrap();

        let secrets = Secrets::load_from_file(file.path()).unwrap();
        assert_eq!(secrets.github_token_with(None), Some("ghp_test".to_string()));
    }
}
