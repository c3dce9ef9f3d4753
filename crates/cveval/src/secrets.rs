//! Resolution of the LLM API key (and any other credential) from config.
//!
//! A credential may be given in three ways, checked in this order:
//!
//! 1. **Inline** - `"api_key": "sk-..."`, handy for local experiments
//! 2. **File** - `"api_key_file": "/run/secrets/openai"`, the Docker secrets layout
//! 3. **Environment** - `"api_key_env": "OPENAI_API_KEY"`, the default for deployments

use secrecy::SecretString;
use std::fs;

/// Error type for credential resolution failures.
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("No credential source configured (need an inline value, a file path, or an env var name)")]
    NoSourceProvided,

    #[error("Failed to read credential from file '{path}': {source}")]
    FileReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Environment variable '{name}' not set")]
    EnvVarNotSet { name: String },

    #[error("Environment variable '{name}' contains invalid UTF-8")]
    EnvVarNotUnicode { name: String },

    #[error("Credential from {origin} is empty")]
    Empty { origin: String },
}

pub type Result<T> = std::result::Result<T, SecretError>;

/// Resolves a credential, trying the inline value, then the file, then the
/// environment variable. Empty strings count as "not configured".
pub fn resolve_secret(
    inline: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> Result<SecretString> {
    if let Some(value) = inline.filter(|v| !v.is_empty()) {
        return Ok(SecretString::from(value.to_string()));
    }

    if let Some(path) = file_path.filter(|p| !p.is_empty()) {
        let expanded = expand_home(path);
        let content = fs::read_to_string(&expanded).map_err(|e| SecretError::FileReadError {
            path: expanded.clone(),
            source: e,
        })?;
        let trimmed = content.trim();
        if trimmed.is_empty() {
            return Err(SecretError::Empty {
                origin: format!("file '{}'", expanded),
            });
        }
        return Ok(SecretString::from(trimmed.to_string()));
    }

    if let Some(name) = env_var.filter(|n| !n.is_empty()) {
        return match std::env::var(name) {
            // Env files frequently leave a trailing newline behind.
            Ok(value) if value.trim().is_empty() => Err(SecretError::Empty {
                origin: format!("env var '{}'", name),
            }),
            Ok(value) => Ok(SecretString::from(value.trim().to_string())),
            Err(std::env::VarError::NotPresent) => Err(SecretError::EnvVarNotSet {
                name: name.to_string(),
            }),
            Err(std::env::VarError::NotUnicode(_)) => Err(SecretError::EnvVarNotUnicode {
                name: name.to_string(),
            }),
        };
    }

    Err(SecretError::NoSourceProvided)
}

/// Expands a leading `~` (HOME, then USERPROFILE). `~user/...` is not supported.
fn expand_home(path: &str) -> String {
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            let home = home.to_string_lossy();
            if path == "~" {
                return home.into_owned();
            }
            return path.replacen('~', &home, 1);
        }
    }
    path.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    #[serial]
    fn test_inline_value_wins() {
        std::env::set_var("CVEVAL_TEST_KEY_1", "from-env");
        let key = resolve_secret(Some("inline"), None, Some("CVEVAL_TEST_KEY_1")).unwrap();
        assert_eq!(key.expose_secret(), "inline");
        std::env::remove_var("CVEVAL_TEST_KEY_1");
    }

    #[test]
    #[serial]
    fn test_file_beats_env() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "from-file").unwrap();

        std::env::set_var("CVEVAL_TEST_KEY_2", "from-env");
        let key = resolve_secret(
            None,
            Some(file.path().to_str().unwrap()),
            Some("CVEVAL_TEST_KEY_2"),
        )
        .unwrap();
        assert_eq!(key.expose_secret(), "from-file");
        std::env::remove_var("CVEVAL_TEST_KEY_2");
    }

    #[test]
    #[serial]
    fn test_env_fallback_is_trimmed() {
        std::env::set_var("CVEVAL_TEST_KEY_3", "sk-123\n");
        let key = resolve_secret(None, None, Some("CVEVAL_TEST_KEY_3")).unwrap();
        assert_eq!(key.expose_secret(), "sk-123");
        std::env::remove_var("CVEVAL_TEST_KEY_3");
    }

    #[test]
    #[serial]
    fn test_missing_env_var() {
        std::env::remove_var("CVEVAL_TEST_KEY_4");
        let result = resolve_secret(None, None, Some("CVEVAL_TEST_KEY_4"));
        assert!(matches!(result, Err(SecretError::EnvVarNotSet { .. })));
    }

    #[test]
    fn test_empty_file_rejected() {
        let file = NamedTempFile::new().unwrap();
        let result = resolve_secret(None, Some(file.path().to_str().unwrap()), None);
        assert!(matches!(result, Err(SecretError::Empty { .. })));
    }

    #[test]
    fn test_unreadable_file() {
        let result = resolve_secret(None, Some("/nonexistent/cveval/key"), None);
        assert!(matches!(result, Err(SecretError::FileReadError { .. })));
    }

    #[test]
    fn test_empty_sources_are_not_configured() {
        assert!(matches!(
            resolve_secret(None, Some(""), Some("")),
            Err(SecretError::NoSourceProvided)
        ));
        assert!(matches!(
            resolve_secret(None, None, None),
            Err(SecretError::NoSourceProvided)
        ));
    }
}
