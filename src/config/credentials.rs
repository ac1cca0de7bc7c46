//! Database credentials file
//!
//! A plain-text file with the user name on the first line and the password on the
//! second. Surrounding whitespace is stripped from both.

use std::fmt;
use std::path::Path;

use super::{ConfigError, ConfigResult};

/// Database user and password
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl Credentials {
    /// Read credentials from a two-line file
    pub fn read(path: &Path) -> ConfigResult<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Credentials {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        Self::parse(&content).map_err(|message| ConfigError::Credentials {
            path: path.to_path_buf(),
            message,
        })
    }

    /// Parse credentials from file content
    pub fn parse(content: &str) -> Result<Self, String> {
        let mut lines = content.lines();
        let user = lines.next().map(str::trim).unwrap_or_default();
        let password = lines
            .next()
            .map(str::trim)
            .ok_or_else(|| "expected two lines (user, password)".to_string())?;
        if user.is_empty() {
            return Err("user name on the first line is empty".to_string());
        }
        Ok(Self {
            user: user.to_string(),
            password: password.to_string(),
        })
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"****")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_two_lines() {
        let creds = Credentials::parse("  etl_user \n s3cret\n").unwrap();
        assert_eq!(creds.user, "etl_user");
        assert_eq!(creds.password, "s3cret");
    }

    #[test]
    fn test_parse_rejects_single_line() {
        assert!(Credentials::parse("etl_user\n").is_err());
        assert!(Credentials::parse("").is_err());
    }

    #[test]
    fn test_parse_rejects_empty_user() {
        assert!(Credentials::parse("\npassword\n").is_err());
    }

    #[test]
    fn test_debug_masks_password() {
        let creds = Credentials::parse("u\nhunter2\n").unwrap();
        let debug = format!("{:?}", creds);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("****"));
    }

    #[test]
    fn test_read_missing_file() {
        let dir = tempdir().unwrap();
        let err = Credentials::read(&dir.path().join("missing.txt")).unwrap_err();
        assert!(matches!(err, ConfigError::Credentials { .. }));
    }
}
