//! Device login credentials and the shared password policy

use super::ModelError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const PASSWORD_KEY: &str = "password";
pub const SSH_KEY: &str = "ssh-key";

/// Characters accepted as the "special" class of the password policy.
pub const SPECIAL_CHARS: &str = "!@#$%^&*()-_=+[]{}<>?.,;:~";

const MIN_PASSWORD_LEN: usize = 12;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(rename = "loginID")]
    pub login_id: String,
    /// `password` and/or `ssh-key`
    #[serde(default)]
    pub keys: BTreeMap<String, String>,
}

impl Credentials {
    pub fn with_password(login_id: &str, password: &str) -> Self {
        let mut keys = BTreeMap::new();
        keys.insert(PASSWORD_KEY.to_string(), password.to_string());
        Self {
            login_id: login_id.to_string(),
            keys,
        }
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        if self.login_id.trim().is_empty() {
            return Err(ModelError::validation("credentials need a loginID"));
        }
        if self.keys.is_empty() {
            return Err(ModelError::validation(
                "credentials need a password or an ssh-key",
            ));
        }

        for (kind, secret) in &self.keys {
            match kind.as_str() {
                PASSWORD_KEY => validate_password(secret)?,
                SSH_KEY => {
                    if secret.trim().is_empty() {
                        return Err(ModelError::validation("ssh-key must not be empty"));
                    }
                }
                other => {
                    return Err(ModelError::validation(format!(
                        "unknown credential key kind: {}",
                        other
                    )))
                }
            }
        }
        Ok(())
    }
}

/// At least 12 characters with lower, upper, digit and one of [`SPECIAL_CHARS`].
pub fn validate_password(password: &str) -> Result<(), ModelError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ModelError::validation(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    if !password.chars().any(|c| c.is_ascii_lowercase()) {
        return Err(ModelError::validation(
            "password must contain a lowercase letter",
        ));
    }
    if !password.chars().any(|c| c.is_ascii_uppercase()) {
        return Err(ModelError::validation(
            "password must contain an uppercase letter",
        ));
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err(ModelError::validation("password must contain a digit"));
    }
    if !password.chars().any(|c| SPECIAL_CHARS.contains(c)) {
        return Err(ModelError::validation(format!(
            "password must contain one of {}",
            SPECIAL_CHARS
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_length_boundary() {
        // 11 个字符，四类字符齐全
        assert!(validate_password("Abcdefg12!x").is_err());
        // 12 个字符但缺少特殊字符
        assert!(validate_password("Abcdefgh1234").is_err());
        // 12 个字符，四类字符齐全
        assert!(validate_password("Abcdefgh123!").is_ok());
    }

    #[test]
    fn test_password_missing_classes() {
        assert!(validate_password("abcdefgh123!").is_err());
        assert!(validate_password("ABCDEFGH123!").is_err());
        assert!(validate_password("Abcdefghijk!").is_err());
    }

    #[test]
    fn test_credentials_validation() {
        let creds = Credentials::with_password("admin", "Sup3rSecret!x");
        creds.validate().unwrap();

        let mut bad = creds.clone();
        bad.login_id.clear();
        assert!(bad.validate().is_err());

        let mut unknown = creds.clone();
        unknown.keys.insert("token".to_string(), "abc".to_string());
        assert!(unknown.validate().is_err());

        let empty = Credentials {
            login_id: "admin".to_string(),
            keys: BTreeMap::new(),
        };
        assert!(empty.validate().is_err());
    }

    #[test]
    fn test_credentials_wire_names() {
        let creds = Credentials::with_password("root", "Sup3rSecret!x");
        let json = serde_json::to_value(&creds).unwrap();
        assert_eq!(json["loginID"], "root");
        assert_eq!(json["keys"]["password"], "Sup3rSecret!x");
    }
}
