//! Signing credentials

use crate::error::{ConfigError, Result};
use std::fmt;

pub const PRIVATE_KEY_ENV: &str = "TREASURY_PRIVATE_KEY";

/// Hex-encoded secp256k1 signing key, without the `0x` prefix
#[derive(Clone)]
pub struct Credentials {
    private_key: String,
}

impl Credentials {
    /// Read and sanity-check `TREASURY_PRIVATE_KEY`
    pub fn from_env() -> Result<Self> {
        match std::env::var(PRIVATE_KEY_ENV) {
            Ok(raw) => Self::parse(&raw),
            Err(_) => Err(ConfigError::MissingCredential(PRIVATE_KEY_ENV)),
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        let key = trimmed.strip_prefix("0x").unwrap_or(trimmed);

        if key.is_empty() {
            return Err(ConfigError::MissingCredential(PRIVATE_KEY_ENV));
        }
        if key.len() != 64 {
            return Err(ConfigError::InvalidCredential {
                name: PRIVATE_KEY_ENV,
                reason: format!("expected 64 hex characters, got {}", key.len()),
            });
        }
        hex::decode(key).map_err(|e| ConfigError::InvalidCredential {
            name: PRIVATE_KEY_ENV,
            reason: e.to_string(),
        })?;

        Ok(Self {
            private_key: key.to_string(),
        })
    }

    pub fn private_key_hex(&self) -> &str {
        &self.private_key
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("private_key", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";

    #[test]
    fn test_parse_strips_prefix() {
        let creds = Credentials::parse(KEY).unwrap();
        assert_eq!(creds.private_key_hex(), &KEY[2..]);
    }

    #[test]
    fn test_debug_redacts_key() {
        let creds = Credentials::parse(KEY).unwrap();
        let rendered = format!("{:?}", creds);
        assert!(!rendered.contains(&KEY[2..]));
        assert!(rendered.contains("redacted"));
    }

    #[test]
    fn test_rejects_short_and_non_hex_keys() {
        assert!(matches!(
            Credentials::parse("0xabc"),
            Err(ConfigError::InvalidCredential { .. })
        ));
        let bad = "zz".repeat(32);
        assert!(matches!(
            Credentials::parse(&bad),
            Err(ConfigError::InvalidCredential { .. })
        ));
        assert!(matches!(
            Credentials::parse("  "),
            Err(ConfigError::MissingCredential(_))
        ));
    }
}
