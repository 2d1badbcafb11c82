use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Maximum length of a user or device identifier.
pub const MAX_IDENTIFIER_LEN: usize = 64;

fn validate_identifier(value: &str) -> Result<(), TypeError> {
    let fail = |reason: &str| TypeError::InvalidIdentifier {
        value: value.to_string(),
        reason: reason.to_string(),
    };
    if value.is_empty() {
        return Err(fail("empty"));
    }
    if value.len() > MAX_IDENTIFIER_LEN {
        return Err(fail("too long"));
    }
    // Identifiers become path segments of cloud keys.
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
    {
        return Err(fail("only ASCII letters, digits, '_', '-' and '.' are allowed"));
    }
    Ok(())
}

/// Account identifier used as the first segment of cloud keys.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    /// Validate and wrap a user identifier.
    pub fn new(value: impl Into<String>) -> Result<Self, TypeError> {
        let value = value.into();
        validate_identifier(&value)?;
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Identifier of the device (installation) that produced a save.
///
/// Device identifiers appear in cloud object keys and in conflict records,
/// where they name the origin of each divergent version.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceId(String);

impl DeviceId {
    /// Validate and wrap a device identifier.
    pub fn new(value: impl Into<String>) -> Result<Self, TypeError> {
        let value = value.into();
        validate_identifier(&value)?;
        Ok(Self(value))
    }

    /// Generate a fresh, time-ordered device identifier (UUID v7, simple form).
    pub fn generate() -> Self {
        Self(uuid::Uuid::now_v7().simple().to_string())
    }

    /// Placeholder origin for copies written before origins were recorded.
    pub fn unknown() -> Self {
        Self("unknown".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short identifier (first 8 characters) for log lines.
    pub fn short_id(&self) -> &str {
        let end = self.0.len().min(8);
        &self.0[..end]
    }
}

macro_rules! identifier_impls {
    ($ty:ident) => {
        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($ty), self.0)
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl TryFrom<String> for $ty {
            type Error = TypeError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$ty> for String {
            fn from(value: $ty) -> Self {
                value.0
            }
        }
    };
}

identifier_impls!(UserId);
identifier_impls!(DeviceId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_simple_identifiers() {
        assert!(UserId::new("player_42").is_ok());
        assert!(DeviceId::new("steamdeck-01.home").is_ok());
    }

    #[test]
    fn rejects_path_separators() {
        assert!(UserId::new("a/b").is_err());
        assert!(DeviceId::new("dev\\ice").is_err());
    }

    #[test]
    fn rejects_empty_and_long() {
        assert!(UserId::new("").is_err());
        assert!(DeviceId::new("x".repeat(MAX_IDENTIFIER_LEN + 1)).is_err());
        assert!(DeviceId::new("x".repeat(MAX_IDENTIFIER_LEN)).is_ok());
    }

    #[test]
    fn generated_devices_are_unique_and_valid() {
        let a = DeviceId::generate();
        let b = DeviceId::generate();
        assert_ne!(a, b);
        assert!(DeviceId::new(a.as_str()).is_ok());
        assert_eq!(a.short_id().len(), 8);
    }

    #[test]
    fn serde_validates_on_deserialize() {
        let ok: DeviceId = serde_json::from_str("\"laptop\"").unwrap();
        assert_eq!(ok.as_str(), "laptop");
        let bad: Result<DeviceId, _> = serde_json::from_str("\"lap/top\"");
        assert!(bad.is_err());
    }
}
