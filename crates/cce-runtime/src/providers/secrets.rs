//! Secure credential handling for AI backends.
//!
//! API keys are wrapped in [`ApiCredential`] as soon as they are read, so
//! they cannot leak through `Debug`, `Display` or error messages. The raw
//! value is only reachable through [`ApiCredential::expose`], which backends
//! call at the point of setting a request header.
//!
//! ```ignore
//! let cred = ApiCredential::new(key, CredentialSource::Environment, "Anthropic API key");
//! request.header("x-api-key", cred.expose());
//! ```

use std::fmt;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer};

use super::AiClientError;

/// Where a credential was loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    /// Loaded from the settings file
    Config,
    /// Loaded from an environment variable
    Environment,
    /// Provided programmatically
    Programmatic,
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialSource::Config => write!(f, "config"),
            CredentialSource::Environment => write!(f, "environment"),
            CredentialSource::Programmatic => write!(f, "programmatic"),
        }
    }
}

/// A securely-stored API credential.
///
/// - `Debug` and `Display` show `[REDACTED]`
/// - the value is zeroed on drop by `secrecy`
/// - the source is tracked for configuration diagnostics
pub struct ApiCredential {
    value: SecretString,
    source: CredentialSource,
    name: &'static str,
}

impl ApiCredential {
    pub fn new(value: impl Into<String>, source: CredentialSource, name: &'static str) -> Self {
        Self {
            value: SecretString::from(value.into()),
            source,
            name,
        }
    }

    /// The credential, or a `NotConfigured` error telling the operator
    /// which settings key or environment variable to set.
    pub fn require<'a>(
        credential: Option<&'a ApiCredential>,
        settings_key: &str,
        env_var: &str,
        name: &str,
    ) -> Result<&'a ApiCredential, AiClientError> {
        credential.filter(|c| !c.is_empty()).ok_or_else(|| {
            AiClientError::NotConfigured(format!(
                "{} required: set '{}' in settings or {} environment variable",
                name, settings_key, env_var
            ))
        })
    }

    /// Expose the credential value for use in a request.
    ///
    /// Only call this where the value is actually sent. Never store it.
    pub fn expose(&self) -> &str {
        self.value.expose_secret()
    }

    pub fn is_empty(&self) -> bool {
        self.value.expose_secret().is_empty()
    }

    pub fn source(&self) -> CredentialSource {
        self.source
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub(crate) fn with_name(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }
}

impl Clone for ApiCredential {
    fn clone(&self) -> Self {
        Self::new(self.expose(), self.source, self.name)
    }
}

impl PartialEq for ApiCredential {
    fn eq(&self, other: &Self) -> bool {
        self.expose() == other.expose() && self.source == other.source
    }
}

impl fmt::Debug for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiCredential")
            .field("value", &"[REDACTED]")
            .field("source", &self.source)
            .field("name", &self.name)
            .finish()
    }
}

impl fmt::Display for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} from {} [REDACTED]", self.name, self.source)
    }
}

/// Keys in a settings file deserialize straight into a credential.
impl<'de> Deserialize<'de> for ApiCredential {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Ok(Self::new(value, CredentialSource::Config, "API key"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_redacted_in_debug() {
        let secret = "sk-super-secret-key-12345";
        let cred = ApiCredential::new(secret, CredentialSource::Environment, "Test API key");

        let debug = format!("{:?}", cred);
        assert!(!debug.contains(secret), "Secret exposed in Debug!");
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_credential_redacted_in_display() {
        let secret = "sk-super-secret-key-12345";
        let cred = ApiCredential::new(secret, CredentialSource::Config, "Test API key");

        let display = format!("{}", cred);
        assert!(!display.contains(secret), "Secret exposed in Display!");
        assert!(display.contains("Test API key"));
        assert!(display.contains("config"));
    }

    #[test]
    fn test_credential_expose_and_clone() {
        let cred = ApiCredential::new("sk-1", CredentialSource::Programmatic, "Test");
        let copy = cred.clone();
        assert_eq!(copy.expose(), "sk-1");
        assert_eq!(copy.source(), CredentialSource::Programmatic);
        assert_eq!(copy, cred);
    }

    #[test]
    fn test_require_reports_where_to_configure() {
        let err = ApiCredential::require(None, "anthropic.api_key", "ANTHROPIC_API_KEY", "Anthropic API key")
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("anthropic.api_key"));
        assert!(message.contains("ANTHROPIC_API_KEY"));

        let empty = ApiCredential::new("", CredentialSource::Config, "k");
        assert!(ApiCredential::require(Some(&empty), "k", "K", "key").is_err());

        let present = ApiCredential::new("v", CredentialSource::Config, "k");
        assert!(ApiCredential::require(Some(&present), "k", "K", "key").is_ok());
    }

    #[test]
    fn test_deserialize_from_settings() {
        let cred: ApiCredential = serde_yaml::from_str("\"sk-from-file\"").unwrap();
        assert_eq!(cred.expose(), "sk-from-file");
        assert_eq!(cred.source(), CredentialSource::Config);
    }
}
