use chrono::{serde::ts_seconds, DateTime, Utc};
use jsonwebtoken::{DecodingKey, TokenData, Validation};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::Error;

/// A signed identity assertion handed to us by the frontend once the voter has
/// completed sign-in with the external identity provider.
///
/// The gateway signs these with a secret shared with this backend, so a
/// successful decode proves the assertion is genuine and fresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityClaims {
    /// Stable subject identifier assigned by the provider.
    pub sub: String,
    /// Email address as reported by the provider.
    pub email: String,
    /// Display name, if the provider supplies one.
    #[serde(default)]
    pub name: Option<String>,
    /// Profile image, if any.
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(rename = "exp", with = "ts_seconds")]
    pub expire_at: DateTime<Utc>,
}

impl IdentityClaims {
    /// Verify the signature and expiry of an identity token.
    pub fn verify(token: &str, config: &Config) -> Result<Self, Error> {
        let data: TokenData<Self> = jsonwebtoken::decode(
            token,
            &DecodingKey::from_secret(config.identity_secret()),
            &Validation::default(),
        )?;
        Ok(data.claims)
    }
}

/// Request body for completing voter sign-in.
#[derive(Debug, Serialize, Deserialize)]
pub struct VoterCallback {
    pub identity_token: String,
}

/// Example data for tests.
#[cfg(test)]
mod examples {
    use jsonwebtoken::{EncodingKey, Header};

    use super::*;

    impl IdentityClaims {
        pub fn example() -> Self {
            Self::example_for("voter@example.com")
        }

        pub fn example_for(email: &str) -> Self {
            Self {
                sub: format!("identity|{email}"),
                email: email.to_string(),
                name: Some("Example Voter".to_string()),
                avatar_url: None,
                expire_at: Utc::now() + chrono::Duration::hours(1),
            }
        }

        /// Sign these claims the way the identity gateway would.
        pub fn sign(&self, config: &Config) -> String {
            jsonwebtoken::encode(
                &Header::default(),
                self,
                &EncodingKey::from_secret(config.identity_secret()),
            )
            .unwrap()
        }
    }
}
