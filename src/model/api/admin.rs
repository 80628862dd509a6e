use serde::{Deserialize, Serialize};

/// Raw admin credentials, received from a user. These are never stored directly,
/// since the password is in plaintext.
#[derive(Clone, Deserialize, Serialize)]
pub struct AdminCredentials {
    pub username: String,
    pub password: String,
}

/// Additions to the voter roll: a single email, a bulk list, or both.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RollAddRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emails: Option<Vec<String>>,
}

impl RollAddRequest {
    /// Flatten into a single list of raw emails.
    pub fn into_emails(self) -> Vec<String> {
        let mut emails = self.emails.unwrap_or_default();
        if let Some(email) = self.email {
            emails.push(email);
        }
        emails
    }
}

/// How a roll addition went: how many entries landed, and how many were
/// skipped as duplicates or implausible addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollAddResponse {
    pub added: u64,
    pub skipped: u64,
}

#[cfg(test)]
mod examples {
    use super::*;

    impl AdminCredentials {
        /// Matches [`NewAdmin::example`].
        pub fn example1() -> Self {
            Self {
                username: "coordinator".into(),
                password: "correct horse battery staple".into(),
            }
        }

        pub fn empty() -> Self {
            Self {
                username: "".into(),
                password: "".into(),
            }
        }
    }
}
