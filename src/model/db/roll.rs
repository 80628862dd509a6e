use std::ops::Deref;

use serde::{Deserialize, Serialize};

use crate::model::mongodb::Id;

/// An entry on the voter eligibility roll: an allow-listed email address.
///
/// The roll is independent of voter records; it gates authentication, not
/// vote casting (an already-authenticated voter is trusted by the core).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollEntryCore {
    /// Normalised email address; unique.
    pub email: String,
}

impl RollEntryCore {
    pub fn new(email: &str) -> Self {
        Self {
            email: normalize_email(email),
        }
    }
}

/// A new roll entry ready for DB insertion.
pub type NewRollEntry = RollEntryCore;

/// A roll entry from the database, with its unique ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollEntry {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub entry: RollEntryCore,
}

impl Deref for RollEntry {
    type Target = RollEntryCore;

    fn deref(&self) -> &Self::Target {
        &self.entry
    }
}

/// Normalise an email for comparison against the roll and the voter
/// collection: trimmed and lowercased.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Cheap shape check; real address verification is the identity provider's
/// problem.
pub fn is_plausible_email(email: &str) -> bool {
    let email = email.trim();
    match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.'),
        None => false,
    }
}
