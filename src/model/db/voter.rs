use std::ops::{Deref, DerefMut};

use serde::{Deserialize, Serialize};

use crate::model::mongodb::Id;

/// Core voter data, as stored in the database.
///
/// Voters are created lazily: the first successful authentication of an
/// eligible identity inserts a record, later logins refresh the profile
/// fields. Voter identity never appears in any public or admin-facing
/// listing of votes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoterCore {
    /// Normalised (lowercased, trimmed) email address; unique.
    pub email: String,
    /// Display name.
    pub name: String,
    /// Subject identifier from the external identity provider; unique.
    pub identity_ref: String,
    /// Profile image reference, if any.
    pub profile_image_url: String,
}

/// A new voter ready for DB insertion is just a voter without an ID.
pub type NewVoter = VoterCore;

/// A voter from the database, with its unique ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voter {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub voter: VoterCore,
}

impl Deref for Voter {
    type Target = VoterCore;

    fn deref(&self) -> &Self::Target {
        &self.voter
    }
}

impl DerefMut for Voter {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.voter
    }
}
