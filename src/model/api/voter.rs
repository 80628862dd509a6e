use serde::{Deserialize, Serialize};

use crate::model::{db::Voter, mongodb::Id};

/// A voter's own profile, returned after sign-in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoterDescription {
    pub id: Id,
    pub email: String,
    pub name: String,
    pub profile_image_url: String,
}

impl From<Voter> for VoterDescription {
    fn from(voter: Voter) -> Self {
        Self {
            id: voter.id,
            email: voter.voter.email,
            name: voter.voter.name,
            profile_image_url: voter.voter.profile_image_url,
        }
    }
}
