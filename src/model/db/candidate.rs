use std::ops::{Deref, DerefMut};

use serde::{Deserialize, Serialize};

use crate::model::mongodb::Id;

/// Core candidate data, as stored in the database.
///
/// `vote_count` is denormalised from the ballot ledger and is only ever
/// modified through atomic `$inc` updates inside the vote-cast transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateCore {
    pub name: String,
    pub description: String,
    pub image_url: String,
    pub vote_count: i64,
    /// Owning election; immutable after creation.
    pub election_id: Id,
}

impl CandidateCore {
    /// A freshly-created candidate with no votes.
    pub fn new(name: String, description: String, image_url: String, election_id: Id) -> Self {
        Self {
            name,
            description,
            image_url,
            vote_count: 0,
            election_id,
        }
    }
}

/// A new candidate ready for DB insertion is just a candidate without an ID.
pub type NewCandidate = CandidateCore;

/// A candidate from the database, with its unique ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub candidate: CandidateCore,
}

impl Deref for Candidate {
    type Target = CandidateCore;

    fn deref(&self) -> &Self::Target {
        &self.candidate
    }
}

impl DerefMut for Candidate {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.candidate
    }
}
