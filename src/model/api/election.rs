use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{
    db::{slug_from_title, Candidate, Election, ElectionState, ElectionType, NewElection},
    mongodb::Id,
};

/// An election specification, as submitted by an admin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElectionSpec {
    /// Election title.
    pub title: String,
    /// URL slug; derived from the title if absent.
    #[serde(default)]
    pub slug: Option<String>,
    /// Initial state; defaults to [`ElectionState::Draft`].
    #[serde(default)]
    pub state: Option<ElectionState>,
    /// Voting window start.
    pub start_time: DateTime<Utc>,
    /// Voting window end.
    pub end_time: DateTime<Utc>,
    /// Single- or multiple-choice.
    pub election_type: ElectionType,
    /// Maximum number of selections for a multiple-choice election;
    /// defaults to 1 and is ignored for single-choice.
    #[serde(default)]
    pub max_selections: Option<u32>,
}

impl TryFrom<ElectionSpec> for NewElection {
    type Error = String;

    fn try_from(spec: ElectionSpec) -> Result<Self, Self::Error> {
        if spec.title.trim().is_empty() {
            return Err("Election title must not be empty.".to_string());
        }
        if spec.end_time <= spec.start_time {
            return Err("Election end time must be after its start time.".to_string());
        }
        let max_selections = match spec.election_type {
            ElectionType::SingleChoice => 1,
            ElectionType::MultipleChoice => spec.max_selections.unwrap_or(1),
        };
        if max_selections < 1 {
            return Err("An election must allow at least one selection.".to_string());
        }
        let slug = match spec.slug {
            Some(slug) if !slug.trim().is_empty() => slug_from_title(&slug),
            _ => slug_from_title(&spec.title),
        };
        if slug.is_empty() {
            return Err("Election title must contain at least one alphanumeric character.".to_string());
        }
        Ok(NewElection {
            title: spec.title,
            slug,
            state: spec.state.unwrap_or(ElectionState::Draft),
            start_time: spec.start_time,
            end_time: spec.end_time,
            election_type: spec.election_type,
            max_selections,
        })
    }
}

/// An API-friendly election description with plain datetime formats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionDescription {
    pub id: Id,
    pub title: String,
    pub slug: String,
    pub state: ElectionState,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub election_type: ElectionType,
    pub max_selections: u32,
}

impl From<Election> for ElectionDescription {
    fn from(election: Election) -> Self {
        Self {
            id: election.id,
            title: election.election.title,
            slug: election.election.slug,
            state: election.election.state,
            start_time: election.election.start_time,
            end_time: election.election.end_time,
            election_type: election.election.election_type,
            max_selections: election.election.max_selections,
        }
    }
}

/// An API-friendly candidate description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateDescription {
    pub id: Id,
    pub name: String,
    pub description: String,
    pub image_url: String,
    pub vote_count: i64,
    pub election_id: Id,
}

impl From<Candidate> for CandidateDescription {
    fn from(candidate: Candidate) -> Self {
        Self {
            id: candidate.id,
            name: candidate.candidate.name,
            description: candidate.candidate.description,
            image_url: candidate.candidate.image_url,
            vote_count: candidate.candidate.vote_count,
            election_id: candidate.candidate.election_id,
        }
    }
}

/// Everything a voter needs to render one election's voting page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionDetail {
    pub election: ElectionDescription,
    /// Candidates sorted by name.
    pub candidates: Vec<CandidateDescription>,
    /// Whether the requesting voter has already cast in this election.
    pub has_voted: bool,
}

/// A candidate specification, as submitted by an admin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateSpec {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    /// The election this candidate stands in; immutable after creation.
    pub election_id: Id,
}

/// Fields of a candidate that an admin may change after creation.
/// `election_id` and `vote_count` are deliberately absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CandidateUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
}
