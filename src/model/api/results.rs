use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{db::Candidate, mongodb::Id};

use super::election::ElectionDescription;

/// One candidate's share of the vote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateResult {
    pub id: Id,
    pub name: String,
    pub description: String,
    pub image_url: String,
    pub vote_count: i64,
    /// Share of the total vote, rounded to two decimal places;
    /// zero when no votes have been cast.
    pub percentage: f64,
}

impl CandidateResult {
    pub fn new(candidate: Candidate, total_votes: i64) -> Self {
        Self {
            id: candidate.id,
            percentage: percentage(candidate.vote_count, total_votes),
            name: candidate.candidate.name,
            description: candidate.candidate.description,
            image_url: candidate.candidate.image_url,
            vote_count: candidate.candidate.vote_count,
        }
    }
}

/// Aggregated results for one election, as shown to the public once the
/// election is closed. Contains no voter identities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElectionResults {
    pub election: ElectionDescription,
    /// Candidates sorted by vote count, descending.
    pub candidates: Vec<CandidateResult>,
    pub total_votes: i64,
}

/// Participation analytics for admins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElectionAnalytics {
    /// Size of the voter roll.
    pub total_eligible_voters: u64,
    /// Distinct voters who have cast in this election.
    pub total_votes_cast: u64,
    /// `total_votes_cast / total_eligible_voters`, as a percentage rounded to
    /// two decimal places; zero when the roll is empty.
    pub turnout_percentage: f64,
    /// Total ballots across all candidates.
    pub total_votes: i64,
}

/// Full admin view of one election's results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdminElectionResults {
    pub election: ElectionDescription,
    pub candidates: Vec<CandidateResult>,
    pub analytics: ElectionAnalytics,
}

/// One entry in the anonymised vote log. Voter identity is deliberately
/// absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteLogEntry {
    pub id: Id,
    pub election_title: String,
    pub candidate_name: String,
    pub cast_at: DateTime<Utc>,
}

/// A share as a percentage, rounded to two decimal places. Zero when the
/// denominator is zero.
pub fn percentage(part: i64, total: i64) -> f64 {
    if total == 0 {
        0.0
    } else {
        (part as f64 / total as f64 * 10000.0).round() / 100.0
    }
}
