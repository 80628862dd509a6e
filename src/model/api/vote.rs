use serde::{Deserialize, Serialize};

use crate::engine::Selection;
use crate::model::mongodb::Id;

/// A vote submission. Exactly one of `candidate_id` (single-choice) and
/// `candidate_ids` (multiple-choice) must be present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteRequest {
    pub election_id: Id,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate_id: Option<Id>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate_ids: Option<Vec<Id>>,
}

impl VoteRequest {
    /// Extract the selection, rejecting ambiguous or empty submissions.
    pub fn into_selection(self) -> Result<Selection, String> {
        match (self.candidate_id, self.candidate_ids) {
            (Some(id), None) => Ok(Selection::Single(id)),
            (None, Some(ids)) => Ok(Selection::Multiple(ids)),
            (Some(_), Some(_)) => {
                Err("Provide either candidate_id or candidate_ids, not both.".to_string())
            }
            (None, None) => Err("No candidate selection provided.".to_string()),
        }
    }
}

/// Confirmation returned to the voter after a successful cast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CastReceipt {
    /// IDs of the ballots written by this cast operation.
    pub ballot_ids: Vec<Id>,
}
