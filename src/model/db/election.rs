use std::ops::{Deref, DerefMut};

use chrono::{DateTime, Utc};
use mongodb::bson::{serde_helpers::chrono_datetime_as_bson_datetime, to_bson, Bson};
use serde::{Deserialize, Serialize};

use crate::model::mongodb::Id;

/// States in the election lifecycle.
///
/// The data model does not force transitions to be one-way; an admin update
/// may move an election between any two states, so a closed election can be
/// reopened.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElectionState {
    /// Under construction, only visible to admins.
    Draft,
    /// Open for voting (within the time window).
    Active,
    /// Finished; results become publicly visible.
    Closed,
}

impl From<ElectionState> for Bson {
    fn from(state: ElectionState) -> Self {
        to_bson(&state).expect("Serialisation is infallible")
    }
}

/// How many candidates a single cast operation may select.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElectionType {
    /// Exactly one candidate per voter.
    SingleChoice,
    /// Up to `max_selections` distinct candidates per voter.
    MultipleChoice,
}

impl From<ElectionType> for Bson {
    fn from(election_type: ElectionType) -> Self {
        to_bson(&election_type).expect("Serialisation is infallible")
    }
}

/// Core election data, as stored in the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionCore {
    /// Human-readable election title.
    pub title: String,
    /// URL-friendly unique slug, derived from the title when not given.
    pub slug: String,
    /// Lifecycle state.
    pub state: ElectionState,
    /// Start of the voting window.
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub start_time: DateTime<Utc>,
    /// End of the voting window; strictly after `start_time`.
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub end_time: DateTime<Utc>,
    /// Selection cardinality rule.
    pub election_type: ElectionType,
    /// Maximum selections per voter; only meaningful for `MultipleChoice`.
    pub max_selections: u32,
}

impl ElectionCore {
    /// Is this election open for voting at the given instant?
    pub fn is_open_at(&self, now: DateTime<Utc>) -> bool {
        self.state == ElectionState::Active && self.start_time <= now && now <= self.end_time
    }
}

/// A new election ready for DB insertion is just an election without an ID.
pub type NewElection = ElectionCore;

/// An election from the database, with its unique ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Election {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub election: ElectionCore,
}

impl Deref for Election {
    type Target = ElectionCore;

    fn deref(&self) -> &Self::Target {
        &self.election
    }
}

impl DerefMut for Election {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.election
    }
}

/// Derive a URL-friendly slug from an election title: lowercase, runs of
/// non-alphanumeric characters collapsed to single dashes, no leading or
/// trailing dash.
pub fn slug_from_title(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_dash = false;
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            slug.push(c.to_ascii_lowercase());
            pending_dash = false;
        } else {
            pending_dash = true;
        }
    }
    slug
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    #[test]
    fn slugs_from_titles() {
        assert_eq!(slug_from_title("Board Election 2024"), "board-election-2024");
        assert_eq!(slug_from_title("  Hello,   World!  "), "hello-world");
        assert_eq!(slug_from_title("already-a-slug"), "already-a-slug");
        assert_eq!(slug_from_title("???"), "");
    }

    #[test]
    fn open_window() {
        let now = Utc::now();
        let mut election = ElectionCore {
            title: "Test".to_string(),
            slug: "test".to_string(),
            state: ElectionState::Active,
            start_time: now - Duration::hours(1),
            end_time: now + Duration::hours(1),
            election_type: ElectionType::SingleChoice,
            max_selections: 1,
        };
        assert!(election.is_open_at(now));

        // Outside the window.
        assert!(!election.is_open_at(now - Duration::hours(2)));
        assert!(!election.is_open_at(now + Duration::hours(2)));

        // Wrong state.
        election.state = ElectionState::Draft;
        assert!(!election.is_open_at(now));
        election.state = ElectionState::Closed;
        assert!(!election.is_open_at(now));
    }
}
