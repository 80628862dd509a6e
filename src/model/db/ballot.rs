//! The ballot ledger: append-only ballots plus one vote record per cast
//! operation.
//!
//! The unique index on `(election_id, voter_id)` over vote records is the
//! authoritative "already voted" constraint for both election types; the
//! unique index on `(election_id, voter_id, candidate_id)` over ballots
//! additionally forbids duplicate candidate picks. Both are created by
//! [`crate::model::mongodb::ensure_indexes_exist`].

use std::ops::Deref;

use chrono::{DateTime, Utc};
use mongodb::{
    bson::{doc, serde_helpers::chrono_datetime_as_bson_datetime},
    error::Error as DbError,
    ClientSession,
};
use serde::{Deserialize, Serialize};

use crate::model::mongodb::{Coll, Id};

/// One recorded choice of one voter for one candidate in one election.
/// Immutable; deleted only when the owning election is deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BallotCore {
    pub voter_id: Id,
    pub election_id: Id,
    pub candidate_id: Id,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub cast_at: DateTime<Utc>,
}

impl BallotCore {
    pub fn new(voter_id: Id, election_id: Id, candidate_id: Id, cast_at: DateTime<Utc>) -> Self {
        Self {
            voter_id,
            election_id,
            candidate_id,
            cast_at,
        }
    }
}

/// A new ballot ready for DB insertion is just a ballot without an ID.
pub type NewBallot = BallotCore;

/// A ballot from the database, with its unique ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ballot {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub ballot: BallotCore,
}

impl Deref for Ballot {
    type Target = BallotCore;

    fn deref(&self) -> &Self::Target {
        &self.ballot
    }
}

/// Marker for a completed cast operation by one voter in one election,
/// regardless of how many ballots it produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRecordCore {
    pub voter_id: Id,
    pub election_id: Id,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub cast_at: DateTime<Utc>,
    pub num_selections: u32,
}

impl VoteRecordCore {
    pub fn new(voter_id: Id, election_id: Id, num_selections: u32, cast_at: DateTime<Utc>) -> Self {
        Self {
            voter_id,
            election_id,
            cast_at,
            num_selections,
        }
    }
}

/// A new vote record ready for DB insertion.
pub type NewVoteRecord = VoteRecordCore;

/// A vote record from the database, with its unique ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRecord {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub record: VoteRecordCore,
}

impl Deref for VoteRecord {
    type Target = VoteRecordCore;

    fn deref(&self) -> &Self::Target {
        &self.record
    }
}

/// Has this voter already cast in this election? Reads the vote record
/// marker, inside the given session when one is supplied so the check
/// takes part in the surrounding transaction.
pub async fn has_voted(
    vote_records: &Coll<VoteRecord>,
    voter_id: Id,
    election_id: Id,
    session: Option<&mut ClientSession>,
) -> Result<bool, DbError> {
    let marker = doc! {
        "election_id": election_id,
        "voter_id": voter_id,
    };
    let record = match session {
        Some(session) => {
            vote_records
                .find_one_with_session(marker, None, session)
                .await?
        }
        None => vote_records.find_one(marker, None).await?,
    };
    Ok(record.is_some())
}

/// Number of ballots this voter holds in this election: zero or one for
/// single-choice, up to the election's `max_selections` for multiple-choice.
pub async fn count_for_voter(
    ballots: &Coll<Ballot>,
    voter_id: Id,
    election_id: Id,
) -> Result<u64, DbError> {
    ballots
        .count_documents(
            doc! {
                "election_id": election_id,
                "voter_id": voter_id,
            },
            None,
        )
        .await
}
