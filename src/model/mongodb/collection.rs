use std::ops::Deref;

use mongodb::{
    bson::doc, error::Error as DbError, options::IndexOptions, Collection, Database, IndexModel,
};
use rocket::{
    request::{self, FromRequest, Request},
    State,
};

use crate::model::db::{
    Admin, Ballot, BallotCore, Candidate, CandidateCore, Election, ElectionCore, RollEntry,
    RollEntryCore, VoteRecord, VoteRecordCore, Voter, VoterCore,
};

/// A type that can be directly inserted/read to/from the database.
pub trait MongoCollection {
    /// The name of the collection.
    const NAME: &'static str;
}

/// A database collection of the given type.
pub struct Coll<T>(Collection<T>);

impl<T> Coll<T>
where
    T: MongoCollection,
{
    /// Get a handle on this collection in the given database.
    pub fn from_db(db: &Database) -> Self {
        Self(db.collection(T::NAME))
    }
}

// `derive(Clone)` would only derive if `T: Clone`, but we don't need that bound.
impl<T> Clone for Coll<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> Deref for Coll<T> {
    type Target = Collection<T>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[rocket::async_trait]
impl<'r, T> FromRequest<'r> for Coll<T>
where
    T: MongoCollection,
{
    type Error = ();

    /// Get the database connection from the managed state and wrap it in a collection.
    ///
    /// Panics iff the [`Database`] is not managed by [`rocket::Rocket`].
    async fn from_request(req: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        let db = req.guard::<&State<Database>>().await.unwrap();
        request::Outcome::Success(Coll::from_db(db))
    }
}

// Admin collection.
const ADMINS: &str = "admins";
impl MongoCollection for Admin {
    const NAME: &'static str = ADMINS;
}
impl MongoCollection for crate::model::db::AdminCore {
    const NAME: &'static str = ADMINS;
}

// Voter (user) collection.
const VOTERS: &str = "voters";
impl MongoCollection for Voter {
    const NAME: &'static str = VOTERS;
}
impl MongoCollection for VoterCore {
    const NAME: &'static str = VOTERS;
}

// Voter roll collection.
const VOTER_ROLL: &str = "voter_roll";
impl MongoCollection for RollEntry {
    const NAME: &'static str = VOTER_ROLL;
}
impl MongoCollection for RollEntryCore {
    const NAME: &'static str = VOTER_ROLL;
}

// Election collection.
const ELECTIONS: &str = "elections";
impl MongoCollection for Election {
    const NAME: &'static str = ELECTIONS;
}
impl MongoCollection for ElectionCore {
    const NAME: &'static str = ELECTIONS;
}

// Candidate collection.
const CANDIDATES: &str = "candidates";
impl MongoCollection for Candidate {
    const NAME: &'static str = CANDIDATES;
}
impl MongoCollection for CandidateCore {
    const NAME: &'static str = CANDIDATES;
}

// Ballot collection.
const BALLOTS: &str = "ballots";
impl MongoCollection for Ballot {
    const NAME: &'static str = BALLOTS;
}
impl MongoCollection for BallotCore {
    const NAME: &'static str = BALLOTS;
}

// Vote record collection.
const VOTE_RECORDS: &str = "vote_records";
impl MongoCollection for VoteRecord {
    const NAME: &'static str = VOTE_RECORDS;
}
impl MongoCollection for VoteRecordCore {
    const NAME: &'static str = VOTE_RECORDS;
}

/// Ensure that all the required indexes exist on the given database.
///
/// The unique indexes on `vote_records` and `ballots` are the authoritative
/// duplicate-vote defence; everything that matters for correctness under
/// concurrent casting lives here.
///
/// This operation is idempotent.
pub async fn ensure_indexes_exist(db: &Database) -> Result<(), DbError> {
    debug!("Ensuring collection indexes exist");

    let unique = IndexOptions::builder().unique(true).build();

    // Admin collection.
    let admin_index = IndexModel::builder()
        .keys(doc! {"username": 1})
        .options(unique.clone())
        .build();
    Coll::<Admin>::from_db(db)
        .create_index(admin_index, None)
        .await?;

    // Voter collection.
    let voter_indexes = [
        IndexModel::builder()
            .keys(doc! {"email": 1})
            .options(unique.clone())
            .build(),
        IndexModel::builder()
            .keys(doc! {"identity_ref": 1})
            .options(unique.clone())
            .build(),
    ];
    Coll::<Voter>::from_db(db)
        .create_indexes(voter_indexes, None)
        .await?;

    // Voter roll collection.
    let roll_index = IndexModel::builder()
        .keys(doc! {"email": 1})
        .options(unique.clone())
        .build();
    Coll::<RollEntry>::from_db(db)
        .create_index(roll_index, None)
        .await?;

    // Election collection.
    let election_indexes = [
        IndexModel::builder()
            .keys(doc! {"slug": 1})
            .options(unique.clone())
            .build(),
        IndexModel::builder().keys(doc! {"state": 1}).build(),
    ];
    Coll::<Election>::from_db(db)
        .create_indexes(election_indexes, None)
        .await?;

    // Candidate collection: voting-page listing and leaderboards.
    let candidate_indexes = [
        IndexModel::builder()
            .keys(doc! {"election_id": 1, "name": 1})
            .build(),
        IndexModel::builder()
            .keys(doc! {"election_id": 1, "vote_count": -1})
            .build(),
    ];
    Coll::<Candidate>::from_db(db)
        .create_indexes(candidate_indexes, None)
        .await?;

    // Ballot collection: no two ballots for the same candidate by the same voter.
    let ballot_index = IndexModel::builder()
        .keys(doc! {"election_id": 1, "voter_id": 1, "candidate_id": 1})
        .options(unique.clone())
        .build();
    Coll::<Ballot>::from_db(db)
        .create_index(ballot_index, None)
        .await?;

    // Vote record collection: at most one cast operation per voter per election.
    let record_index = IndexModel::builder()
        .keys(doc! {"election_id": 1, "voter_id": 1})
        .options(unique)
        .build();
    Coll::<VoteRecord>::from_db(db)
        .create_index(record_index, None)
        .await?;

    Ok(())
}
