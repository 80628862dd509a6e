//! The vote-casting transaction engine.
//!
//! Every cast operation runs inside a single MongoDB multi-document
//! transaction: the eligibility checks, the vote record, the ballots, and the
//! candidate counter increments all commit or roll back together. Concurrent
//! duplicate casts are resolved by the unique index on
//! `(election_id, voter_id)` over vote records; the in-transaction pre-check
//! merely gives a friendlier fast path.

use chrono::Utc;
use mongodb::{
    bson::{doc, Bson},
    error::Error as DbError,
    options::TransactionOptions,
    Client, ClientSession, Database,
};
use thiserror::Error;

use crate::config::Config;
use crate::model::{
    db::{
        has_voted, BallotCore, Candidate, Election, ElectionCore, ElectionType, NewBallot,
        VoteRecord, VoteRecordCore,
    },
    mongodb::{is_duplicate_key_error, is_transient_error, is_unknown_commit_error, Coll, Id},
};

/// How many times to re-issue a commit whose outcome is unknown.
const MAX_COMMIT_RETRIES: u32 = 3;

/// The candidates chosen by one cast operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// A single-choice ballot.
    Single(Id),
    /// A multiple-choice ballot.
    Multiple(Vec<Id>),
}

/// Why a cast operation was rejected.
#[derive(Debug, Error)]
pub enum CastError {
    /// The election, or one of the selected candidates, does not exist.
    #[error("Election or candidate not found")]
    NotFound,
    /// The election is not accepting votes right now.
    #[error("Voting is closed for this election")]
    VotingClosed,
    /// The voter has already cast in this election.
    #[error("You have already voted in this election")]
    AlreadyVoted,
    /// The selection does not fit the election's rules.
    #[error("Invalid selection: {0}")]
    InvalidSelection(String),
    /// Retries were exhausted due to contention or timeouts; safe to retry.
    #[error("The vote could not be recorded due to contention; please retry")]
    Transient,
    /// Any other database failure.
    #[error("Database error: {0}")]
    Db(#[from] DbError),
}

/// Proof of a successful cast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CastOutcome {
    /// IDs of the ballots written, one per selected candidate.
    pub ballot_ids: Vec<Id>,
}

/// Atomically record a voter's selection in an election.
///
/// Either every effect happens (vote record, ballots, counter increments) or
/// none do. Transient transaction errors retry the whole transaction up to
/// `max_transaction_attempts`; a duplicate-key error anywhere surfaces as
/// [`CastError::AlreadyVoted`].
pub async fn cast_vote(
    client: &Client,
    db: &Database,
    config: &Config,
    voter_id: Id,
    election_id: Id,
    selection: &Selection,
) -> Result<CastOutcome, CastError> {
    let mut attempts = 0;
    loop {
        attempts += 1;

        let mut session = client.start_session(None).await.map_err(CastError::Db)?;
        let options = TransactionOptions::builder()
            .max_commit_time(config.transaction_timeout())
            .build();
        session
            .start_transaction(options)
            .await
            .map_err(CastError::Db)?;

        let result = match try_cast(db, &mut session, voter_id, election_id, selection).await {
            Ok(outcome) => match commit(&mut session).await {
                Ok(()) => return Ok(outcome),
                Err(err) => Err(CastError::Db(err)),
            },
            Err(err) => {
                // The transaction cannot have committed; roll it back. An
                // abort failure is not fatal since the server will abandon
                // the transaction anyway.
                if let Err(abort_err) = session.abort_transaction().await {
                    warn!("Failed to abort vote transaction: {abort_err}");
                }
                Err(err)
            }
        };

        match result {
            Err(CastError::Db(err)) => {
                if is_duplicate_key_error(&err) {
                    // Lost the race against a concurrent cast by the same
                    // voter; identical outcome to the pre-check path.
                    return Err(CastError::AlreadyVoted);
                }
                if is_transient_error(&err) {
                    if attempts < config.max_transaction_attempts() {
                        debug!(
                            "Transient error on cast attempt {attempts}, retrying: {err}"
                        );
                        continue;
                    }
                    warn!("Vote transaction retries exhausted after {attempts} attempts: {err}");
                    return Err(CastError::Transient);
                }
                return Err(CastError::Db(err));
            }
            other => return other,
        }
    }
}

/// One attempt at the full check-and-write sequence, entirely in-session.
async fn try_cast(
    db: &Database,
    session: &mut ClientSession,
    voter_id: Id,
    election_id: Id,
    selection: &Selection,
) -> Result<CastOutcome, CastError> {
    let elections = Coll::<Election>::from_db(db);
    let election = elections
        .find_one_with_session(election_id.as_doc(), None, session)
        .await?
        .ok_or(CastError::NotFound)?;

    if !election.is_open_at(Utc::now()) {
        return Err(CastError::VotingClosed);
    }

    let vote_records = Coll::<VoteRecord>::from_db(db);
    if has_voted(&vote_records, voter_id, election_id, Some(&mut *session)).await? {
        return Err(CastError::AlreadyVoted);
    }

    let candidate_ids = validate_selection(&election, selection)?;

    // All selected candidates must exist and belong to this election.
    let candidates = Coll::<Candidate>::from_db(db);
    let id_list = candidate_ids
        .iter()
        .copied()
        .map(Bson::from)
        .collect::<Vec<_>>();
    let eligible = doc! {
        "_id": { "$in": id_list },
        "election_id": election_id,
    };
    let matching = candidates
        .count_documents_with_session(eligible, None, session)
        .await?;
    if matching != candidate_ids.len() as u64 {
        return Err(CastError::NotFound);
    }

    let now = Utc::now();

    let new_records = Coll::<VoteRecordCore>::from_db(db);
    new_records
        .insert_one_with_session(
            VoteRecordCore::new(voter_id, election_id, candidate_ids.len() as u32, now),
            None,
            session,
        )
        .await?;

    let new_ballots = Coll::<NewBallot>::from_db(db);
    let ballots = candidate_ids
        .iter()
        .map(|&candidate_id| BallotCore::new(voter_id, election_id, candidate_id, now))
        .collect::<Vec<_>>();
    let inserted = new_ballots
        .insert_many_with_session(&ballots, None, session)
        .await?;
    let mut ballot_ids = Vec::with_capacity(ballots.len());
    for index in 0..ballots.len() {
        let ballot_id: Id = inserted.inserted_ids[&index]
            .as_object_id()
            .unwrap() // Valid because the ID comes directly from the DB.
            .into();
        ballot_ids.push(ballot_id);
    }

    for &candidate_id in &candidate_ids {
        let result = candidates
            .update_one_with_session(
                doc! { "_id": candidate_id, "election_id": election_id },
                doc! { "$inc": { "vote_count": 1_i64 } },
                None,
                session,
            )
            .await?;
        // The count above saw the candidate, so within this transaction it
        // must still exist.
        if result.matched_count != 1 {
            return Err(CastError::NotFound);
        }
    }

    Ok(CastOutcome { ballot_ids })
}

/// Check the selection against the election's rules, returning the distinct
/// candidate IDs to record.
pub fn validate_selection(
    election: &ElectionCore,
    selection: &Selection,
) -> Result<Vec<Id>, CastError> {
    match (election.election_type, selection) {
        (ElectionType::SingleChoice, Selection::Single(id)) => Ok(vec![*id]),
        (ElectionType::SingleChoice, Selection::Multiple(_)) => Err(CastError::InvalidSelection(
            "This election accepts exactly one candidate choice.".to_string(),
        )),
        (ElectionType::MultipleChoice, Selection::Single(_)) => Err(CastError::InvalidSelection(
            "This election expects a list of candidate choices.".to_string(),
        )),
        (ElectionType::MultipleChoice, Selection::Multiple(ids)) => {
            if ids.is_empty() {
                return Err(CastError::InvalidSelection(
                    "At least one candidate must be selected.".to_string(),
                ));
            }
            if ids.len() as u32 > election.max_selections {
                return Err(CastError::InvalidSelection(format!(
                    "At most {} candidates may be selected.",
                    election.max_selections
                )));
            }
            let mut seen = ids.clone();
            seen.sort();
            seen.dedup();
            if seen.len() != ids.len() {
                return Err(CastError::InvalidSelection(
                    "The same candidate was selected more than once.".to_string(),
                ));
            }
            Ok(ids.clone())
        }
    }
}

/// Commit the transaction, re-issuing the commit while its outcome is
/// unknown. An exhausted retry budget surfaces the last error.
async fn commit(session: &mut ClientSession) -> Result<(), DbError> {
    let mut retries = 0;
    loop {
        match session.commit_transaction().await {
            Ok(()) => return Ok(()),
            Err(err) if is_unknown_commit_error(&err) && retries < MAX_COMMIT_RETRIES => {
                retries += 1;
                debug!("Commit outcome unknown, re-issuing ({retries}/{MAX_COMMIT_RETRIES})");
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use mongodb::bson::doc;
    use rocket::{local::asynchronous::Client as LocalClient, tokio};

    use crate::model::{
        api::election::ElectionSpec,
        db::{Ballot, CandidateCore, ElectionState, NewCandidate, NewElection},
    };

    use super::*;

    fn single_choice_election() -> ElectionCore {
        ElectionSpec::active_example().try_into().unwrap()
    }

    fn multi_choice_election() -> ElectionCore {
        ElectionSpec::multi_example().try_into().unwrap()
    }

    #[test]
    fn single_choice_selections() {
        let election = single_choice_election();
        let id = Id::new();

        assert_eq!(
            validate_selection(&election, &Selection::Single(id)).unwrap(),
            vec![id]
        );
        assert!(matches!(
            validate_selection(&election, &Selection::Multiple(vec![id])),
            Err(CastError::InvalidSelection(_))
        ));
    }

    #[test]
    fn multi_choice_selections() {
        let election = multi_choice_election();
        assert_eq!(election.max_selections, 2);
        let first = Id::new();
        let second = Id::new();
        let third = Id::new();

        assert_eq!(
            validate_selection(&election, &Selection::Multiple(vec![first, second])).unwrap(),
            vec![first, second]
        );
        // Shape mismatch.
        assert!(matches!(
            validate_selection(&election, &Selection::Single(first)),
            Err(CastError::InvalidSelection(_))
        ));
        // Empty.
        assert!(matches!(
            validate_selection(&election, &Selection::Multiple(vec![])),
            Err(CastError::InvalidSelection(_))
        ));
        // Too many.
        assert!(matches!(
            validate_selection(&election, &Selection::Multiple(vec![first, second, third])),
            Err(CastError::InvalidSelection(_))
        ));
        // Duplicates.
        assert!(matches!(
            validate_selection(&election, &Selection::Multiple(vec![first, first])),
            Err(CastError::InvalidSelection(_))
        ));
    }

    /// Insert an election and candidates directly, returning their IDs.
    async fn setup_election(
        db: &Database,
        spec: ElectionSpec,
        num_candidates: usize,
    ) -> (Id, Vec<Id>) {
        let election: NewElection = spec.try_into().unwrap();
        let election_id: Id = Coll::<NewElection>::from_db(db)
            .insert_one(&election, None)
            .await
            .unwrap()
            .inserted_id
            .as_object_id()
            .unwrap()
            .into();

        let candidates = (0..num_candidates)
            .map(|i| {
                CandidateCore::new(
                    format!("Candidate {i}"),
                    String::new(),
                    String::new(),
                    election_id,
                )
            })
            .collect::<Vec<_>>();
        let inserted = Coll::<NewCandidate>::from_db(db)
            .insert_many(&candidates, None)
            .await
            .unwrap();
        let candidate_ids = (0..num_candidates)
            .map(|i| inserted.inserted_ids[&i].as_object_id().unwrap().into())
            .collect();

        (election_id, candidate_ids)
    }

    fn engine_handles(client: &LocalClient) -> (Client, Database, Config) {
        (
            client.rocket().state::<Client>().unwrap().clone(),
            client.rocket().state::<Database>().unwrap().clone(),
            client.rocket().state::<Config>().unwrap().clone(),
        )
    }

    async fn vote_count_of(db: &Database, candidate_id: Id) -> i64 {
        Coll::<Candidate>::from_db(db)
            .find_one(candidate_id.as_doc(), None)
            .await
            .unwrap()
            .unwrap()
            .vote_count
    }

    async fn ballot_count(db: &Database, election_id: Id) -> u64 {
        Coll::<Ballot>::from_db(db)
            .count_documents(doc! { "election_id": election_id }, None)
            .await
            .unwrap()
    }

    async fn record_count(db: &Database, election_id: Id) -> u64 {
        Coll::<VoteRecord>::from_db(db)
            .count_documents(doc! { "election_id": election_id }, None)
            .await
            .unwrap()
    }

    #[backend_test]
    async fn single_choice_cast(client: LocalClient, db: Database) {
        let (mongo, db2, config) = engine_handles(&client);
        let (election_id, candidates) =
            setup_election(&db, ElectionSpec::active_example(), 2).await;
        let voter_id = Id::new();

        let outcome = cast_vote(
            &mongo,
            &db2,
            &config,
            voter_id,
            election_id,
            &Selection::Single(candidates[0]),
        )
        .await
        .unwrap();
        assert_eq!(outcome.ballot_ids.len(), 1);

        assert_eq!(vote_count_of(&db, candidates[0]).await, 1);
        assert_eq!(vote_count_of(&db, candidates[1]).await, 0);
        assert_eq!(ballot_count(&db, election_id).await, 1);
        assert_eq!(record_count(&db, election_id).await, 1);

        // A second cast by the same voter is rejected without side effects.
        let err = cast_vote(
            &mongo,
            &db2,
            &config,
            voter_id,
            election_id,
            &Selection::Single(candidates[1]),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CastError::AlreadyVoted));
        assert_eq!(vote_count_of(&db, candidates[1]).await, 0);
        assert_eq!(ballot_count(&db, election_id).await, 1);
    }

    #[backend_test]
    async fn multi_choice_cast(client: LocalClient, db: Database) {
        let (mongo, db2, config) = engine_handles(&client);
        let (election_id, candidates) = setup_election(&db, ElectionSpec::multi_example(), 3).await;
        let voter_id = Id::new();

        let outcome = cast_vote(
            &mongo,
            &db2,
            &config,
            voter_id,
            election_id,
            &Selection::Multiple(vec![candidates[0], candidates[2]]),
        )
        .await
        .unwrap();
        assert_eq!(outcome.ballot_ids.len(), 2);

        assert_eq!(vote_count_of(&db, candidates[0]).await, 1);
        assert_eq!(vote_count_of(&db, candidates[1]).await, 0);
        assert_eq!(vote_count_of(&db, candidates[2]).await, 1);
        assert_eq!(ballot_count(&db, election_id).await, 2);
        assert_eq!(record_count(&db, election_id).await, 1);
    }

    #[backend_test]
    async fn oversized_selection_has_no_effect(client: LocalClient, db: Database) {
        let (mongo, db2, config) = engine_handles(&client);
        let (election_id, candidates) = setup_election(&db, ElectionSpec::multi_example(), 3).await;

        let err = cast_vote(
            &mongo,
            &db2,
            &config,
            Id::new(),
            election_id,
            &Selection::Multiple(candidates.clone()),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CastError::InvalidSelection(_)));

        for candidate_id in candidates {
            assert_eq!(vote_count_of(&db, candidate_id).await, 0);
        }
        assert_eq!(ballot_count(&db, election_id).await, 0);
        assert_eq!(record_count(&db, election_id).await, 0);
    }

    #[backend_test]
    async fn closed_elections_reject_votes(client: LocalClient, db: Database) {
        let (mongo, db2, config) = engine_handles(&client);

        for spec in [ElectionSpec::draft_example(), ElectionSpec::closed_example()] {
            let (election_id, candidates) = setup_election(&db, spec, 1).await;
            let err = cast_vote(
                &mongo,
                &db2,
                &config,
                Id::new(),
                election_id,
                &Selection::Single(candidates[0]),
            )
            .await
            .unwrap_err();
            assert!(matches!(err, CastError::VotingClosed));
            assert_eq!(vote_count_of(&db, candidates[0]).await, 0);
            assert_eq!(ballot_count(&db, election_id).await, 0);
        }

        // Active but outside the window.
        let mut future = ElectionSpec::draft_example();
        future.state = Some(ElectionState::Active);
        let (election_id, candidates) = setup_election(&db, future, 1).await;
        let err = cast_vote(
            &mongo,
            &db2,
            &config,
            Id::new(),
            election_id,
            &Selection::Single(candidates[0]),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CastError::VotingClosed));
        assert_eq!(ballot_count(&db, election_id).await, 0);
    }

    #[backend_test]
    async fn unknown_targets_rejected(client: LocalClient, db: Database) {
        let (mongo, db2, config) = engine_handles(&client);
        let (election_id, _) = setup_election(&db, ElectionSpec::active_example(), 1).await;
        let (_, other_candidates) =
            setup_election(&db, ElectionSpec::multi_example(), 1).await;

        // Unknown election.
        let err = cast_vote(
            &mongo,
            &db2,
            &config,
            Id::new(),
            Id::new(),
            &Selection::Single(other_candidates[0]),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CastError::NotFound));

        // Candidate from a different election.
        let err = cast_vote(
            &mongo,
            &db2,
            &config,
            Id::new(),
            election_id,
            &Selection::Single(other_candidates[0]),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CastError::NotFound));
        assert_eq!(ballot_count(&db, election_id).await, 0);
    }

    #[backend_test]
    async fn concurrent_duplicate_casts(client: LocalClient, db: Database) {
        // Contention makes the retry paths fire, so enable logging.
        log4rs_test_utils::test_logging::init_logging_once_for(["ballotbox_backend"], None, None);

        let (mongo, db2, config) = engine_handles(&client);
        let (election_id, candidates) =
            setup_election(&db, ElectionSpec::active_example(), 2).await;
        let voter_id = Id::new();

        let mut handles = Vec::new();
        for i in 0..50 {
            let mongo = mongo.clone();
            let db2 = db2.clone();
            let config = config.clone();
            let candidate_id = candidates[i % 2];
            handles.push(tokio::spawn(async move {
                cast_vote(
                    &mongo,
                    &db2,
                    &config,
                    voter_id,
                    election_id,
                    &Selection::Single(candidate_id),
                )
                .await
            }));
        }

        let mut successes = 0;
        let mut duplicates = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => successes += 1,
                Err(CastError::AlreadyVoted) => duplicates += 1,
                Err(err) => panic!("Unexpected cast failure: {err}"),
            }
        }
        assert_eq!(successes, 1);
        assert_eq!(duplicates, 49);

        // Exactly one ballot landed and the counters agree with the ledger.
        assert_eq!(ballot_count(&db, election_id).await, 1);
        assert_eq!(record_count(&db, election_id).await, 1);
        let total: i64 = vote_count_of(&db, candidates[0]).await
            + vote_count_of(&db, candidates[1]).await;
        assert_eq!(total, 1);
    }

    #[backend_test]
    async fn counters_match_ledger_after_mixed_outcomes(client: LocalClient, db: Database) {
        let (mongo, db2, config) = engine_handles(&client);
        let (election_id, candidates) = setup_election(&db, ElectionSpec::multi_example(), 3).await;

        // Two good casts, a duplicate, an oversized selection, and an unknown
        // candidate.
        let alice = Id::new();
        let bob = Id::new();
        cast_vote(&mongo, &db2, &config, alice, election_id,
            &Selection::Multiple(vec![candidates[0], candidates[1]]))
            .await
            .unwrap();
        cast_vote(&mongo, &db2, &config, bob, election_id,
            &Selection::Multiple(vec![candidates[0]]))
            .await
            .unwrap();
        assert!(cast_vote(&mongo, &db2, &config, alice, election_id,
            &Selection::Multiple(vec![candidates[2]]))
            .await
            .is_err());
        assert!(cast_vote(&mongo, &db2, &config, Id::new(), election_id,
            &Selection::Multiple(candidates.clone()))
            .await
            .is_err());
        assert!(cast_vote(&mongo, &db2, &config, Id::new(), election_id,
            &Selection::Multiple(vec![Id::new()]))
            .await
            .is_err());

        let counter_total: i64 = vote_count_of(&db, candidates[0]).await
            + vote_count_of(&db, candidates[1]).await
            + vote_count_of(&db, candidates[2]).await;
        assert_eq!(counter_total, 3);
        assert_eq!(ballot_count(&db, election_id).await, 3);
        assert_eq!(record_count(&db, election_id).await, 2);
    }
}
