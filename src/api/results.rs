use std::collections::HashMap;

use mongodb::{
    bson::{doc, Bson},
    options::FindOptions,
};
use rocket::{futures::TryStreamExt, http::Status, serde::json::Json, Route};

use crate::{
    error::{Error, Result},
    model::{
        api::{
            auth::AuthToken,
            pagination::{Paginated, Pagination},
            results::{
                percentage, AdminElectionResults, CandidateResult, ElectionAnalytics,
                ElectionResults, VoteLogEntry,
            },
        },
        db::{Admin, Ballot, Candidate, Election, ElectionState, RollEntry, VoteRecord},
        mongodb::{Coll, Id},
    },
};

pub fn routes() -> Vec<Route> {
    routes![public_results, admin_results, admin_election_results, vote_log]
}

/// Candidates for one election in descending vote-count order, with
/// percentages.
async fn tally(candidates: &Coll<Candidate>, election_id: Id) -> Result<(Vec<CandidateResult>, i64)> {
    let options = FindOptions::builder()
        .sort(doc! { "vote_count": -1, "name": 1 })
        .build();
    let candidates = candidates
        .find(doc! { "election_id": election_id }, options)
        .await?
        .try_collect::<Vec<_>>()
        .await?;
    let total_votes = candidates.iter().map(|c| c.vote_count).sum::<i64>();
    let results = candidates
        .into_iter()
        .map(|candidate| CandidateResult::new(candidate, total_votes))
        .collect();
    Ok((results, total_votes))
}

/// Public results for a closed election. Voter identities never appear here;
/// only aggregate counts.
#[get("/results/<slug>")]
async fn public_results(
    slug: String,
    elections: Coll<Election>,
    candidates: Coll<Candidate>,
) -> Result<Json<ElectionResults>> {
    let election = elections
        .find_one(doc! { "slug": &slug }, None)
        .await?
        .ok_or_else(|| Error::not_found(format!("Election '{slug}'")))?;
    if election.state != ElectionState::Closed {
        return Err(Error::Status(
            Status::Forbidden,
            "Results are not available until the election closes.".to_string(),
        ));
    }

    let (tally, total_votes) = tally(&candidates, election.id).await?;
    Ok(Json(ElectionResults {
        election: election.into(),
        candidates: tally,
        total_votes,
    }))
}

/// All elections with their current tallies, regardless of state.
#[get("/admin/results")]
async fn admin_results(
    _token: AuthToken<Admin>,
    elections: Coll<Election>,
    candidates: Coll<Candidate>,
) -> Result<Json<Vec<ElectionResults>>> {
    let options = FindOptions::builder()
        .sort(doc! { "start_time": -1 })
        .build();
    let elections = elections
        .find(None, options)
        .await?
        .try_collect::<Vec<_>>()
        .await?;

    let mut results = Vec::with_capacity(elections.len());
    for election in elections {
        let (tally, total_votes) = tally(&candidates, election.id).await?;
        results.push(ElectionResults {
            election: election.into(),
            candidates: tally,
            total_votes,
        });
    }
    Ok(Json(results))
}

/// One election's tally plus turnout analytics.
#[get("/admin/results/<election_id>")]
async fn admin_election_results(
    _token: AuthToken<Admin>,
    election_id: Id,
    elections: Coll<Election>,
    candidates: Coll<Candidate>,
    vote_records: Coll<VoteRecord>,
    roll: Coll<RollEntry>,
) -> Result<Json<AdminElectionResults>> {
    let election = elections
        .find_one(election_id.as_doc(), None)
        .await?
        .ok_or_else(|| Error::not_found(format!("Election with ID '{election_id}'")))?;

    let (tally, total_votes) = tally(&candidates, election.id).await?;

    // Vote records are unique per (election, voter), so this count is the
    // number of distinct voters who cast.
    let total_votes_cast = vote_records
        .count_documents(doc! { "election_id": election_id }, None)
        .await?;
    let total_eligible_voters = roll.count_documents(None, None).await?;

    let analytics = ElectionAnalytics {
        total_eligible_voters,
        total_votes_cast,
        turnout_percentage: percentage(total_votes_cast as i64, total_eligible_voters as i64),
        total_votes,
    };

    Ok(Json(AdminElectionResults {
        election: election.into(),
        candidates: tally,
        analytics,
    }))
}

/// The anonymised vote log: every ballot, newest first, with election and
/// candidate names resolved. Voter identity is never included.
#[get("/admin/votelog")]
async fn vote_log(
    _token: AuthToken<Admin>,
    pagination: Pagination,
    ballots: Coll<Ballot>,
    elections: Coll<Election>,
    candidates: Coll<Candidate>,
) -> Result<Json<Paginated<VoteLogEntry>>> {
    let total = ballots.count_documents(None, None).await?;
    let options = FindOptions::builder()
        .sort(doc! { "cast_at": -1, "_id": -1 })
        .skip(pagination.skip())
        .limit(pagination.page_size() as i64)
        .build();
    let page = ballots
        .find(None, options)
        .await?
        .try_collect::<Vec<_>>()
        .await?;

    // Resolve display names for just the IDs on this page.
    let election_ids = page
        .iter()
        .map(|ballot| Bson::from(ballot.election_id))
        .collect::<Vec<_>>();
    let election_titles = elections
        .find(doc! { "_id": { "$in": election_ids } }, None)
        .await?
        .try_collect::<Vec<_>>()
        .await?
        .into_iter()
        .map(|election| (election.id, election.election.title))
        .collect::<HashMap<_, _>>();
    let candidate_ids = page
        .iter()
        .map(|ballot| Bson::from(ballot.candidate_id))
        .collect::<Vec<_>>();
    let candidate_names = candidates
        .find(doc! { "_id": { "$in": candidate_ids } }, None)
        .await?
        .try_collect::<Vec<_>>()
        .await?
        .into_iter()
        .map(|candidate| (candidate.id, candidate.candidate.name))
        .collect::<HashMap<_, _>>();

    let unknown = || "Unknown".to_string();
    let entries = page
        .into_iter()
        .map(|ballot| VoteLogEntry {
            id: ballot.id,
            election_title: election_titles
                .get(&ballot.election_id)
                .cloned()
                .unwrap_or_else(unknown),
            candidate_name: candidate_names
                .get(&ballot.candidate_id)
                .cloned()
                .unwrap_or_else(unknown),
            cast_at: ballot.cast_at,
        })
        .collect();

    Ok(Json(pagination.paginate(entries, total)))
}
