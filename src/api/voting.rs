use mongodb::{bson::doc, options::FindOptions, Client, Database};
use rocket::{futures::TryStreamExt, serde::json::Json, Route, State};

use crate::{
    engine::{self, CastOutcome},
    error::{Error, Result},
    model::{
        api::{
            auth::AuthToken,
            election::{CandidateDescription, ElectionDescription, ElectionDetail},
            vote::{CastReceipt, VoteRequest},
        },
        db::{has_voted, Candidate, Election, ElectionState, VoteRecord, Voter},
        mongodb::Coll,
    },
    Config,
};

pub fn routes() -> Vec<Route> {
    routes![active_elections, election_by_slug, cast_vote]
}

/// Elections currently open for voting, newest first.
#[get("/elections")]
async fn active_elections(
    _token: AuthToken<Voter>,
    elections: Coll<Election>,
) -> Result<Json<Vec<ElectionDescription>>> {
    let options = FindOptions::builder()
        .sort(doc! { "start_time": -1 })
        .build();
    let elections = elections
        .find(doc! { "state": ElectionState::Active }, options)
        .await?
        .try_collect::<Vec<_>>()
        .await?
        .into_iter()
        .map(ElectionDescription::from)
        .collect();
    Ok(Json(elections))
}

/// One election's voting page: the election, its candidates in name order,
/// and whether this voter has already cast. Drafts are invisible to voters.
#[get("/elections/<slug>")]
async fn election_by_slug(
    token: AuthToken<Voter>,
    slug: String,
    elections: Coll<Election>,
    candidates: Coll<Candidate>,
    vote_records: Coll<VoteRecord>,
) -> Result<Json<ElectionDetail>> {
    let visible = doc! {
        "slug": &slug,
        "state": { "$ne": ElectionState::Draft },
    };
    let election = elections
        .find_one(visible, None)
        .await?
        .ok_or_else(|| Error::not_found(format!("Election '{slug}'")))?;

    let options = FindOptions::builder().sort(doc! { "name": 1 }).build();
    let listed = candidates
        .find(doc! { "election_id": election.id }, options)
        .await?
        .try_collect::<Vec<_>>()
        .await?
        .into_iter()
        .map(CandidateDescription::from)
        .collect();

    let has_voted = has_voted(&vote_records, token.id, election.id, None).await?;

    Ok(Json(ElectionDetail {
        election: election.into(),
        candidates: listed,
        has_voted,
    }))
}

/// Cast a vote. All checks and writes run in one transaction; see
/// [`crate::engine`].
#[post("/vote", data = "<request>", format = "json")]
pub async fn cast_vote(
    token: AuthToken<Voter>,
    request: Json<VoteRequest>,
    db_client: &State<Client>,
    db: &State<Database>,
    config: &State<Config>,
) -> Result<Json<CastReceipt>> {
    let request = request.0;
    let election_id = request.election_id;
    let selection = request
        .into_selection()
        .map_err(|msg| Error::Status(rocket::http::Status::BadRequest, msg))?;

    let CastOutcome { ballot_ids } =
        engine::cast_vote(db_client, db, config, token.id, election_id, &selection).await?;

    Ok(Json(CastReceipt { ballot_ids }))
}
