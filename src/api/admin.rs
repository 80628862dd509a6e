use mongodb::{
    bson::{doc, Document},
    error::ErrorKind,
    options::{FindOptions, InsertManyOptions},
    Client,
};
use rocket::{
    futures::TryStreamExt,
    http::Status,
    serde::json::Json,
    Route, State,
};

use crate::{
    error::{Error, Result},
    model::{
        api::{
            admin::{RollAddRequest, RollAddResponse},
            auth::AuthToken,
            election::{
                CandidateDescription, CandidateSpec, CandidateUpdate, ElectionDescription,
                ElectionSpec,
            },
            pagination::{Paginated, Pagination},
        },
        db::{
            is_plausible_email, normalize_email, Admin, Ballot, Candidate, CandidateCore,
            Election, NewCandidate, NewElection, NewRollEntry, RollEntry, RollEntryCore,
            VoteRecord,
        },
        mongodb::{is_duplicate_key_error, Coll, Id, DUPLICATE_KEY},
    },
};

pub fn routes() -> Vec<Route> {
    routes![
        list_elections,
        create_election,
        modify_election,
        delete_election,
        election_candidates,
        create_candidate,
        modify_candidate,
        delete_candidate,
        list_roll,
        add_to_roll,
        remove_from_roll,
    ]
}

#[get("/admin/elections")]
async fn list_elections(
    _token: AuthToken<Admin>,
    elections: Coll<Election>,
) -> Result<Json<Vec<ElectionDescription>>> {
    let options = FindOptions::builder()
        .sort(doc! { "start_time": -1 })
        .build();
    let elections = elections
        .find(None, options)
        .await?
        .try_collect::<Vec<_>>()
        .await?
        .into_iter()
        .map(ElectionDescription::from)
        .collect();
    Ok(Json(elections))
}

#[post("/admin/elections", data = "<spec>", format = "json")]
pub async fn create_election(
    _token: AuthToken<Admin>,
    spec: Json<ElectionSpec>,
    new_elections: Coll<NewElection>,
    elections: Coll<Election>,
) -> Result<Json<ElectionDescription>> {
    let election: NewElection = spec
        .0
        .try_into()
        .map_err(|msg| Error::Status(Status::BadRequest, msg))?;

    let new_id: Id = match new_elections.insert_one(&election, None).await {
        Ok(result) => result
            .inserted_id
            .as_object_id()
            .unwrap() // Valid because the ID comes directly from the DB.
            .into(),
        Err(err) if is_duplicate_key_error(&err) => {
            return Err(Error::Status(
                Status::BadRequest,
                format!("An election with slug '{}' already exists.", election.slug),
            ));
        }
        Err(err) => return Err(err.into()),
    };

    let election = elections
        .find_one(new_id.as_doc(), None)
        .await?
        .unwrap(); // Just inserted.
    Ok(Json(election.into()))
}

#[put("/admin/elections/<election_id>", data = "<spec>", format = "json")]
pub async fn modify_election(
    _token: AuthToken<Admin>,
    election_id: Id,
    spec: Json<ElectionSpec>,
    new_elections: Coll<NewElection>,
) -> Result<Json<ElectionDescription>> {
    let election: NewElection = spec
        .0
        .try_into()
        .map_err(|msg| Error::Status(Status::BadRequest, msg))?;

    let result = match new_elections
        .replace_one(election_id.as_doc(), &election, None)
        .await
    {
        Ok(result) => result,
        Err(err) if is_duplicate_key_error(&err) => {
            return Err(Error::Status(
                Status::BadRequest,
                format!("An election with slug '{}' already exists.", election.slug),
            ));
        }
        Err(err) => return Err(err.into()),
    };
    if result.matched_count == 0 {
        return Err(Error::not_found(format!(
            "Election with ID '{election_id}'"
        )));
    }

    Ok(Json(
        Election {
            id: election_id,
            election,
        }
        .into(),
    ))
}

/// Delete an election along with its candidates, ballots, and vote records,
/// all in one transaction so a half-deleted election is never observable.
#[delete("/admin/elections/<election_id>")]
pub async fn delete_election(
    _token: AuthToken<Admin>,
    election_id: Id,
    elections: Coll<Election>,
    candidates: Coll<Candidate>,
    ballots: Coll<Ballot>,
    vote_records: Coll<VoteRecord>,
    db_client: &State<Client>,
) -> Result<()> {
    let mut session = db_client.start_session(None).await?;
    session.start_transaction(None).await?;

    let result = elections
        .delete_one_with_session(election_id.as_doc(), None, &mut session)
        .await?;
    if result.deleted_count == 0 {
        session.abort_transaction().await?;
        return Err(Error::not_found(format!(
            "Election with ID '{election_id}'"
        )));
    }

    let owned = doc! { "election_id": election_id };
    candidates
        .delete_many_with_session(owned.clone(), None, &mut session)
        .await?;
    ballots
        .delete_many_with_session(owned.clone(), None, &mut session)
        .await?;
    vote_records
        .delete_many_with_session(owned, None, &mut session)
        .await?;

    session.commit_transaction().await?;
    Ok(())
}

#[get("/admin/elections/<election_id>/candidates")]
async fn election_candidates(
    _token: AuthToken<Admin>,
    election_id: Id,
    elections: Coll<Election>,
    candidates: Coll<Candidate>,
) -> Result<Json<Vec<CandidateDescription>>> {
    elections
        .find_one(election_id.as_doc(), None)
        .await?
        .ok_or_else(|| Error::not_found(format!("Election with ID '{election_id}'")))?;

    let options = FindOptions::builder().sort(doc! { "name": 1 }).build();
    let candidates = candidates
        .find(doc! { "election_id": election_id }, options)
        .await?
        .try_collect::<Vec<_>>()
        .await?
        .into_iter()
        .map(CandidateDescription::from)
        .collect();
    Ok(Json(candidates))
}

#[post("/admin/candidates", data = "<spec>", format = "json")]
pub async fn create_candidate(
    _token: AuthToken<Admin>,
    spec: Json<CandidateSpec>,
    elections: Coll<Election>,
    new_candidates: Coll<NewCandidate>,
    candidates: Coll<Candidate>,
) -> Result<Json<CandidateDescription>> {
    let spec = spec.0;
    if spec.name.trim().is_empty() {
        return Err(Error::Status(
            Status::BadRequest,
            "Candidate name must not be empty.".to_string(),
        ));
    }
    elections
        .find_one(spec.election_id.as_doc(), None)
        .await?
        .ok_or_else(|| Error::not_found(format!("Election with ID '{}'", spec.election_id)))?;

    let candidate = CandidateCore::new(
        spec.name,
        spec.description.unwrap_or_default(),
        spec.image_url.unwrap_or_default(),
        spec.election_id,
    );
    let new_id: Id = new_candidates
        .insert_one(&candidate, None)
        .await?
        .inserted_id
        .as_object_id()
        .unwrap() // Valid because the ID comes directly from the DB.
        .into();

    let candidate = candidates
        .find_one(new_id.as_doc(), None)
        .await?
        .unwrap(); // Just inserted.
    Ok(Json(candidate.into()))
}

#[put("/admin/candidates/<candidate_id>", data = "<update>", format = "json")]
pub async fn modify_candidate(
    _token: AuthToken<Admin>,
    candidate_id: Id,
    update: Json<CandidateUpdate>,
    candidates: Coll<Candidate>,
) -> Result<Json<CandidateDescription>> {
    // Only presentation fields may change; the owning election and the vote
    // counter are off limits.
    let mut set = Document::new();
    if let Some(name) = &update.name {
        if name.trim().is_empty() {
            return Err(Error::Status(
                Status::BadRequest,
                "Candidate name must not be empty.".to_string(),
            ));
        }
        set.insert("name", name);
    }
    if let Some(description) = &update.description {
        set.insert("description", description);
    }
    if let Some(image_url) = &update.image_url {
        set.insert("image_url", image_url);
    }
    if set.is_empty() {
        return Err(Error::Status(
            Status::BadRequest,
            "No fields to update.".to_string(),
        ));
    }

    let result = candidates
        .update_one(candidate_id.as_doc(), doc! { "$set": set }, None)
        .await?;
    if result.matched_count == 0 {
        return Err(Error::not_found(format!(
            "Candidate with ID '{candidate_id}'"
        )));
    }

    let candidate = candidates
        .find_one(candidate_id.as_doc(), None)
        .await?
        .ok_or_else(|| Error::not_found(format!("Candidate with ID '{candidate_id}'")))?;
    Ok(Json(candidate.into()))
}

#[delete("/admin/candidates/<candidate_id>")]
pub async fn delete_candidate(
    _token: AuthToken<Admin>,
    candidate_id: Id,
    candidates: Coll<Candidate>,
) -> Result<()> {
    let result = candidates.delete_one(candidate_id.as_doc(), None).await?;
    if result.deleted_count == 0 {
        return Err(Error::not_found(format!(
            "Candidate with ID '{candidate_id}'"
        )));
    }
    Ok(())
}

#[get("/admin/voterroll")]
async fn list_roll(
    _token: AuthToken<Admin>,
    pagination: Pagination,
    roll: Coll<RollEntry>,
) -> Result<Json<Paginated<String>>> {
    let total = roll.count_documents(None, None).await?;
    let options = FindOptions::builder()
        .sort(doc! { "email": 1 })
        .skip(pagination.skip())
        .limit(pagination.page_size() as i64)
        .build();
    let emails = roll
        .find(None, options)
        .await?
        .try_collect::<Vec<_>>()
        .await?
        .into_iter()
        .map(|entry| entry.entry.email)
        .collect();
    Ok(Json(pagination.paginate(emails, total)))
}

/// Add one email or a bulk list to the voter roll. Duplicates and implausible
/// addresses are skipped and counted, not errors; a mostly-good bulk upload
/// should not fail outright.
#[post("/admin/voterroll", data = "<request>", format = "json")]
pub async fn add_to_roll(
    _token: AuthToken<Admin>,
    request: Json<RollAddRequest>,
    roll: Coll<NewRollEntry>,
) -> Result<Json<RollAddResponse>> {
    let emails = request.0.into_emails();
    if emails.is_empty() {
        return Err(Error::Status(
            Status::BadRequest,
            "No emails provided.".to_string(),
        ));
    }

    let mut skipped = 0;
    let mut entries = Vec::with_capacity(emails.len());
    for email in emails {
        if is_plausible_email(&email) {
            entries.push(RollEntryCore::new(&email));
        } else {
            skipped += 1;
        }
    }
    if entries.is_empty() {
        return Ok(Json(RollAddResponse { added: 0, skipped }));
    }

    // Unordered insert so one duplicate doesn't sink the whole batch.
    let options = InsertManyOptions::builder().ordered(false).build();
    let added = match roll.insert_many(&entries, options).await {
        Ok(result) => result.inserted_ids.len() as u64,
        Err(err) => {
            let duplicates = match &*err.kind {
                ErrorKind::BulkWrite(failure) if failure.write_concern_error.is_none() => failure
                    .write_errors
                    .as_ref()
                    .filter(|errors| errors.iter().all(|e| e.code == DUPLICATE_KEY))
                    .map(|errors| errors.len() as u64),
                _ => None,
            };
            match duplicates {
                Some(duplicates) => {
                    skipped += duplicates;
                    entries.len() as u64 - duplicates
                }
                None => return Err(err.into()),
            }
        }
    };

    Ok(Json(RollAddResponse { added, skipped }))
}

#[delete("/admin/voterroll?<email>")]
pub async fn remove_from_roll(
    _token: AuthToken<Admin>,
    email: String,
    roll: Coll<RollEntry>,
) -> Result<()> {
    let email = normalize_email(&email);
    let result = roll.delete_one(doc! { "email": &email }, None).await?;
    if result.deleted_count == 0 {
        return Err(Error::not_found(format!("Roll entry '{email}'")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use chrono::Utc;
    use mongodb::bson::doc;
    use rocket::{http::ContentType, local::asynchronous::Client, serde::json::serde_json::json};

    use crate::model::db::{BallotCore, ElectionState, VoteRecordCore};

    use super::*;

    async fn create_election_helper(client: &Client, spec: &ElectionSpec) -> ElectionDescription {
        let response = client
            .post(uri!(create_election))
            .header(ContentType::JSON)
            .body(json!(spec).to_string())
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        response.into_json().await.unwrap()
    }

    async fn create_candidate_helper(
        client: &Client,
        spec: &CandidateSpec,
    ) -> CandidateDescription {
        let response = client
            .post(uri!(create_candidate))
            .header(ContentType::JSON)
            .body(json!(spec).to_string())
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        response.into_json().await.unwrap()
    }

    #[backend_test(admin)]
    async fn election_crud(client: Client) {
        let description = create_election_helper(&client, &ElectionSpec::active_example()).await;
        assert_eq!(description.slug, "student-union-president-2026");
        assert_eq!(description.state, ElectionState::Active);
        assert_eq!(description.max_selections, 1);

        // It shows up in the listing.
        let response = client.get(uri!(list_elections)).dispatch().await;
        assert_eq!(Status::Ok, response.status());
        let listed: Vec<ElectionDescription> = response.into_json().await.unwrap();
        assert_eq!(listed, vec![description.clone()]);

        // Modify it.
        let mut spec = ElectionSpec::active_example();
        spec.state = Some(ElectionState::Closed);
        let response = client
            .put(uri!(modify_election(description.id)))
            .header(ContentType::JSON)
            .body(json!(spec).to_string())
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        let modified: ElectionDescription = response.into_json().await.unwrap();
        assert_eq!(modified.state, ElectionState::Closed);

        // Delete it.
        let response = client
            .delete(uri!(delete_election(description.id)))
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        let response = client
            .delete(uri!(delete_election(description.id)))
            .dispatch()
            .await;
        assert_eq!(Status::NotFound, response.status());
    }

    #[backend_test(admin)]
    async fn duplicate_slug_rejected(client: Client) {
        create_election_helper(&client, &ElectionSpec::active_example()).await;

        let response = client
            .post(uri!(create_election))
            .header(ContentType::JSON)
            .body(json!(ElectionSpec::active_example()).to_string())
            .dispatch()
            .await;
        assert_eq!(Status::BadRequest, response.status());
    }

    #[backend_test(admin)]
    async fn invalid_window_rejected(client: Client) {
        let mut spec = ElectionSpec::active_example();
        spec.end_time = spec.start_time - Duration::days(1);

        let response = client
            .post(uri!(create_election))
            .header(ContentType::JSON)
            .body(json!(spec).to_string())
            .dispatch()
            .await;
        assert_eq!(Status::BadRequest, response.status());
    }

    #[backend_test(admin)]
    async fn delete_cascades(
        client: Client,
        ballots: Coll<BallotCore>,
        vote_records: Coll<VoteRecordCore>,
        candidates: Coll<Candidate>,
    ) {
        let election = create_election_helper(&client, &ElectionSpec::active_example()).await;
        let candidate =
            create_candidate_helper(&client, &CandidateSpec::example1(election.id)).await;

        // Simulate a cast vote.
        let voter_id = Id::new();
        let now = Utc::now();
        ballots
            .insert_one(
                BallotCore::new(voter_id, election.id, candidate.id, now),
                None,
            )
            .await
            .unwrap();
        vote_records
            .insert_one(VoteRecordCore::new(voter_id, election.id, 1, now), None)
            .await
            .unwrap();

        let response = client
            .delete(uri!(delete_election(election.id)))
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());

        // Nothing owned by the election survives.
        let owned = doc! { "election_id": election.id };
        assert_eq!(
            candidates
                .count_documents(owned.clone(), None)
                .await
                .unwrap(),
            0
        );
        assert_eq!(
            ballots.count_documents(owned.clone(), None).await.unwrap(),
            0
        );
        assert_eq!(vote_records.count_documents(owned, None).await.unwrap(), 0);
    }

    #[backend_test(admin)]
    async fn candidate_crud(client: Client) {
        let election = create_election_helper(&client, &ElectionSpec::active_example()).await;
        let jane = create_candidate_helper(&client, &CandidateSpec::example1(election.id)).await;
        let alex = create_candidate_helper(&client, &CandidateSpec::example2(election.id)).await;
        assert_eq!(jane.vote_count, 0);

        // Listed in name order.
        let response = client
            .get(uri!(election_candidates(election.id)))
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        let listed: Vec<CandidateDescription> = response.into_json().await.unwrap();
        assert_eq!(listed, vec![alex.clone(), jane.clone()]);

        // Update presentation fields only.
        let update = CandidateUpdate {
            description: Some("Third-year politics student.".to_string()),
            ..CandidateUpdate::default()
        };
        let response = client
            .put(uri!(modify_candidate(jane.id)))
            .header(ContentType::JSON)
            .body(json!(update).to_string())
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        let modified: CandidateDescription = response.into_json().await.unwrap();
        assert_eq!(modified.description, "Third-year politics student.");
        assert_eq!(modified.election_id, election.id);

        // Delete.
        let response = client
            .delete(uri!(delete_candidate(jane.id)))
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        let response = client
            .delete(uri!(delete_candidate(jane.id)))
            .dispatch()
            .await;
        assert_eq!(Status::NotFound, response.status());
    }

    #[backend_test(admin)]
    async fn candidate_needs_election(client: Client) {
        let response = client
            .post(uri!(create_candidate))
            .header(ContentType::JSON)
            .body(json!(CandidateSpec::example1(Id::new())).to_string())
            .dispatch()
            .await;
        assert_eq!(Status::NotFound, response.status());
    }

    #[backend_test(admin)]
    async fn roll_management(client: Client) {
        // Single add.
        let response = client
            .post(uri!(add_to_roll))
            .header(ContentType::JSON)
            .body(json!({ "email": "Alice@Example.COM" }).to_string())
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        let result: RollAddResponse = response.into_json().await.unwrap();
        assert_eq!(result, RollAddResponse { added: 1, skipped: 0 });

        // Bulk add with a duplicate and a bad address.
        let response = client
            .post(uri!(add_to_roll))
            .header(ContentType::JSON)
            .body(
                json!({
                    "emails": ["alice@example.com", "bob@example.com", "not-an-email"],
                })
                .to_string(),
            )
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        let result: RollAddResponse = response.into_json().await.unwrap();
        assert_eq!(result, RollAddResponse { added: 1, skipped: 2 });

        // Paginated listing, sorted by email.
        let response = client
            .get("/admin/voterroll?page_num=1&page_size=50")
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        let page: Paginated<String> = response.into_json().await.unwrap();
        assert_eq!(page.items, vec!["alice@example.com", "bob@example.com"]);
        assert_eq!(page.pagination.total, 2);

        // Delete.
        let response = client
            .delete(uri!(remove_from_roll("Bob@example.com")))
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        let response = client
            .delete(uri!(remove_from_roll("bob@example.com")))
            .dispatch()
            .await;
        assert_eq!(Status::NotFound, response.status());
    }

    #[backend_test]
    async fn admin_routes_need_admin(client: Client) {
        let response = client.get(uri!(list_elections)).dispatch().await;
        assert_eq!(Status::NotFound, response.status());

        let response = client
            .post(uri!(create_election))
            .header(ContentType::JSON)
            .body(json!(ElectionSpec::active_example()).to_string())
            .dispatch()
            .await;
        assert_eq!(Status::NotFound, response.status());
    }
}
