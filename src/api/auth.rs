use mongodb::bson::doc;
use rocket::{
    http::{Cookie, CookieJar, Status},
    serde::json::Json,
    Route, State,
};

use crate::{
    error::{Error, Result},
    model::{
        api::{
            admin::AdminCredentials,
            auth::{AuthToken, IdentityClaims, VoterCallback, AUTH_TOKEN_COOKIE},
            voter::VoterDescription,
        },
        db::{normalize_email, Admin, NewVoter, RollEntry, Voter, VoterCore},
        mongodb::{is_duplicate_key_error, Coll, Id},
    },
    Config,
};

pub fn routes() -> Vec<Route> {
    routes![authenticate, voter_callback, logout]
}

#[post("/auth/admin", data = "<credentials>", format = "json")]
pub async fn authenticate(
    cookies: &CookieJar<'_>,
    credentials: Json<AdminCredentials>,
    admins: Coll<Admin>,
    config: &State<Config>,
) -> Result<()> {
    let with_username = doc! {
        "username": &credentials.username,
    };

    let admin = admins
        .find_one(with_username, None)
        .await?
        .filter(|admin| admin.verify_password(&credentials.password))
        .ok_or_else(|| {
            Error::Status(
                Status::Unauthorized,
                "No admin found with the provided username and password combination.".to_string(),
            )
        })?;

    let token = AuthToken::new(&admin);
    cookies.add(token.into_cookie(config));

    Ok(())
}

/// Complete voter sign-in from an identity-provider callback.
///
/// The identity token proves who the voter is; the voter roll (when enabled)
/// decides whether they may sign in at all. Voters are created on first
/// sign-in and have their profile refreshed on every later one.
#[post("/auth/voter", data = "<callback>", format = "json")]
pub async fn voter_callback(
    callback: Json<VoterCallback>,
    cookies: &CookieJar<'_>,
    roll: Coll<RollEntry>,
    voters: Coll<Voter>,
    new_voters: Coll<NewVoter>,
    config: &State<Config>,
) -> Result<Json<VoterDescription>> {
    let claims = IdentityClaims::verify(&callback.identity_token, config)?;
    let email = normalize_email(&claims.email);

    if config.require_voter_roll() {
        let on_roll = roll
            .find_one(doc! { "email": &email }, None)
            .await?
            .is_some();
        if !on_roll {
            return Err(Error::Status(
                Status::Forbidden,
                "You are not an eligible voter.".to_string(),
            ));
        }
    }

    let profile = VoterCore {
        name: claims.name.unwrap_or_else(|| email.clone()),
        identity_ref: claims.sub,
        profile_image_url: claims.avatar_url.unwrap_or_default(),
        email: email.clone(),
    };

    let with_email = doc! { "email": &email };
    let db_voter = if let Some(mut existing) = voters.find_one(with_email.clone(), None).await? {
        // Refresh the profile on every sign-in.
        let update = doc! {
            "$set": {
                "name": &profile.name,
                "identity_ref": &profile.identity_ref,
                "profile_image_url": &profile.profile_image_url,
            },
        };
        voters.update_one(existing.id.as_doc(), update, None).await?;
        existing.voter = profile;
        existing
    } else {
        match new_voters.insert_one(&profile, None).await {
            Ok(result) => {
                let new_id: Id = result
                    .inserted_id
                    .as_object_id()
                    .unwrap() // Valid because the ID comes directly from the DB.
                    .into();
                Voter {
                    id: new_id,
                    voter: profile,
                }
            }
            // A concurrent first sign-in beat us to it; use their record.
            Err(err) if is_duplicate_key_error(&err) => voters
                .find_one(with_email, None)
                .await?
                .ok_or_else(|| Error::Status(
                    Status::InternalServerError,
                    "Voter vanished during sign-in.".to_string(),
                ))?,
            Err(err) => return Err(err.into()),
        }
    };

    let token = AuthToken::new(&db_voter);
    cookies.add(token.into_cookie(config));

    Ok(Json(db_voter.into()))
}

#[post("/auth/logout")]
pub fn logout(cookies: &CookieJar) -> Status {
    cookies.remove(Cookie::named(AUTH_TOKEN_COOKIE));
    Status::Ok
}
