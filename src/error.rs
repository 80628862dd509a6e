use jsonwebtoken::errors::{Error as JwtError, ErrorKind as JwtErrorKind};
use mongodb::error::Error as DbError;
use rocket::{http::Status, response::Responder};
use thiserror::Error;

use crate::engine::CastError;
use crate::logging::RequestId;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Db(#[from] DbError),
    #[error(transparent)]
    Jwt(#[from] JwtError),
    /// An error with an explicit response status.
    #[error("{1}")]
    Status(Status, String),
}

impl Error {
    /// A 404 for the given missing resource.
    pub fn not_found(what: String) -> Self {
        Self::Status(Status::NotFound, format!("{what} not found."))
    }

    /// The status this error will respond with.
    pub fn status(&self) -> Status {
        match self {
            Self::Db(_) => Status::InternalServerError,
            Self::Jwt(err) => match err.kind() {
                JwtErrorKind::ExpiredSignature | JwtErrorKind::ImmatureSignature => {
                    Status::Unauthorized
                }
                _ => Status::BadRequest,
            },
            Self::Status(status, _) => *status,
        }
    }
}

impl From<CastError> for Error {
    fn from(err: CastError) -> Self {
        match err {
            CastError::NotFound => Self::Status(Status::NotFound, err.to_string()),
            CastError::VotingClosed | CastError::InvalidSelection(_) => {
                Self::Status(Status::BadRequest, err.to_string())
            }
            CastError::AlreadyVoted => Self::Status(Status::Forbidden, err.to_string()),
            CastError::Transient => Self::Status(Status::ServiceUnavailable, err.to_string()),
            CastError::Db(db_err) => Self::Db(db_err),
        }
    }
}

impl<'r, 'o: 'r> Responder<'r, 'o> for Error {
    fn respond_to(self, req: &'r rocket::Request<'_>) -> rocket::response::Result<'o> {
        let id = req.local_cache(RequestId::next);
        let status = self.status();
        match status.class() {
            rocket::http::StatusClass::ServerError => error!("req{id} failed: {self:?}"),
            _ => debug!("req{id} rejected: {self}"),
        }
        Err(status)
    }
}
