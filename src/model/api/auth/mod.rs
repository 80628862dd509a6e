mod identity;
mod token;
mod user;

pub use identity::{IdentityClaims, VoterCallback};
pub use token::{AuthToken, AUTH_TOKEN_COOKIE};
pub use user::{Rights, User};
