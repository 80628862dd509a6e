use std::ops::{Deref, DerefMut};

use mongodb::error::Error as DbError;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::model::mongodb::{Coll, Id};

pub const DEFAULT_ADMIN_USERNAME: &str = "admin";

/// Core admin user data.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminCore {
    pub username: String,
    pub password_hash: String,
}

impl AdminCore {
    /// Hash the given password and construct an admin.
    pub fn new(username: String, password: &str) -> Self {
        let salt: [u8; 16] = rand::thread_rng().gen();
        let password_hash =
            argon2::hash_encoded(password.as_bytes(), &salt, &argon2::Config::default())
                .expect("Hashing with the default config never fails");
        Self {
            username,
            password_hash,
        }
    }

    /// Check whether the given password is correct.
    pub fn verify_password<T: AsRef<[u8]>>(&self, password: T) -> bool {
        // Unwrap safe because the only way to create an AdminCore is via
        // `new`, so the hash is always well-formed.
        argon2::verify_encoded(&self.password_hash, password.as_ref()).unwrap()
    }
}

/// An admin without an ID.
pub type NewAdmin = AdminCore;

/// An admin user from the database, with its unique ID.
#[derive(Debug, Serialize, Deserialize)]
pub struct Admin {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub admin: AdminCore,
}

impl Deref for Admin {
    type Target = AdminCore;

    fn deref(&self) -> &Self::Target {
        &self.admin
    }
}

impl DerefMut for Admin {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.admin
    }
}

/// Ensure at least one admin exists, creating the default one if needed.
/// Called during launch so a fresh deployment is never locked out.
pub async fn ensure_admin_exists(
    admins: &Coll<NewAdmin>,
    default_password: &str,
) -> Result<(), DbError> {
    let count = admins.count_documents(None, None).await?;
    if count == 0 {
        let admin = AdminCore::new(DEFAULT_ADMIN_USERNAME.to_string(), default_password);
        admins.insert_one(admin, None).await?;
        warn!(
            "Created default admin '{DEFAULT_ADMIN_USERNAME}'; \
change its password before going live"
        );
    }
    Ok(())
}

/// Example data for tests.
#[cfg(test)]
mod examples {
    use super::*;

    impl AdminCore {
        pub fn example() -> Self {
            Self::new("coordinator".to_string(), "correct horse battery staple")
        }
    }
}
