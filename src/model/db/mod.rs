//! Database model types, mirroring the collections created by
//! [`crate::model::mongodb::ensure_indexes_exist`].

mod admin;
mod ballot;
mod candidate;
mod election;
mod roll;
mod voter;

pub use admin::*;
pub use ballot::*;
pub use candidate::*;
pub use election::*;
pub use roll::*;
pub use voter::*;
