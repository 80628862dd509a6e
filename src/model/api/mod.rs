//! Request and response types for the HTTP API.

pub mod admin;
pub mod auth;
pub mod election;
pub mod pagination;
pub mod results;
pub mod vote;
pub mod voter;
