//! sqlgate-server — REST surface for the sqlgate promotion service.

pub mod auth;
pub mod config;
pub mod error;
pub mod github;
pub mod handlers;
pub mod router;
pub mod scheduler;
