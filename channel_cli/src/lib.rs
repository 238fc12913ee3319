pub mod config;
pub mod error;
pub mod identities;
pub mod scenario;
