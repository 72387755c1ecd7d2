//! HTTP coordinator service for federated fraud-model training.

pub mod api;
pub mod error;
pub mod federation;

pub use api::router;
pub use federation::FederationModule;
