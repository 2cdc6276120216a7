//! Dattoham AI library crate
//!
//! Routes chat-style generation requests to a local model server or the
//! cloud API, with a bounded recovery protocol between them. The `dattoham`
//! binary and the benchmarks are thin layers over these modules.

pub mod actions;
pub mod backend;
pub mod catalog;
pub mod config;
pub mod error;
pub mod gateway;
pub mod keyring;
pub mod message;
pub mod recovery;
pub mod setup;

pub use config::{ConfigStore, ConfigUpdate, Provider, ProviderConfig};
pub use error::AssistantError;
pub use gateway::{Gateway, Generation, Reply};
pub use message::{ChatMessage, GenerationOptions, Role};
