// Re-export core modules
pub use sigcore::{backoff, net, protocol, schedule, types};

pub mod calls;
pub mod chat;
pub mod config;
pub mod connection;
pub mod credentials;
pub mod error;
pub mod rest;
pub mod transport;

pub use calls::{CallError, CallManager, CallOrchestrator, CallSnapshot};
pub use config::ClientConfig;
pub use connection::{ConnectionManager, ConnectionState};
pub use credentials::{CredentialStore, StaticCredentials};
