// ABOUTME: Library root for kuapo - the blue/green release orchestrator.
// ABOUTME: The main binary is in main.rs.

pub mod config;
pub mod deploy;
pub mod diagnostics;
pub mod error;
pub mod external;
pub mod health;
pub mod notify;
pub mod output;
pub mod provision;
pub mod retire;
pub mod smoke;
pub mod store;
pub mod traffic;
pub mod types;
