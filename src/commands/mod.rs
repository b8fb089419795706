// ABOUTME: Command module aggregator for the kuapo CLI.
// ABOUTME: Re-exports deploy, status, and reconcile command handlers.

mod context;
mod deploy;
mod reconcile;
mod status;

pub use context::load_config;
pub use deploy::deploy;
pub use reconcile::reconcile;
pub use status::status;
