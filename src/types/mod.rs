// ABOUTME: Type-safe identifiers and validated domain types.
// ABOUTME: Colors, target names, attempt IDs, and fleet membership.

mod color;
mod fleet;
mod id;
mod target_name;

pub use color::{Color, ParseColorError, display_color};
pub use fleet::{Fleet, HealthState, Instance};
pub use id::{AttemptId, Id, InvalidAttemptId};
pub use target_name::{TargetName, TargetNameError};
