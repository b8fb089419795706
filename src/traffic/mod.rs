// ABOUTME: Traffic Director seam and the atomic blue/green switcher built on it.
// ABOUTME: The switcher cleans up partial registrations and confirms the live color.

mod director;
mod switcher;

pub use director::{DirectorError, TrafficDirector};
pub use switcher::{SwitchError, TrafficSwitcher};
