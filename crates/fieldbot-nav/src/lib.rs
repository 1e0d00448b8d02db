//! Navigation for the fieldbot: turns a field-space pose and ball detections
//! into discrete robot commands.
//!
//! - [`compute_command`] is the single steering step toward a point, with a
//!   [`TurnDamper`] that breaks left/right hunting.
//! - [`NavigationEngine`] runs the search / approach / collect / deliver cycle
//!   and decides which target to steer to.
//! - [`Command`] is the robot instruction set with its textual wire form.

mod command;
mod engine;
mod params;
mod steering;

pub use command::{Command, CommandParseError, TurnDirection};
pub use engine::{Decision, NavigationEngine, NavigationState};
pub use params::NavParams;
pub use steering::{compute_command, Steering, TurnDamper, TurnRecord};
