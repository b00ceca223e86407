//! Session state: the per-tab controller and the pure rules it applies.

mod controller;
/// Resume decision table.
pub mod resume;
/// Ordering of status observations from every source.
pub mod status;
/// Rendered view published to the UI.
pub mod view;

pub use self::controller::{
    CodeOutcome, ControllerConfig, SessionController, SubmitOutcome, TabEnvironment,
};
