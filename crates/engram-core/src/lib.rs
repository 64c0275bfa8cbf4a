pub mod hooks;
pub mod kinds;

pub use kinds::{EndReason, ObservationKind};
