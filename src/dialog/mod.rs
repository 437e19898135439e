//! Per-participant conversation state machine.

pub mod handlers;
pub mod machine;
pub mod registry;
pub mod replies;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;

pub use machine::{Dialog, DialogDeps, Directive, Reconciliation};
pub use registry::{DialogRegistry, SharedDialog};
pub use state::{DialogState, StateContext};
