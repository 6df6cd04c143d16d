//! Control unit: turns a natural-language request into an execution plan
//! over the currently live services and runs it.
//!
//! Stages, in order: [`discovery`] resolves the service snapshot,
//! [`planner`] compiles the plan, [`dispatch`] executes it and
//! [`aggregate`] builds the envelope. [`controller::Controller`] wires them.

pub mod aggregate;
pub mod config;
pub mod controller;
pub mod discovery;
pub mod dispatch;
pub mod error;
pub mod planner;
pub mod scratch;
pub mod server;
pub mod types;

#[cfg(test)]
mod tests;

pub use aggregate::{ControlOutcome, ResultAggregator};
pub use config::ControlConfig;
pub use controller::Controller;
pub use error::ControlError;
pub use types::*;
