#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! Runtime helpers for the Meridian master.
//!
//! - [`TaskSupervisor`] / [`run_forever`] keep listeners and controllers alive
//! - [`wait_for_successful_dial`] confirms a freshly bound listener accepts connections

pub mod probe;
pub mod supervisor;

pub use probe::{DialBudget, ProbeError, wait_for_successful_dial};
pub use supervisor::{
    ExitCallback, ExitReason, RestartPolicy, SupervisedTask, TaskExit, TaskHandle, TaskSupervisor,
    run_forever,
};
