//! Application-level orchestration.
//!
//! This module owns the run task: it is the only place a `RunController` is
//! mutated. UI/CLI layers send commands in and read events and snapshots out.

mod controller;

pub(crate) use controller::{start_run, UiCommand};
