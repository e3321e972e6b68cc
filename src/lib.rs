//! shboost - race-free shell fragments for workflow jobs
//!
//! Generates bash fragments that provision cached python environments,
//! mount tar archives as directories, and guard a virtual display around a
//! job's command. Fragments compose, and a composed script can be packaged
//! as a cached executable so the scheduler only sees a one-line call.

pub mod boost;
pub mod cache;
pub mod cli;
pub mod config;
pub mod enhance;
pub mod error;
pub mod hash;
pub mod lock;
pub mod process;
pub mod shell;
pub mod template;

pub use error::{BoostError, BoostResult};
