//! Core domain models
//!
//! This module defines the data structures shared by the coordinator and
//! the nodes: pipelines and their stages, the operations jobs execute,
//! jobs and lock edges, and their configuration.

pub mod config;
pub mod environment;
pub mod feature;
pub mod filter;
pub mod job;
pub mod operation;
pub mod pipeline;
pub mod state;
pub mod transformer;

pub use environment::*;
pub use feature::*;
pub use filter::*;
pub use job::*;
pub use operation::*;
pub use pipeline::*;
pub use state::*;
pub use transformer::*;
