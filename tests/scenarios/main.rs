//! Scenario-based tests for lockstep

mod helpers;

mod concurrent_dispatch;
mod failure_handling;
mod federated_rounds;
mod linear_chain;
mod pipeline_queries;
