//! Shared fixtures and end-to-end engine scenarios run against an offline output
pub mod support;

mod engine_scenarios;
