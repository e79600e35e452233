pub mod docker;
pub mod engine;
pub mod evaluator;
pub mod executor;
pub mod harness;
pub mod local;
pub mod planner;
pub mod resolver;

#[cfg(test)]
mod engine_tests;

pub use executor::{Judge, JudgeError, JudgeOptions};
