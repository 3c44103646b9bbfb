//! critloop - a critic-gated iterative tool-calling agent engine
//!
//! A model drives each job by calling tools inside an isolated workspace; a
//! second model scores the work and gates completion. Many jobs run in
//! parallel with per-job deadlines, retries and a fallback prompt pass.

pub mod config;
pub mod context;
pub mod critic;
pub mod error;
pub mod jobs;
pub mod llm;
pub mod prompt;
pub mod retry;
pub mod runner;
pub mod tools;

pub use error::{CritloopError, Result};
