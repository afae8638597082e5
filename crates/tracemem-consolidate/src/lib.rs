//! Offline analysis of closed session traces.
//!
//! The engine pairs requests and delegations with their responses,
//! classifies every interaction, follows delegation chains and notes steps
//! that ended in unrecovered errors. Output depends only on the log, so the
//! same log always yields the same [`ConsolidationResult`].
//!
//! [`ConsolidationResult`]: tracemem_core::model::ConsolidationResult

pub mod engine;
pub mod error;
mod exchange;
mod gaps;

pub use engine::ConsolidationEngine;
pub use error::ConsolidateError;
