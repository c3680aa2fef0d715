//! Core pipeline orchestration and domain logic for billsync.
//!
//! This crate ties together collection, enrichment, assembly, filtering,
//! the state join and feature-store reconciliation into one sync run
//! (see [`pipeline::run_sync`]).

pub mod assembler;
pub mod features;
pub mod filter;
pub mod geo;
pub mod pipeline;
pub mod reconcile;
pub mod retention;
