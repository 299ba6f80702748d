//! Pipeline orchestration and domain logic for docqa.
//!
//! This crate ties extraction, enrichment, and indexing into batch stages,
//! and serves grounded answers over the built index.

pub mod checkpoint;
pub mod curated;
pub mod engine;
pub mod enrichment;
pub mod indexer;
pub mod pipeline;
pub mod retry;
