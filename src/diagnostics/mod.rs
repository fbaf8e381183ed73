//! Pipeline throughput diagnostics.

pub mod stats;
