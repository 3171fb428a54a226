// src/lib.rs - Main library file for the mean Cuckoo Cycle solver

//! Mean Cuckoo Cycle solver
//!
//! A multi-threaded, cache-conscious CPU solver for the Cuckoo Cycle
//! proof-of-work. Given a header, it enumerates the implicit bipartite graph
//! of `2^edge_bits` siphash-generated edges, trims edges that cannot lie on a
//! cycle through a bucket-sorted trimming pipeline, and reports every simple
//! cycle of the requested length.
//!
//! # Version History
//! - 0.1.0: Initial scalar trimmer and cycle finder
//! - 0.2.0: Bucketed multi-threaded trimming pipeline, rename compression
//! - 0.2.1: Runtime AVX2 dispatch for 8-way siphash batches

#![warn(missing_docs)]
// Note: the trimmer shares one large bucket arena between worker threads with
// writes partitioned by bucket index, which requires raw-pointer stores.
#![allow(unsafe_code)]

/// Configuration module for solver settings
pub mod config;
/// Cuckoo Cycle solver: siphash edge generation, trimming, cycle search
pub mod cuckoo;

// Re-export main types for convenience
pub use config::Settings;
pub use cuckoo::{find_cycles, Cycle, SolverError};

use thiserror::Error;

/// Main error type for the solver crate
#[derive(Error, Debug)]
pub enum MeanCuckooError {
    /// Solver-related errors
    #[error("Solver error: {0}")]
    Solver(#[from] SolverError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO operation errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Hex decode errors (headers supplied as hex strings)
    #[error("Hex decode error: {0}")]
    Hex(#[from] hex::FromHexError),
}

/// Result type alias for solver operations
pub type Result<T> = std::result::Result<T, MeanCuckooError>;

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
/// Application name from Cargo.toml
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Initialize logging for embedding binaries
pub fn init() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    tracing::info!("{} v{} - mean Cuckoo Cycle solver", NAME, VERSION);

    Ok(())
}

/// Solve from a hex-encoded header string.
///
/// Headers arrive hex-encoded from block templates and test fixtures; this
/// decodes and forwards to [`find_cycles`].
pub fn find_cycles_hex(
    header_hex: &str,
    edge_bits: u8,
    proof_size: u8,
    threads: usize,
) -> Result<Vec<Cycle>> {
    let header = hex::decode(header_hex)?;
    Ok(find_cycles(&header, edge_bits, proof_size, threads)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_header_matches_raw_bytes() {
        let from_hex = find_cycles_hex("deadbeef", 16, 4, 1).unwrap();
        let from_bytes = find_cycles(&[0xde, 0xad, 0xbe, 0xef], 16, 4, 1).unwrap();
        assert_eq!(from_hex, from_bytes);
    }

    #[test]
    fn test_hex_header_rejects_bad_input() {
        assert!(matches!(
            find_cycles_hex("not hex", 16, 4, 1),
            Err(MeanCuckooError::Hex(_))
        ));
    }
}
