// src/config/settings.rs - Solver settings

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::cuckoo::params::{MAX_EDGE_BITS, MIN_EDGE_BITS};
use crate::{MeanCuckooError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
/// Main configuration settings for the solver
pub struct Settings {
    /// Graph size exponent: the graph has 2^edge_bits potential edges
    pub edge_bits: u8,
    /// Required cycle length for a valid proof
    pub proof_size: u8,
    /// Number of worker threads for trimming and edge recovery
    pub threads: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            edge_bits: 29,  // production graph size (~2 GiB working set)
            proof_size: 42, // standard Cuckoo Cycle proof length
            threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        }
    }
}

impl Settings {
    /// Load settings from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let settings: Settings = serde_json::from_str(&data)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Save settings to a JSON file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(path, data)?;
        Ok(())
    }

    /// Check that the settings describe a solvable configuration
    pub fn validate(&self) -> Result<()> {
        if self.edge_bits < MIN_EDGE_BITS || self.edge_bits > MAX_EDGE_BITS {
            return Err(MeanCuckooError::Config(format!(
                "edge_bits {} outside supported range {}..={}",
                self.edge_bits, MIN_EDGE_BITS, MAX_EDGE_BITS
            )));
        }
        if self.proof_size == 0 || self.proof_size % 2 != 0 {
            return Err(MeanCuckooError::Config(format!(
                "proof_size {} must be a positive even number",
                self.proof_size
            )));
        }
        if self.threads == 0 {
            return Err(MeanCuckooError::Config(
                "threads must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.proof_size, 42);
    }

    #[test]
    fn test_rejects_out_of_range_edge_bits() {
        let mut settings = Settings::default();
        settings.edge_bits = 15;
        assert!(settings.validate().is_err());
        settings.edge_bits = 32;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_rejects_odd_proof_size() {
        let mut settings = Settings::default();
        settings.proof_size = 41;
        assert!(settings.validate().is_err());
        settings.proof_size = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_json_roundtrip() {
        let settings = Settings {
            edge_bits: 20,
            proof_size: 8,
            threads: 4,
        };
        let json = serde_json::to_string(&settings).unwrap();
        let back: Settings = serde_json::from_str(&json).unwrap();
        assert_eq!(back.edge_bits, 20);
        assert_eq!(back.proof_size, 8);
        assert_eq!(back.threads, 4);
    }
}
