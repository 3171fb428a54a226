//! Configuration for the solver
//!
//! Holds the user-facing knobs (edge bits, proof size, thread count) and the
//! JSON load/save plumbing used by embedding binaries.

mod settings;

pub use settings::Settings;
