//! # Formats Module
//!
//! Byte-level encodings of an `AssemblyGraph`. Pure transformations; file I/O
//! lives in the CLI.

mod persistence;

pub use persistence::*;
