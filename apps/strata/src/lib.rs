//! # strata
//!
//! Command-line front end for `strata-core`: reads composite layouts as JSON,
//! builds block hierarchies, answers selector queries and moves graphs
//! between the binary, canonical and JSON formats.
//!
//! All file I/O lives in this crate; `strata-core` only sees bytes and values.

pub mod cli;
pub mod config;
