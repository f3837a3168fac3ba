//! quarry: SQL over structured files
//!
//! Imports CSV, JSON, XML, YAML and TOML sources into an embedded SQLite
//! database and caches the result, so re-running a query over unchanged
//! files skips the import.

pub mod cli;
pub mod core;
pub mod formats;
