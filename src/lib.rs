//! Task Tree Library
//!
//! Ordered task trees stored as parent / first-child / next-sibling pointers
//! in SQLite, with per-project locking and rolled-up time and expense
//! aggregates kept consistent on every mutation.

pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod format;
pub mod types;
