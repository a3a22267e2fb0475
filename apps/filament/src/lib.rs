//! # Filament - THE BINARY (library surface)
//!
//! Module tree of the Filament application, exposed as a library so
//! integration tests can drive the HTTP router and the coordinator service
//! without spawning a real process.

pub mod api;
pub mod cli;
pub mod config;
pub mod service;
