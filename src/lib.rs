//! # Genoma diagnostic server
//!
//! A framed TCP/TLS service that keeps a catalog of pathogen signatures,
//! registers patients and their DNA samples, scans each sample for known
//! signatures and compares samples of the same patient over time.

pub mod client;
pub mod config;
pub mod domain;
pub mod engine;
pub mod registry;
pub mod reports;
pub mod server;
pub mod utils;
