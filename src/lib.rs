//! Folio Holdings Tracker Library
//!
//! This library provides the core components for the folio portfolio tracking
//! service: the position ledger, the market data resolver with its two-tier
//! cache, and the SQLite-backed stores.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod persistence;
