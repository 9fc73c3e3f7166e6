//! # Clinic Sync Library
//!
//! Tenant-scoped clinic records with live snapshot subscriptions and open webhook
//! ingestion, served by the dashboard API and the standalone webhook server.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod ingestion;
pub mod models;
pub mod relay;
pub mod server;
pub mod store;
pub mod telemetry;
pub mod writer;
pub use migration;
