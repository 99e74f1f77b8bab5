//! Pubsubui service library crate.
//!
//! # Purpose
//! Exposes the bootstrap pipeline (catalog, client pool, provisioning and
//! readiness), the live-stream hub, and the HTTP API for use by the binary
//! and tests.
pub mod api;
pub mod app;
pub mod bootstrap;
pub mod cache;
pub mod catalog;
pub mod clients;
pub mod config;
pub mod hub;
pub mod observability;
pub mod provision;
pub mod readiness;
pub mod stream;

#[cfg(test)]
mod test_support;
