//! Order broker library.
//!
//! Ingests order aggregates from a Kafka partition into `PostgreSQL`, keeps
//! every stored order in an in-memory cache, and serves read-through lookups
//! over HTTP. The binary in `main.rs` wires these pieces together; the
//! library form lets the integration tests drive them with in-memory doubles.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod bootstrap;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod intake;
pub mod query;
pub mod routes;
pub mod state;
pub mod stream;
