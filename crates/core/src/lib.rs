//! Order Broker Core - Shared types library.
//!
//! This crate provides the order aggregate shared by every Order Broker component:
//! - `broker` - Kafka intake, order cache, and HTTP lookup service
//! - `cli` - Migrations and the sample order producer
//!
//! # Architecture
//!
//! The core crate contains only types - no I/O, no database access, no Kafka
//! clients. This keeps it lightweight and allows it to be used anywhere.
//!
//! # Modules
//!
//! - [`types`] - The order aggregate and the validated `OrderUid` identifier

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
