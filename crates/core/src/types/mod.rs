//! Core types for Order Broker.
//!
//! This module provides the order aggregate and a type-safe order identifier.

pub mod id;
pub mod order;

pub use id::{OrderUid, OrderUidError};
pub use order::{Delivery, Item, Order, Payment};
