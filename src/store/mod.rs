//! Durable interval storage.
//!
//! This module contains:
//! - The RocksDB-backed ordered store with optimistic transactions
//! - Key layout for primary records and the two secondary indexes
//! - The record codec

pub mod codec;
pub mod keys;
pub mod rocks;

pub use rocks::{open_shared, IntervalStore, KvPair, SharedStore, StoreSnapshot, StoreTxn};
