//! Adapters implementing the domain ports: stores, processors and catalogue sources.

pub mod catalogue;
pub mod http;
pub mod in_memory;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
pub mod sandbox;
