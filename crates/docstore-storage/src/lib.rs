//! # docstore-storage
//!
//! Object store implementations for DocStore. Supports the local
//! filesystem and S3-compatible object stores behind the
//! [`ObjectStore`](docstore_core::traits::storage::ObjectStore) trait.

pub mod factory;
pub mod key;
pub mod providers;
pub mod tracked;

pub use factory::build_object_store;
pub use providers::LocalObjectStore;
#[cfg(feature = "s3")]
pub use providers::S3ObjectStore;
pub use tracked::TrackedStream;
