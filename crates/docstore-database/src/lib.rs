//! # docstore-database
//!
//! PostgreSQL connection management, the repository traits the services
//! depend on, and two implementations of each: sqlx-backed repositories
//! for PostgreSQL and single-mutex in-memory repositories.

pub mod connection;
pub mod memory;
pub mod migration;
pub mod repositories;

pub use connection::DatabasePool;
pub use repositories::{DocumentRepository, JobRepository, NodeDirectory};
