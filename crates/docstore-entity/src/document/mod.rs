//! Document and version domain entities.

pub mod model;
pub mod version;

pub use model::{Document, DocumentWithVersion, NewDocument};
pub use version::{NewVersion, Version};
