//! Classification tree entities.

pub mod model;

pub use model::Node;
