//! Entity model for the data-access layer
//!
//! Defines the capability bound every stored record satisfies and the
//! serializable predicates used for filtered reads.

pub mod entity;
pub mod predicate;

// Re-export commonly used types
pub use entity::Entity;
pub use predicate::Predicate;
