//! HTTP handlers for declared routes.

pub mod entity;
pub use entity::execute;
