pub mod entity;

pub use entity::{Draft, Entity, EntityKind};
