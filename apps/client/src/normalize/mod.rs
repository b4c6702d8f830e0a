// Payload normalization: server snake_case → client camelCase, data flattening.
// Pure functions only; no I/O.

pub mod keys;
pub mod response;

pub use keys::{camelize_keys, camelize_map, snake_to_camel};
pub use response::{normalize_entities, normalize_entity, normalize_generated};
