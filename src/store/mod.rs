//! Persistence layer: repository trait plus the in-memory backend.

pub mod memory;
pub mod traits;

pub use memory::MemoryRepository;
pub use traits::{Entity, Handle, Repository};
