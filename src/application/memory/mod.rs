pub mod engine;

pub use engine::{MemoryConfig, MemoryContext, MemoryEngine};
