pub mod atomic;
pub mod memory_store;
pub mod state_file;

pub use memory_store::FileMemoryStore;
pub use state_file::StateFile;
