mod state;
mod storage;

pub use storage::MemoryBackend;
