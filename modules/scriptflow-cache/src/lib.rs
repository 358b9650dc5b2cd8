pub mod error;
pub mod kv;

pub use error::{KvError, Result};
pub use kv::{KvStore, MemoryKv, RedisKv};
