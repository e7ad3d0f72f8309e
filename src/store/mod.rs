//! Transactional store abstraction and implementations.

mod memory;
#[cfg(feature = "tikv")]
mod tikv;
mod transactional;

pub use memory::MemoryStore;
#[cfg(feature = "tikv")]
pub use tikv::TikvStore;
pub use transactional::{Connect, Transaction, TransactionalStore};
