//! Authenticated session: durable storage, the in-memory store, and silent
//! token renewal.

pub mod jwt;
mod refresh;
mod storage;
mod store;

pub use refresh::TokenRefresher;
pub use storage::{FileStorage, MemoryStorage, SessionStorage, keys};
pub use store::{Session, SessionStore};
