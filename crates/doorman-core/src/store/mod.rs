//! Durable persistence: token records and cached inventory.
//!
//! Everything lives as JSON under the per-system cache directory. Token
//! records get atomic writes; entity caches are best-effort display data.

pub mod entities;
pub mod tokens;

pub use entities::{CachedData, EntityCache};
pub use tokens::TokenStore;
