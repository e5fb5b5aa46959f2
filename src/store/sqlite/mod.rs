//! SQLite-backed execution stores

mod schema;
mod store;

pub use store::SqliteStore;
