//! Persistence layer: libSQL-backed storage for accounts, rules, leads and campaigns.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{Account, Database};
