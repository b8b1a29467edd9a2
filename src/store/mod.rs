//! Persistence layer — relational rule rows (libSQL) and the JSON
//! responses file.

pub mod libsql_backend;
pub mod migrations;
pub mod responses_file;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{NewRule, RuleStore, RuleUpdate};
