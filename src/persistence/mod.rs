//! SQLite helpers shared by the persistent stores.

mod schema;

pub use schema::{open_versioned, Column, SqlType, Table, VersionedSchema, BASE_DB_VERSION};
