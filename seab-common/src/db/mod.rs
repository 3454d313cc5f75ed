//! Database layer: initialization and submission queries.

pub mod init;
pub mod submissions;

pub use init::{create_tables, init_database};
