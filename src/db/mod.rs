//! Database module: row models and SQL repositories.
//!
//! - `model`: typed rows for pages and blocks.
//! - `repo`: SQL-only functions that map rows into models.
//!
//! Callers import from `wiki_sync::db`; the repository API is re-exported here.

pub mod model;
pub mod repo;

pub use repo::*;

pub use model::{BlockRow, CategoryCount, PageRow};
