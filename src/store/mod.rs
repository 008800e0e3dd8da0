//! Row store for floodnel.
//!
//! One row per social-media post, kept in input order and persisted as CSV:
//! - **Passthrough columns**: everything the input carried, written back unchanged
//! - **Output columns**: status, attempts, error, the nine loss pairs and scalar scores
//!
//! # Example
//!
//! ```ignore
//! use floodnel::domain::Platform;
//! use floodnel::store::{RowStore, merge_resume};
//!
//! let columns = Platform::Tiktok.default_columns();
//! let fresh = RowStore::load(Path::new("posts.csv"), &columns)?;
//! let previous = RowStore::load(Path::new("posts_nel.csv"), &columns)?;
//! let store = merge_resume(&previous, fresh);
//! store.atomic_write(Path::new("posts_nel.csv"))?;
//! ```

pub mod columns;
mod row_store;

pub use row_store::{RowStore, StatusCounts, merge_resume};
