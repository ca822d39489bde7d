//! Compiled-package caching: a local content-addressed tree cache, and an
//! optional remote `BlobStore` (§4.4, §6).

mod error;
mod local;
mod store;

pub use error::{Error, Result};
pub use local::LocalCache;
pub use store::{BlobStore, HttpBlobStore, NullBlobStore};
