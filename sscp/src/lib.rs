#![doc = include_str!("../README.md")]

mod config;
mod copy;
mod error;
mod locator;
mod metadata;
mod objstore;
mod part;

pub use config::Config;
pub use copy::*;
pub use error::{Result, S3CopyError};
pub use locator::ObjectReference;
pub use metadata::{extract_byte_range, extract_part_count};
pub use objstore::{ObjectMetadata, PartCompletionHandle, S3StorageClient, StorageClient};
pub use part::copy_part;
