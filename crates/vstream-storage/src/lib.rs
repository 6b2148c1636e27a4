//! S3 object storage client.
//!
//! The API server never moves video bytes itself: clients upload straight
//! to the bucket with a presigned PUT, and playback of transcoded output
//! goes through short-lived presigned GETs.

pub mod client;
pub mod error;

pub use client::{validate_object_key, S3Client, S3Config};
pub use error::{StorageError, StorageResult};
