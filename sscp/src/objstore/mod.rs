use crate::{ObjectReference, Result};
use dyn_clone::DynClone;
use std::ops::RangeInclusive;

mod s3;

pub use s3::S3StorageClient;

/// Metadata about an object (or one part of an object) as reported by a HEAD request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectMetadata {
    /// The entity tag, including the surrounding double quotes S3 puts on it.
    ///
    /// For objects uploaded with multipart this ends with `-<part count>`, see
    /// [`crate::extract_part_count`].
    pub e_tag: String,

    /// The `Content-Range` of the response.
    ///
    /// Only present when the HEAD request was restricted to a single part, in which case it looks
    /// like `bytes <start>-<end>/<total>`.
    pub content_range: Option<String>,

    /// The size in bytes of the object, or of the part if the request was for a single part.
    pub content_length: Option<u64>,
}

/// Proof that one part of a multipart upload was written successfully.
///
/// Completing the upload requires one of these for every part, listed in ascending
/// `part_number` order.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PartCompletionHandle {
    pub e_tag: String,
    pub part_number: u32,
}

/// The server-side operations an object copy needs from an object storage system.
///
/// The S3 implementation is [`S3StorageClient`], but the copy logic only ever talks to this trait
/// so other implementations can be substituted, tests being the obvious case.
///
/// Implementations are used from many concurrent part copies at once, and should be trivially
/// cloneable such that the cost of a clone is the cost of increasing the ref count on an `Arc`.
#[async_trait::async_trait]
pub trait StorageClient: DynClone + std::fmt::Debug + Sync + Send + 'static {
    /// Get the metadata of an object.
    ///
    /// If `part_number` is given, the metadata describes only that part of a multipart object,
    /// including the byte range the part occupies.
    async fn head_object(
        &self,
        object: &ObjectReference,
        part_number: Option<u32>,
    ) -> Result<ObjectMetadata>;

    /// Copy an entire object in one request.
    async fn copy_object(&self, source: &ObjectReference, target: &ObjectReference) -> Result<()>;

    /// Start a multipart upload to `target`, returning the upload ID.
    async fn create_multipart_upload(&self, target: &ObjectReference) -> Result<String>;

    /// Copy the bytes `byte_range` (inclusive) of `source` into part `part_number` of the
    /// multipart upload `upload_id`, returning the ETag of the new part.
    async fn upload_part_copy(
        &self,
        source: &ObjectReference,
        target: &ObjectReference,
        upload_id: &str,
        part_number: u32,
        byte_range: RangeInclusive<u64>,
    ) -> Result<String>;

    /// Finish a multipart upload, making the object visible at `target`.
    ///
    /// `parts` must be sorted by part number.
    async fn complete_multipart_upload(
        &self,
        target: &ObjectReference,
        upload_id: &str,
        parts: Vec<PartCompletionHandle>,
    ) -> Result<()>;

    /// Abandon a multipart upload, discarding any parts already written to it.
    async fn abort_multipart_upload(&self, target: &ObjectReference, upload_id: &str)
        -> Result<()>;
}

dyn_clone::clone_trait_object!(StorageClient);
