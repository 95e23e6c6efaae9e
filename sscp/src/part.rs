//! Copying of a single part of a multipart object.
use crate::objstore::{PartCompletionHandle, StorageClient};
use crate::{ObjectReference, Result};
use snafu::prelude::*;
use tracing::{debug, instrument};

/// Copy part `part_number` of `source` into the same part number of the multipart upload
/// `upload_id` on `target`.
///
/// The byte range of the part is looked up with a HEAD on that part of the source, so the copy
/// reproduces the source's part boundaries exactly.  The returned handle always carries the
/// `part_number` passed in here, whatever the storage system reports.
#[instrument(skip(client, source, target), fields(source = %source, target = %target))]
pub async fn copy_part(
    client: &dyn StorageClient,
    source: &ObjectReference,
    target: &ObjectReference,
    upload_id: &str,
    part_number: u32,
) -> Result<PartCompletionHandle> {
    let metadata = client.head_object(source, Some(part_number)).await?;

    let content_range =
        metadata
            .content_range
            .with_context(|| crate::error::MissingContentRangeSnafu {
                bucket: source.bucket().to_string(),
                key: source.key().to_string(),
                part_number,
            })?;

    let byte_range = crate::extract_byte_range(&content_range)?;

    debug!(
        first_byte = *byte_range.start(),
        last_byte = *byte_range.end(),
        "Copying part"
    );

    let e_tag = client
        .upload_part_copy(source, target, upload_id, part_number, byte_range)
        .await?;

    debug!(%e_tag, "Copied part");

    Ok(PartCompletionHandle { e_tag, part_number })
}
