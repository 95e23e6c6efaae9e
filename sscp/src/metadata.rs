//! Helpers that pick apart the metadata S3 reports about objects and their parts.
use crate::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use snafu::prelude::*;
use std::ops::RangeInclusive;

/// Objects uploaded with multipart have an ETag like `"<hash>-<part count>"`, quotes included.
static MULTIPART_ETAG: Lazy<Regex> = Lazy::new(|| Regex::new(r#"-(\d+)"$"#).unwrap());

/// S3 allows at most this many parts in a multipart upload
pub(crate) const MAX_PART_COUNT: u32 = 10_000;

static CONTENT_RANGE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^bytes (\d+)-(\d+)").unwrap());

/// Given an object's ETag, determine how many parts it was uploaded in.
///
/// Returns `None` if the ETag doesn't have the multipart suffix, meaning the object was uploaded
/// in a single request.  Only the end of the ETag is considered, so hyphens elsewhere in the tag
/// don't cause false positives.
pub fn extract_part_count(e_tag: &str) -> Option<u32> {
    MULTIPART_ETAG
        .captures(e_tag)
        .and_then(|captures| captures[1].parse().ok())
}

/// True if the ETag ends with a multipart suffix, whether or not the part count in it is usable.
pub(crate) fn has_multipart_suffix(e_tag: &str) -> bool {
    MULTIPART_ETAG.is_match(e_tag)
}

/// Parse the first and last byte offsets out of a `Content-Range` header value like
/// `bytes 0-999/5000`.
///
/// The returned range is inclusive on both ends, exactly as S3 reports it.
pub fn extract_byte_range(content_range: &str) -> Result<RangeInclusive<u64>> {
    let malformed = || {
        crate::error::MalformedContentRangeSnafu {
            content_range: content_range.to_string(),
        }
        .build()
    };

    let captures = CONTENT_RANGE.captures(content_range).ok_or_else(malformed)?;

    let start: u64 = captures[1].parse().map_err(|_| malformed())?;
    let end: u64 = captures[2].parse().map_err(|_| malformed())?;

    ensure!(
        start <= end,
        crate::error::MalformedContentRangeSnafu {
            content_range: content_range.to_string(),
        }
    );

    Ok(start..=end)
}
