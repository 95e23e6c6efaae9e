//! Parsing of `s3://bucket/key` URLs into references to individual objects.
use crate::Result;
use snafu::prelude::*;
use std::fmt;
use url::Url;

/// A reference to a single object in S3, identified by its bucket and key.
///
/// The only way to get one of these is by parsing a URL, see [`Self::from_url`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ObjectReference {
    bucket: String,
    key: String,
}

impl ObjectReference {
    /// Parse a string into a URL and then into an object reference.
    ///
    /// The key is exactly the text following `s3://<bucket>/` in `url` (up to any query or
    /// fragment), so keys that literally contain `%` escapes or characters the URL syntax would
    /// escape are preserved as typed.
    pub fn parse(url: &str) -> Result<Self> {
        let parsed = Url::parse(url).with_context(|_| crate::error::InvalidUrlSnafu {
            url: url.to_string(),
        })?;

        Ok(Self {
            bucket: s3_bucket(&parsed)?.to_string(),
            key: raw_s3_key(url),
        })
    }

    /// Extract the bucket and object key from an S3 URL.
    ///
    /// S3 URLs are of the form `s3://bucket/key`.  In URL terms, the bucket is the host name and
    /// the key is the path without its leading `/`.  The key is otherwise taken literally: an empty
    /// key or one with a trailing `/` is passed through as-is.
    ///
    /// A [`Url`] only holds its path in escaped form, so percent-escapes in the path are decoded.
    /// If the decoded bytes aren't valid UTF-8 this fails rather than guess at the key.  To use
    /// keys containing literal `%` escapes, use [`Self::parse`] instead.
    pub fn from_url(url: &Url) -> Result<Self> {
        let bucket = s3_bucket(url)?;

        let path = url.path();
        let key = percent_encoding::percent_decode_str(path.strip_prefix('/').unwrap_or(path))
            .decode_utf8()
            .with_context(|_| crate::error::InvalidKeyEncodingSnafu { url: url.clone() })?;

        Ok(Self {
            bucket: bucket.to_string(),
            key: key.into_owned(),
        })
    }

    /// The name of the bucket holding the object
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// The object's key within its bucket
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Display for ObjectReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}

/// The bucket of an `s3://` URL, failing if it's some other kind of URL or has no bucket
fn s3_bucket(url: &Url) -> Result<&str> {
    ensure!(
        url.scheme() == "s3",
        crate::error::UnsupportedObjectStorageSnafu { url: url.clone() }
    );

    url.host_str()
        .filter(|host| !host.is_empty())
        .context(crate::error::MissingBucketSnafu { url: url.clone() })
}

/// The key portion of an `s3://bucket/key` string that's already been validated as a URL,
/// without any of the escaping or unescaping the URL parser does.
///
/// The URL parser ignores leading and trailing whitespace and control characters, so that's
/// skipped here too.  The query and fragment, if any, aren't part of the key.
fn raw_s3_key(url: &str) -> String {
    let url = url.trim_matches(|c: char| c <= ' ');

    let after_scheme = url.split_once("://").map_or(url, |(_, rest)| rest);

    let Some((_bucket, path)) = after_scheme.split_once('/') else {
        // `s3://bucket`, with no path at all
        return String::new();
    };

    let end = path
        .find(|c: char| c == '?' || c == '#')
        .unwrap_or(path.len());

    path[..end].to_string()
}
