use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::operation::{
    abort_multipart_upload::AbortMultipartUploadError,
    complete_multipart_upload::CompleteMultipartUploadError, copy_object::CopyObjectError,
    create_multipart_upload::CreateMultipartUploadError, head_object::HeadObjectError,
    upload_part_copy::UploadPartCopyError,
};
use snafu::prelude::*;
use url::Url;

pub type Result<T, E = S3CopyError> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum S3CopyError {
    #[snafu(display("'{url}' is not a valid URL"))]
    InvalidUrl {
        url: String,
        source: url::ParseError,
    },

    #[snafu(display("The URL '{url}' doesn't correspond to any supported object storage technology.  Supported URL schemes are: s3"))]
    UnsupportedObjectStorage { url: Url },

    #[snafu(display("The S3 URL '{url}' is missing the bucket name"))]
    MissingBucket { url: Url },

    #[snafu(display("The object key in the S3 URL '{url}' is not valid UTF-8 once unescaped"))]
    InvalidKeyEncoding {
        url: Url,
        source: std::str::Utf8Error,
    },

    #[snafu(display("Error getting metadata about object '{key}' on S3 bucket '{bucket}'"))]
    HeadObject {
        bucket: String,
        key: String,
        source: SdkError<HeadObjectError>,
    },

    #[snafu(display("S3 returned no ETag for object '{key}' on S3 bucket '{bucket}'"))]
    MissingETag { bucket: String, key: String },

    #[snafu(display(
        "S3 returned no content range for part {part_number} of object '{key}' on S3 bucket '{bucket}'"
    ))]
    MissingContentRange {
        bucket: String,
        key: String,
        part_number: u32,
    },

    #[snafu(display("Content range '{content_range}' does not match the expected pattern 'bytes <start>-<end>'"))]
    MalformedContentRange { content_range: String },

    #[snafu(display("The ETag {e_tag} reports a multipart object with an invalid number of parts; S3 allows 1 to 10000"))]
    InvalidPartCount { e_tag: String },

    #[snafu(display("Part number {part_number} is out of the range S3 accepts"))]
    InvalidPartNumber { part_number: u32 },

    #[snafu(display("Error copying object '{source_key}' on S3 bucket '{source_bucket}' to object '{key}' on S3 bucket '{bucket}'"))]
    CopyObject {
        source_bucket: String,
        source_key: String,
        bucket: String,
        key: String,
        source: SdkError<CopyObjectError>,
    },

    #[snafu(display("Error starting multipart upload of object '{key}' on S3 bucket '{bucket}'"))]
    CreateMultipartUpload {
        bucket: String,
        key: String,
        source: SdkError<CreateMultipartUploadError>,
    },

    #[snafu(display(
        "S3 returned no upload ID for the multipart upload of object '{key}' on S3 bucket '{bucket}'"
    ))]
    MissingUploadId { bucket: String, key: String },

    #[snafu(display("Error copying bytes {first_byte}-{last_byte} into part {part_number} of object '{key}' on S3 bucket '{bucket}'"))]
    UploadPartCopy {
        bucket: String,
        key: String,
        part_number: u32,
        first_byte: u64,
        last_byte: u64,
        source: SdkError<UploadPartCopyError>,
    },

    #[snafu(display("Copying part {part_number} of '{target}' failed"))]
    PartCopy {
        target: String,
        part_number: u32,
        #[snafu(source(from(S3CopyError, Box::new)))]
        source: Box<S3CopyError>,
    },

    #[snafu(display("Multipart copy of '{target}' collected {actual} parts but expected {expected}; refusing to complete the upload"))]
    IncompleteParts {
        target: String,
        expected: u32,
        actual: usize,
    },

    #[snafu(display("Error completing multipart upload of object '{key}' on S3 bucket '{bucket}'"))]
    CompleteMultipartUpload {
        bucket: String,
        key: String,
        source: SdkError<CompleteMultipartUploadError>,
    },

    #[snafu(display(
        "Error aborting multipart upload '{upload_id}' of object '{key}' on S3 bucket '{bucket}'"
    ))]
    AbortMultipartUpload {
        bucket: String,
        key: String,
        upload_id: String,
        source: SdkError<AbortMultipartUploadError>,
    },

    #[snafu(display("The copy operation was aborted"))]
    Aborted,
}
