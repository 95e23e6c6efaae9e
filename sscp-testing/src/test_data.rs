//! Create test objects in S3-compatible object storage and verify copies of them
use crate::Result;
use aws_sdk_s3::{
    primitives::ByteStream,
    types::{CompletedMultipartUpload, CompletedPart},
    Client,
};
use bytes::Bytes;
use color_eyre::eyre::eyre;
use futures::StreamExt;
use rand::prelude::*;
use sha2::Digest;
use url::Url;

/// Max concurrent S3 operations when dealing with test data
const MAX_CONCURRENCY: usize = 10;

/// S3 (and minio) reject multipart parts smaller than this, except for the last part
pub const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// An object written to object storage by one of the functions in this module, along with what
/// was written to it
#[derive(Clone, Debug)]
pub struct TestObjectWithData {
    pub bucket: String,
    pub key: String,
    pub url: Url,
    pub e_tag: String,
    pub part_sizes: Vec<usize>,
    pub data: Vec<u8>,
    pub hash: [u8; 32],
}

impl TestObjectWithData {
    fn new(
        bucket: &str,
        key: &str,
        e_tag: String,
        part_sizes: Vec<usize>,
        data: Vec<u8>,
    ) -> Self {
        Self {
            bucket: bucket.to_string(),
            key: key.to_string(),
            url: format!("s3://{}/{}", bucket, key).parse().unwrap(),
            e_tag,
            part_sizes,
            hash: sha256(&data),
            data,
        }
    }
}

pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = sha2::Sha256::new();
    hasher.update(data);
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&hasher.finalize());

    hash
}

fn random_data(size: usize) -> Vec<u8> {
    let mut data = vec![0u8; size];
    rand::thread_rng().fill(&mut data[..]);

    data
}

/// Upload a single object of `size` random bytes with one PutObject call, so it will not have a
/// multipart ETag
pub async fn make_test_object(
    client: &Client,
    bucket: &str,
    key: &str,
    size: usize,
) -> Result<TestObjectWithData> {
    let data = random_data(size);

    let response = client
        .put_object()
        .bucket(bucket)
        .key(key)
        .body(ByteStream::from(Bytes::from(data.clone())))
        .send()
        .await?;

    let e_tag = response
        .e_tag()
        .ok_or_else(|| eyre!("PutObject response has no ETag"))?
        .to_string();

    Ok(TestObjectWithData::new(bucket, key, e_tag, vec![size], data))
}

/// Upload an object of random data with the multipart API, using one part for each entry in
/// `part_sizes`.
///
/// Every part but the last must be at least [`MIN_PART_SIZE`] bytes.
pub async fn make_multipart_test_object(
    client: &Client,
    bucket: &str,
    key: &str,
    part_sizes: Vec<usize>,
) -> Result<TestObjectWithData> {
    let data = random_data(part_sizes.iter().sum());

    let upload_id = client
        .create_multipart_upload()
        .bucket(bucket)
        .key(key)
        .send()
        .await?
        .upload_id()
        .ok_or_else(|| eyre!("CreateMultipartUpload response has no upload ID"))?
        .to_string();

    let mut offset = 0;
    let mut chunks = Vec::with_capacity(part_sizes.len());
    for (index, size) in part_sizes.iter().enumerate() {
        chunks.push((
            index as i32 + 1,
            Bytes::copy_from_slice(&data[offset..offset + size]),
        ));
        offset += size;
    }

    let upload_id_ref = &upload_id;
    let part_futs = chunks.into_iter().map(|(part_number, chunk)| async move {
        let response = client
            .upload_part()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id_ref)
            .part_number(part_number)
            .body(ByteStream::from(chunk))
            .send()
            .await?;

        let e_tag = response
            .e_tag()
            .ok_or_else(|| eyre!("UploadPart response has no ETag"))?
            .to_string();

        Result::<_>::Ok(
            CompletedPart::builder()
                .e_tag(e_tag)
                .part_number(part_number)
                .build(),
        )
    });

    let mut parts_stream = futures::stream::iter(part_futs).buffer_unordered(MAX_CONCURRENCY);
    let mut completed_parts = Vec::new();
    while let Some(result) = parts_stream.next().await {
        completed_parts.push(result?);
    }
    completed_parts.sort_unstable_by_key(|part| part.part_number());

    let response = client
        .complete_multipart_upload()
        .bucket(bucket)
        .key(key)
        .upload_id(&upload_id)
        .multipart_upload(
            CompletedMultipartUpload::builder()
                .set_parts(Some(completed_parts))
                .build(),
        )
        .send()
        .await?;

    let e_tag = response
        .e_tag()
        .ok_or_else(|| eyre!("CompleteMultipartUpload response has no ETag"))?
        .to_string();

    Ok(TestObjectWithData::new(bucket, key, e_tag, part_sizes, data))
}

/// Read the entire contents of an object
pub async fn read_object(client: &Client, bucket: &str, key: &str) -> Result<Vec<u8>> {
    let response = client.get_object().bucket(bucket).key(key).send().await?;

    let bytes = response.body.collect().await?;

    Ok(bytes.into_bytes().to_vec())
}

/// Verify that the object `bucket`/`key` holds exactly the same data as `expected`, and that its
/// part layout (as revealed by HEAD requests for each part) matches too.
pub async fn validate_copy(
    client: &Client,
    bucket: &str,
    key: &str,
    expected: &TestObjectWithData,
) -> Result<()> {
    let data = read_object(client, bucket, key).await?;

    if data.len() != expected.data.len() || sha256(&data) != expected.hash {
        return Err(eyre!(
            "Object {bucket}/{key} ({} bytes) doesn't match the contents of {} ({} bytes)",
            data.len(),
            expected.url,
            expected.data.len()
        ));
    }

    if expected.part_sizes.len() > 1 {
        for (index, expected_size) in expected.part_sizes.iter().enumerate() {
            let part_number = index as i32 + 1;

            let response = client
                .head_object()
                .bucket(bucket)
                .key(key)
                .part_number(part_number)
                .send()
                .await?;

            let actual_size = response.content_length().unwrap_or_default();
            if actual_size != *expected_size as i64 {
                return Err(eyre!(
                    "Part {part_number} of {bucket}/{key} is {actual_size} bytes, expected {expected_size}"
                ));
            }
        }
    }

    Ok(())
}
