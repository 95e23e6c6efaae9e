//! Tests of the copy orchestration logic against an in-memory fake of the storage client, so the
//! ordering, failure, abort and concurrency behavior can be checked without a real object store.
use crate::Result;
use assert_matches::assert_matches;
use fake::{Behavior, Call, FakeStorageClient};
use more_asserts::*;
use sscp::{Config, CopyObjectJob, CopyProgressCallback, CopyStrategy, ObjectReference, S3CopyError};
use sscp_testing::logging::{test_with_logging, test_with_logs};
use std::sync::{Arc, Mutex};
use std::time::Duration;


const MIB: u64 = 1024 * 1024;

fn source() -> ObjectReference {
    ObjectReference::parse("s3://source-bucket/data/source.bin").unwrap()
}

fn target() -> ObjectReference {
    ObjectReference::parse("s3://target-bucket/copies/target.bin").unwrap()
}

fn config_with_concurrency(max_concurrent_requests: usize) -> Config {
    Config {
        max_concurrent_requests,
        ..Config::default()
    }
}

/// A fake with a multipart source object of `part_count` parts of 8 MiB, except the last which is
/// smaller, the way S3 clients typically lay them out
fn fake_with_multipart_source(behavior: Behavior, part_count: usize) -> FakeStorageClient {
    let client = FakeStorageClient::new(behavior);

    let mut part_sizes = vec![8 * MIB; part_count];
    if let Some(last) = part_sizes.last_mut() {
        *last = 3 * MIB + 17;
    }
    client.add_multipart_object(&source(), part_sizes);

    client
}

fn job(config: Config, client: &FakeStorageClient) -> CopyObjectJob {
    CopyObjectJob::new(config, Box::new(client.clone()), source(), target())
}

fn completed_parts(client: &FakeStorageClient) -> Vec<Vec<u32>> {
    client
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            Call::CompleteMultipartUpload { parts, .. } => {
                Some(parts.into_iter().map(|part| part.part_number).collect())
            }
            _ => None,
        })
        .collect()
}

fn is_multipart_call(call: &Call) -> bool {
    matches!(
        call,
        Call::CreateMultipartUpload { .. }
            | Call::UploadPartCopy { .. }
            | Call::CompleteMultipartUpload { .. }
            | Call::AbortMultipartUpload { .. }
    )
}

/// Progress callback that records every update so tests can check them
#[derive(Clone, Default)]
struct RecordingProgress {
    started: Arc<Mutex<Vec<CopyStrategy>>>,
    parts: Arc<Mutex<Vec<(u32, usize, usize)>>>,
    completed: Arc<Mutex<usize>>,
}

impl CopyProgressCallback for RecordingProgress {
    fn copy_started(&self, _source: &ObjectReference, _target: &ObjectReference, strategy: CopyStrategy) {
        self.started.lock().unwrap().push(strategy);
    }

    fn part_copied(&self, part_number: u32, parts_completed: usize, total_parts: usize) {
        self.parts
            .lock()
            .unwrap()
            .push((part_number, parts_completed, total_parts));
    }

    fn copy_completed(&self) {
        *self.completed.lock().unwrap() += 1;
    }
}

#[test]
fn single_part_object_is_copied_with_one_request() -> Result<()> {
    test_with_logging(async move {
        let client = FakeStorageClient::new(Behavior::default());
        client.add_object(&source(), 42 * MIB);

        job(Config::default(), &client)
            .run_without_progress(futures::future::pending())
            .await?;

        assert_eq!(
            vec![
                Call::HeadObject {
                    object: source(),
                    part_number: None
                },
                Call::CopyObject {
                    source: source(),
                    target: target()
                },
            ],
            client.calls()
        );
        assert_eq!(0, client.count_calls(is_multipart_call));
        assert_eq!(client.object(&source()), client.object(&target()));

        Ok(())
    })
}

#[test]
fn hyphen_in_single_part_etag_is_not_multipart() -> Result<()> {
    test_with_logging(async move {
        let client = FakeStorageClient::new(Behavior::default());
        client.add_object_with_e_tag(&source(), "\"abc-12-def\"", 1024);

        job(Config::default(), &client)
            .run_without_progress(futures::future::pending())
            .await?;

        assert_eq!(
            1,
            client.count_calls(|call| matches!(call, Call::CopyObject { .. }))
        );
        assert_eq!(0, client.count_calls(is_multipart_call));

        Ok(())
    })
}

#[test]
fn multipart_object_parts_are_completed_in_order() -> Result<()> {
    test_with_logs(|logs| async move {
        // Random delays make the parts finish in a different order every time, so run it a few
        // times to give out-of-order completion plenty of chances to show up
        for _ in 0..10 {
            let client = fake_with_multipart_source(
                Behavior {
                    max_delay: Duration::from_millis(20),
                    ..Default::default()
                },
                5,
            );

            job(Config::default(), &client)
                .run_without_progress(futures::future::pending())
                .await?;

            assert_eq!(vec![vec![1, 2, 3, 4, 5]], completed_parts(&client));

            // Each part was copied exactly once, with the byte range of the matching source part
            let mut copied = client
                .calls()
                .into_iter()
                .filter_map(|call| match call {
                    Call::UploadPartCopy {
                        part_number,
                        byte_range,
                        ..
                    } => Some((part_number, byte_range)),
                    _ => None,
                })
                .collect::<Vec<_>>();
            copied.sort_unstable_by_key(|(part_number, _)| *part_number);
            assert_eq!(
                vec![
                    (1, 0..=8 * MIB - 1),
                    (2, 8 * MIB..=16 * MIB - 1),
                    (3, 16 * MIB..=24 * MIB - 1),
                    (4, 24 * MIB..=32 * MIB - 1),
                    (5, 32 * MIB..=35 * MIB + 16),
                ],
                copied
            );

            assert_eq!(
                0,
                client.count_calls(|call| matches!(call, Call::CopyObject { .. }
                    | Call::AbortMultipartUpload { .. }))
            );
            assert!(client.object(&target()).is_some());
        }

        assert!(logs.contains("Copied part 5/5"));

        Ok(())
    })
}

#[test]
fn completion_manifest_carries_each_parts_etag() -> Result<()> {
    test_with_logging(async move {
        let client = fake_with_multipart_source(
            Behavior {
                max_delay: Duration::from_millis(5),
                ..Default::default()
            },
            3,
        );

        job(Config::default(), &client)
            .run_without_progress(futures::future::pending())
            .await?;

        let manifest = client
            .calls()
            .into_iter()
            .find_map(|call| match call {
                Call::CompleteMultipartUpload { parts, .. } => Some(parts),
                _ => None,
            })
            .expect("upload was completed");

        for (index, part) in manifest.iter().enumerate() {
            assert_eq!(index as u32 + 1, part.part_number);
            assert_eq!(format!("\"part-{}-etag\"", part.part_number), part.e_tag);
        }

        Ok(())
    })
}

#[test]
fn failed_part_fails_the_copy_without_completing() -> Result<()> {
    test_with_logging(async move {
        let client = fake_with_multipart_source(
            Behavior {
                max_delay: Duration::from_millis(5),
                fail_upload_part: Some(7),
                ..Default::default()
            },
            20,
        );

        let result = job(config_with_concurrency(4), &client)
            .run_without_progress(futures::future::pending())
            .await;

        assert_matches!(
            result,
            Err(S3CopyError::PartCopy { part_number: 7, source, .. })
                if matches!(*source, S3CopyError::UploadPartCopy { part_number: 7, .. })
        );

        assert!(completed_parts(&client).is_empty());
        assert_eq!(
            1,
            client.count_calls(|call| matches!(call, Call::AbortMultipartUpload { .. }))
        );
        assert!(client.object(&target()).is_none());

        Ok(())
    })
}

#[test]
fn malformed_content_range_fails_the_copy() -> Result<()> {
    test_with_logging(async move {
        let client = fake_with_multipart_source(
            Behavior {
                malformed_range_part: Some(2),
                ..Default::default()
            },
            4,
        );

        let result = job(Config::default(), &client)
            .run_without_progress(futures::future::pending())
            .await;

        assert_matches!(
            result,
            Err(S3CopyError::PartCopy { part_number: 2, source, .. })
                if matches!(*source, S3CopyError::MalformedContentRange { .. })
        );

        // No range copy is ever attempted for the part with the unparseable range
        assert_eq!(
            0,
            client.count_calls(|call| matches!(call, Call::UploadPartCopy { part_number: 2, .. }))
        );
        assert!(completed_parts(&client).is_empty());

        Ok(())
    })
}

#[test]
fn concurrency_never_exceeds_configured_limit() -> Result<()> {
    test_with_logging(async move {
        let client = fake_with_multipart_source(
            Behavior {
                max_delay: Duration::from_millis(3),
                ..Default::default()
            },
            200,
        );

        job(config_with_concurrency(8), &client)
            .run_without_progress(futures::future::pending())
            .await?;

        assert_le!(client.max_in_flight(), 8);
        // ...but the parts really were copied in parallel
        assert_gt!(client.max_in_flight(), 1);

        assert_eq!(
            vec![(1..=200).collect::<Vec<u32>>()],
            completed_parts(&client)
        );

        Ok(())
    })
}

#[test]
fn default_concurrency_limit_is_fifty() -> Result<()> {
    test_with_logging(async move {
        let client = fake_with_multipart_source(
            Behavior {
                max_delay: Duration::from_millis(3),
                ..Default::default()
            },
            120,
        );

        job(Config::default(), &client)
            .run_without_progress(futures::future::pending())
            .await?;

        assert_le!(client.max_in_flight(), 50);
        assert_eq!(1, completed_parts(&client).len());

        Ok(())
    })
}

#[test]
fn abort_stops_copy_and_aborts_upload() -> Result<()> {
    test_with_logging(async move {
        let client = fake_with_multipart_source(
            Behavior {
                hang_parts: true,
                ..Default::default()
            },
            10,
        );

        let result = job(Config::default(), &client)
            .run_without_progress(tokio::time::sleep(Duration::from_millis(100)))
            .await;

        assert_matches!(result, Err(S3CopyError::Aborted));
        assert!(completed_parts(&client).is_empty());
        assert_eq!(
            1,
            client.count_calls(|call| matches!(call, Call::AbortMultipartUpload { .. }))
        );

        // The hung part copies were dropped along with the copy
        assert_gt!(client.max_in_flight(), 0);
        assert_eq!(0, client.in_flight());

        Ok(())
    })
}

#[test]
fn zero_part_etag_is_rejected() -> Result<()> {
    test_with_logging(async move {
        let client = FakeStorageClient::new(Behavior::default());
        client.add_object_with_e_tag(&source(), "\"abc123-0\"", 1024);

        let result = job(Config::default(), &client)
            .run_without_progress(futures::future::pending())
            .await;

        assert_matches!(result, Err(S3CopyError::InvalidPartCount { .. }));
        assert_eq!(0, client.count_calls(is_multipart_call));
        assert_eq!(
            0,
            client.count_calls(|call| matches!(call, Call::CopyObject { .. }))
        );

        Ok(())
    })
}

#[test]
fn part_count_beyond_s3_limit_is_rejected() -> Result<()> {
    test_with_logging(async move {
        for e_tag in [
            "\"abc-10001\"",
            "\"abc-4294967295\"",
            // Doesn't even fit in a u32, but is still a multipart ETag
            "\"abc-99999999999999999999\"",
        ] {
            let client = FakeStorageClient::new(Behavior::default());
            client.add_object_with_e_tag(&source(), e_tag, 1024);

            let result = job(Config::default(), &client)
                .run_without_progress(futures::future::pending())
                .await;

            assert_matches!(result, Err(S3CopyError::InvalidPartCount { .. }), "{e_tag}");
            assert_eq!(0, client.count_calls(is_multipart_call), "{e_tag}");
            assert_eq!(
                0,
                client.count_calls(|call| matches!(call, Call::CopyObject { .. })),
                "{e_tag}"
            );
        }

        Ok(())
    })
}

#[test]
fn failed_completion_aborts_upload() -> Result<()> {
    test_with_logging(async move {
        let client = fake_with_multipart_source(
            Behavior {
                fail_complete: true,
                ..Default::default()
            },
            3,
        );

        let result = job(Config::default(), &client)
            .run_without_progress(futures::future::pending())
            .await;

        assert_matches!(result, Err(S3CopyError::CompleteMultipartUpload { .. }));
        assert_eq!(1, completed_parts(&client).len());
        assert_eq!(
            1,
            client.count_calls(|call| matches!(call, Call::AbortMultipartUpload { .. }))
        );
        assert!(client.object(&target()).is_none());

        Ok(())
    })
}

#[test]
fn failed_abort_is_logged_and_original_error_kept() -> Result<()> {
    test_with_logs(|logs| async move {
        let client = fake_with_multipart_source(
            Behavior {
                fail_complete: true,
                fail_abort: true,
                ..Default::default()
            },
            3,
        );

        let result = job(Config::default(), &client)
            .run_without_progress(futures::future::pending())
            .await;

        assert_matches!(result, Err(S3CopyError::CompleteMultipartUpload { .. }));
        assert_eq!(
            1,
            client.count_calls(|call| matches!(call, Call::AbortMultipartUpload { .. }))
        );
        assert!(logs.contains("ERROR"));
        assert!(logs.contains("Error aborting multipart upload"));

        Ok(())
    })
}

#[test]
fn progress_is_reported_for_every_part() -> Result<()> {
    test_with_logging(async move {
        let client = fake_with_multipart_source(
            Behavior {
                max_delay: Duration::from_millis(5),
                ..Default::default()
            },
            12,
        );
        let progress = RecordingProgress::default();

        job(config_with_concurrency(5), &client)
            .run(futures::future::pending(), progress.clone())
            .await?;

        assert_eq!(
            vec![CopyStrategy::Multipart { part_count: 12 }],
            *progress.started.lock().unwrap()
        );

        let parts = progress.parts.lock().unwrap().clone();
        assert_eq!(12, parts.len());

        // The completed count climbs by one with every update, whatever part just finished
        for (index, (_, parts_completed, total_parts)) in parts.iter().enumerate() {
            assert_eq!(index + 1, *parts_completed);
            assert_eq!(12, *total_parts);
        }

        let mut part_numbers = parts
            .iter()
            .map(|(part_number, _, _)| *part_number)
            .collect::<Vec<_>>();
        part_numbers.sort_unstable();
        assert_eq!((1..=12).collect::<Vec<u32>>(), part_numbers);

        assert_eq!(1, *progress.completed.lock().unwrap());

        Ok(())
    })
}

#[test]
fn missing_source_fails_before_anything_is_written() -> Result<()> {
    test_with_logging(async move {
        let client = FakeStorageClient::new(Behavior::default());

        let result = job(Config::default(), &client)
            .run_without_progress(futures::future::pending())
            .await;

        assert_matches!(result, Err(S3CopyError::HeadObject { .. }));
        assert_eq!(1, client.calls().len());

        Ok(())
    })
}

#[test]
fn invalid_urls_are_rejected_without_any_requests() -> Result<()> {
    test_with_logging(async move {
        let result = sscp::copy_object(
            Config::default(),
            "https://source-bucket/key",
            "s3://target-bucket/key",
        )
        .await;
        assert_matches!(result, Err(S3CopyError::UnsupportedObjectStorage { .. }));

        let result = sscp::copy_object(
            Config::default(),
            "s3://source-bucket/key",
            "gs://target-bucket/key",
        )
        .await;
        assert_matches!(result, Err(S3CopyError::UnsupportedObjectStorage { .. }));

        Ok(())
    })
}
