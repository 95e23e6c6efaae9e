//! Implementation of the operation which copies an object from one location in object storage to
//! another, entirely server side.
use crate::objstore::{PartCompletionHandle, S3StorageClient, StorageClient};
use crate::{Config, ObjectReference, Result, S3CopyError};
use futures::StreamExt;
use snafu::prelude::*;
use std::future::Future;
use std::pin::Pin;
use tracing::{debug, error, info, instrument, Instrument};
use url::Url;

/// How an object gets copied.
///
/// This is decided by how the source object was originally uploaded, which S3 reveals in the
/// object's ETag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CopyStrategy {
    /// The source was uploaded in one request, so it's copied with a single CopyObject call.
    SingleShot,

    /// The source was uploaded with multipart, so each of its parts is copied in parallel into a
    /// new multipart upload with the same part boundaries.
    Multipart { part_count: u32 },
}

/// A trait which callers can implement to get progress updates as a copy is running.
#[allow(unused_variables)]
pub trait CopyProgressCallback: Sync + Send {
    /// The source object was inspected and the copy is about to begin
    fn copy_started(
        &self,
        source: &ObjectReference,
        target: &ObjectReference,
        strategy: CopyStrategy,
    ) {
    }

    /// One part of a multipart copy finished.
    ///
    /// Parts finish in no particular order, so `part_number` is not related to `parts_completed`.
    fn part_copied(&self, part_number: u32, parts_completed: usize, total_parts: usize) {}

    /// The copy finished and the object is now visible at the target
    fn copy_completed(&self) {}
}

/// Copy the object at `source` to `target` using S3, with the AWS settings in `config`.
///
/// Both are `s3://bucket/key` URLs.  This is the simplest way to copy an object, but offers no way
/// to report progress or abort; for that use [`CopyObjectJob`].
pub async fn copy_object(config: Config, source: &str, target: &str) -> Result<()> {
    let source = ObjectReference::parse(source)?;
    let target = ObjectReference::parse(target)?;

    let client = S3StorageClient::new(&config).await;

    CopyObjectJob::new(config, Box::new(client), source, target)
        .run_without_progress(futures::future::pending())
        .await
}

/// A job which will copy one object to another location.
#[derive(Debug)]
pub struct CopyObjectJob {
    config: Config,
    client: Box<dyn StorageClient>,
    source: ObjectReference,
    target: ObjectReference,
}

impl CopyObjectJob {
    /// Prepare (but don't start) a copy of `source` to `target`, which will be performed with
    /// `client`.
    pub fn new(
        config: Config,
        client: Box<dyn StorageClient>,
        source: ObjectReference,
        target: ObjectReference,
    ) -> Self {
        Self {
            config,
            client,
            source,
            target,
        }
    }

    /// Same as [`Self::new`], but with the source and target given as URLs
    pub fn from_urls(
        config: Config,
        client: Box<dyn StorageClient>,
        source: &Url,
        target: &Url,
    ) -> Result<Self> {
        let source = ObjectReference::from_url(source)?;
        let target = ObjectReference::from_url(target)?;

        Ok(Self::new(config, client, source, target))
    }

    /// The object being copied
    pub fn source(&self) -> &ObjectReference {
        &self.source
    }

    /// Where the copy will be written
    pub fn target(&self) -> &ObjectReference {
        &self.target
    }

    /// Alternative to [`Self::run`] which doesn't require a [`CopyProgressCallback`]
    /// implementation, for callers that do not care about progress information.
    pub async fn run_without_progress(self, abort: impl Future<Output = ()>) -> Result<()> {
        // A dummy impl of CopyProgressCallback that doesn't do anything with any of the progress
        // updates
        struct NoProgress {}
        impl CopyProgressCallback for NoProgress {}

        self.run(abort, NoProgress {}).await
    }

    /// Run the job, returning only when the object has been copied (or the copy failed)
    ///
    /// If the `abort` future is completed, it's a signal that the job should be aborted.  In-flight
    /// requests are abandoned, any multipart upload already started is aborted, and this method
    /// returns an abort error.
    #[instrument(skip(self, abort, progress), fields(source = %self.source, target = %self.target))]
    pub async fn run<Abort, Progress>(self, abort: Abort, progress: Progress) -> Result<()>
    where
        Abort: Future<Output = ()>,
        Progress: CopyProgressCallback + 'static,
    {
        tokio::pin!(abort);

        debug!("Inspecting source object");

        let metadata = tokio::select! {
            result = self.client.head_object(&self.source, None) => result?,
            () = abort.as_mut() => return crate::error::AbortedSnafu.fail(),
        };

        let strategy = match crate::extract_part_count(&metadata.e_tag) {
            None => {
                // A multipart suffix whose digits don't even fit in a u32
                ensure!(
                    !crate::metadata::has_multipart_suffix(&metadata.e_tag),
                    crate::error::InvalidPartCountSnafu {
                        e_tag: metadata.e_tag.clone()
                    }
                );

                CopyStrategy::SingleShot
            }
            Some(part_count) => {
                ensure!(
                    (1..=crate::metadata::MAX_PART_COUNT).contains(&part_count),
                    crate::error::InvalidPartCountSnafu {
                        e_tag: metadata.e_tag.clone()
                    }
                );

                CopyStrategy::Multipart { part_count }
            }
        };

        info!(e_tag = %metadata.e_tag, size = ?metadata.content_length, ?strategy, "Copying object");

        progress.copy_started(&self.source, &self.target, strategy);

        match strategy {
            CopyStrategy::SingleShot => {
                tokio::select! {
                    result = self.client.copy_object(&self.source, &self.target) => result?,
                    () = abort.as_mut() => return crate::error::AbortedSnafu.fail(),
                }
            }
            CopyStrategy::Multipart { part_count } => {
                self.copy_multipart(part_count, abort.as_mut(), &progress)
                    .await?
            }
        }

        debug!("Copy completed");

        progress.copy_completed();

        Ok(())
    }

    /// Copy a multipart source object part by part into a new multipart upload.
    ///
    /// If anything goes wrong once the upload has been created, the upload is aborted before the
    /// error is reported, so the parts already copied don't linger on the server.
    async fn copy_multipart<Abort, Progress>(
        &self,
        part_count: u32,
        mut abort: Pin<&mut Abort>,
        progress: &Progress,
    ) -> Result<()>
    where
        Abort: Future<Output = ()>,
        Progress: CopyProgressCallback,
    {
        let upload_id = tokio::select! {
            result = self.client.create_multipart_upload(&self.target) => result?,
            () = abort.as_mut() => return crate::error::AbortedSnafu.fail(),
        };

        debug!(%upload_id, part_count, "Started multipart upload for copy");

        let result = self
            .copy_parts_and_complete(&upload_id, part_count, abort, progress)
            .await;

        if let Err(e) = &result {
            // Before reporting this error, clean up the remains of the multipart upload
            error!(?e, target = %self.target, %upload_id,
                "Multipart copy failed; aborting multipart upload on server side");

            if let Err(e) = self
                .client
                .abort_multipart_upload(&self.target, &upload_id)
                .await
            {
                error!(?e, target = %self.target, %upload_id,
                    "Error aborting multipart upload.  This will remain on the server forever unless there's a lifecycle policy configured");
            }
        }

        result
    }

    async fn copy_parts_and_complete<Abort, Progress>(
        &self,
        upload_id: &str,
        part_count: u32,
        mut abort: Pin<&mut Abort>,
        progress: &Progress,
    ) -> Result<()>
    where
        Abort: Future<Output = ()>,
        Progress: CopyProgressCallback,
    {
        let total_parts = part_count as usize;
        let client = &*self.client;
        let source = &self.source;
        let target = &self.target;

        let part_futs = (1..=part_count).map(move |part_number| {
            let span = tracing::debug_span!("copy part", part_number);

            async move {
                crate::copy_part(client, source, target, upload_id, part_number)
                    .await
                    .context(crate::error::PartCopySnafu {
                        target: target.to_string(),
                        part_number,
                    })
            }
            .instrument(span)
        });

        // `buffer_unordered` polls at most this many part copies at a time, which is what bounds
        // the number of concurrent requests.  Returning early on the first error drops the stream,
        // and with it every part copy still in flight.
        let mut parts_stream = futures::stream::iter(part_futs)
            .buffer_unordered(self.config.max_concurrent_requests.max(1));

        let collect_parts = async {
            let mut completed_parts = Vec::with_capacity(total_parts);

            while let Some(result) = parts_stream.next().await {
                let part: PartCompletionHandle = result?;
                let part_number = part.part_number;

                completed_parts.push(part);

                info!(part_number, "Copied part {}/{}", completed_parts.len(), total_parts);

                progress.part_copied(part_number, completed_parts.len(), total_parts);
            }

            Ok::<_, S3CopyError>(completed_parts)
        };

        let mut completed_parts = tokio::select! {
            result = collect_parts => result?,
            () = abort.as_mut() => return crate::error::AbortedSnafu.fail(),
        };

        // S3 requires the parts to be listed in order of part number when completing the upload,
        // but they finish in whatever order the requests happened to complete
        completed_parts.sort_unstable_by_key(|part| part.part_number);

        ensure!(
            completed_parts
                .iter()
                .map(|part| part.part_number)
                .eq(1..=part_count),
            crate::error::IncompletePartsSnafu {
                target: self.target.to_string(),
                expected: part_count,
                actual: completed_parts.len(),
            }
        );

        debug!(
            total_parts,
            "All parts copied; completing multipart upload"
        );

        self.client
            .complete_multipart_upload(&self.target, upload_id, completed_parts)
            .await
    }
}
