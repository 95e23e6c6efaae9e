//! Implementations of progress callbacks that render progress bars
use sscp::{CopyStrategy, ObjectReference, Result};
use std::{borrow::Cow, future::Future, time::Duration};

/// Display a spinner while some long-running but unmeasurable task is running, then hide the
/// spinner when it finishes
pub(crate) async fn with_spinner<S, F, T>(globals: &super::Globals, message: S, task: F) -> T
where
    S: Into<Cow<'static, str>>,
    F: Future<Output = T>,
{
    let spinner = if !hide_progress(globals) {
        indicatif::ProgressBar::new_spinner()
    } else {
        indicatif::ProgressBar::hidden()
    };

    spinner.set_style(spinner_style());
    spinner.enable_steady_tick(Duration::from_millis(120));
    spinner.set_message(message);

    let result = task.await;

    spinner.finish_and_clear();

    result
}

/// Run the specified copy job, with a progress bar for extra pretty-ness
pub(crate) async fn run_copy_job(
    globals: &super::Globals,
    job: sscp::CopyObjectJob,
    abort: impl Future<Output = ()>,
) -> Result<()> {
    let progress = CopyProgressReport::new(hide_progress(globals), &job);

    job.run(abort, progress).await
}

/// Progress should be hidden for either of verbose mode (because there will be a flurry of log
/// messages and the progress bar rendering will be all messed up), or quiet mode (because
/// progress bars are not quiet).
fn hide_progress(globals: &super::Globals) -> bool {
    globals.verbose || globals.quiet
}

fn spinner_style() -> indicatif::ProgressStyle {
    indicatif::ProgressStyle::with_template("{spinner:.blue} {msg}")
        .unwrap()
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "✔"])
}

/// Progress reporting for the copy operation.
///
/// Starts out as a spinner while the source object is inspected, and becomes a bar counting the
/// copied parts once it's known that the source is a multipart object.
struct CopyProgressReport {
    bar: indicatif::ProgressBar,
}

impl CopyProgressReport {
    fn new(hide_progress: bool, job: &sscp::CopyObjectJob) -> Self {
        let bar = if !hide_progress {
            indicatif::ProgressBar::new_spinner()
        } else {
            indicatif::ProgressBar::hidden()
        };

        bar.set_style(spinner_style());
        bar.enable_steady_tick(Duration::from_millis(120));
        bar.set_message(format!("Inspecting {}...", job.source()));

        Self { bar }
    }
}

impl sscp::CopyProgressCallback for CopyProgressReport {
    fn copy_started(
        &self,
        source: &ObjectReference,
        target: &ObjectReference,
        strategy: CopyStrategy,
    ) {
        match strategy {
            CopyStrategy::SingleShot => {
                self.bar.set_message(format!("Copying {source} to {target}..."));
            }
            CopyStrategy::Multipart { part_count } => {
                self.bar.set_length(part_count as u64);
                self.bar.set_position(0);
                self.bar.set_style(
                    indicatif::ProgressStyle::with_template(
                        "{spinner:.green} {msg} [{bar:30.cyan/blue}] {pos}/{len} parts ({elapsed})",
                    )
                    .unwrap()
                    .progress_chars("#>-"),
                );
                self.bar.set_message(format!("{source} -> {target}"));
            }
        }
    }

    fn part_copied(&self, _part_number: u32, parts_completed: usize, _total_parts: usize) {
        self.bar.set_position(parts_completed as u64);
    }

    fn copy_completed(&self) {
        self.bar.finish_with_message("Copy complete");
    }
}

impl Drop for CopyProgressReport {
    fn drop(&mut self) {
        // A failed or aborted copy never reports completion, so don't leave a stale bar behind
        if !self.bar.is_finished() {
            self.bar.abandon();
        }
    }
}
