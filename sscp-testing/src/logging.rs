//! Logging in tests is important for troubleshooting, but works very differently then in
//! production.
use crate::Result;
use std::{
    cell::RefCell,
    future::Future,
    io::Write,
    panic::AssertUnwindSafe,
    sync::{Arc, Mutex},
    time::Duration,
};
use tracing_subscriber::fmt::MakeWriter;

/// Default filter when `RUST_LOG` isn't set.  The AWS SDK and its HTTP stack are very chatty at
/// debug level.
const DEFAULT_FILTER: &str = "h2=warn,hyper=info,rustls=info,aws=info,debug";

/// An implementation of `MakeWriter` that captures all log events for a single test
#[derive(Clone, Default)]
struct TestWriter {
    log_events: Arc<Mutex<Vec<u8>>>,
}

impl TestWriter {
    /// The log output captured so far.  Non-UTF8 output is replaced rather than panicking.
    fn contents(&self) -> String {
        let guard = self.log_events.lock().unwrap();

        String::from_utf8_lossy(&guard).into_owned()
    }
}

impl<'a> Write for &'a TestWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut guard = self.log_events.lock().unwrap();

        // Vec already implements Write
        guard.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for TestWriter {
    type Writer = &'a Self;

    fn make_writer(&'a self) -> Self::Writer {
        self
    }
}

/// Read-only view of the log events captured during a test, for tests that need to assert that
/// something was logged.
#[derive(Clone)]
pub struct CapturedLogs {
    writer: TestWriter,
}

impl CapturedLogs {
    /// Everything logged by the test so far
    pub fn text(&self) -> String {
        self.writer.contents()
    }

    /// True if any log event so far contains `needle`
    pub fn contains(&self, needle: &str) -> bool {
        self.text().contains(needle)
    }
}

/// Run a test with logging enabled.
///
/// This takes the place of `tokio::test` because it needs to initialize the tokio runtime in some
/// more customized way to ensure logging is done correctly.
///
/// It initializes a single `tracing` Dispatch object for this test only, as well as a dedicated
/// tokio runtime.  Log events go to a buffer which is dumped to the console at the end of the test
/// or in the event of a panic.  Every worker thread of the test's runtime uses the same dispatch,
/// so events from spawned tasks are captured too, but only those for this specific test.
pub fn test_with_logging(test: impl Future<Output = Result<()>>) -> Result<()> {
    test_with_logs(|_logs| test)
}

/// Same as [`test_with_logging`], but the test is given access to the log events captured while it
/// runs.
pub fn test_with_logs<F, Fut>(test: F) -> Result<()>
where
    F: FnOnce(CapturedLogs) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let writer = TestWriter::default();
    let dispatch = Arc::new(make_dispatch(writer.clone()));
    let test = test(CapturedLogs {
        writer: writer.clone(),
    });

    tracing::dispatcher::with_default(&dispatch, || {
        let runtime = build_runtime(dispatch.clone())?;

        // It's not realistic to require all test futures to be explicitly unwind safe, so assume
        // they're safe
        let result = std::panic::catch_unwind(AssertUnwindSafe(move || {
            let result = runtime.block_on(test);
            runtime.shutdown_timeout(Duration::from_secs(10));

            result
        }));

        // Test has run, maybe succeed maybe failed maybe panicked
        println!("Log events from this test: \n{}", writer.contents());

        match result {
            Ok(result) => result,
            Err(err) => {
                // Re-throw the panic now that the log output is written
                std::panic::resume_unwind(err)
            }
        }
    })
}

fn make_dispatch(writer: TestWriter) -> tracing::Dispatch {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{fmt, EnvFilter};

    let format = fmt::layer()
        .with_ansi(false)
        .with_level(true)
        .with_target(true) // filters operate on targets so they're important to know
        .with_thread_ids(true) // helpful when part copies run on several worker threads
        .with_thread_names(false)
        .with_writer(writer);

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(DEFAULT_FILTER))
        .unwrap();

    tracing::Dispatch::new(tracing_subscriber::registry().with(filter).with(format))
}

/// Build a multi-threaded runtime whose worker threads all use `dispatch` as their default
fn build_runtime(dispatch: Arc<tracing::Dispatch>) -> Result<tokio::runtime::Runtime> {
    std::thread_local! {
        static THREAD_DISPATCHER_GUARD: RefCell<Option<tracing::subscriber::DefaultGuard>> = RefCell::new(None);
    }

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();

    builder.on_thread_start(move || {
        let dispatch = dispatch.clone();

        THREAD_DISPATCHER_GUARD.with(|cell| {
            cell.replace(Some(tracing::dispatcher::set_default(&dispatch)));
        })
    });

    builder.on_thread_stop(|| {
        // Drop the dispatcher guard so it's no longer the thread-local default
        THREAD_DISPATCHER_GUARD.with(|cell| cell.replace(None));
    });

    Ok(builder.build()?)
}
