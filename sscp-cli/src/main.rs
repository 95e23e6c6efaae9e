use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod progress;

/// Copy an object within S3 (or between buckets), entirely server side.
///
/// Objects which were uploaded with multipart are copied part by part, in parallel, so the copy
/// has exactly the same parts and the same multipart ETag as the source.
#[derive(Parser, Debug)]
#[clap(
    author,
    version,
    long_version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("VERGEN_CARGO_TARGET_TRIPLE"), ")"),
    about,
    long_about = None
)]
struct Args {
    /// The object to copy, as an `s3://bucket/key` URL.
    ///
    /// Everything after the bucket is used verbatim as the object key, without unescaping.
    #[clap(value_parser = sscp::ObjectReference::parse, value_name = "SOURCE")]
    source: sscp::ObjectReference,

    /// Where to copy the object to, as an `s3://bucket/key` URL.
    ///
    /// If an object already exists here it's overwritten.
    #[clap(value_parser = sscp::ObjectReference::parse, value_name = "TARGET")]
    target: sscp::ObjectReference,

    #[clap(flatten)]
    globals: Globals,
}

/// Arguments that control how the copy is performed and reported
#[derive(Parser, Debug)]
struct Globals {
    /// Enable verbose log output
    #[clap(short = 'v', long, conflicts_with = "quiet", global = true)]
    verbose: bool,

    /// Be quiet, suppress almost all output (except errors)
    #[clap(short = 'q', long, conflicts_with = "verbose", global = true)]
    quiet: bool,

    #[clap(flatten)]
    config: sscp::Config,
}

/// Initialize logging to stderr.
///
/// `RUST_LOG` is honored unless `--verbose` or `--quiet` say otherwise.
fn init_tracing(globals: &Globals) {
    let filter = if globals.quiet {
        EnvFilter::new("error")
    } else if globals.verbose {
        EnvFilter::new("h2=warn,hyper=info,rustls=info,aws=info,debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(globals.verbose)
        .init();
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    init_tracing(&args.globals);

    let client = progress::with_spinner(
        &args.globals,
        "Loading AWS configuration...",
        sscp::S3StorageClient::new(&args.globals.config),
    )
    .await;

    let job = sscp::CopyObjectJob::new(
        args.globals.config.clone(),
        Box::new(client),
        args.source,
        args.target,
    );

    // Ctrl-C aborts the copy, which cleans up any partially-copied multipart upload before exiting
    let abort = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(?e, "Unable to listen for Ctrl-C; the copy can't be interrupted");
            futures::future::pending::<()>().await;
        }

        info!("Ctrl-C received; aborting copy");
    };

    progress::run_copy_job(&args.globals, job, abort).await?;

    Ok(())
}
