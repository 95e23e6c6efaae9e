use url::Url;

/// The configuration settings that control how object copies talk to S3 and how aggressively they
/// run in parallel.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
#[cfg_attr(feature = "clap", derive(clap::Parser))]
pub struct Config {
    /// Use a custom S3 endpoint instead of AWS.
    ///
    /// Use this to operate on a non-Amazon S3-compatible service.  Path-style addressing is used
    /// when a custom endpoint is set.
    #[cfg_attr(feature = "clap", clap(long, global = true, value_name = "URL"))]
    pub s3_endpoint: Option<Url>,

    /// The AWS region to use.
    ///
    /// If not set, the region is taken from the usual AWS environment variables and config files,
    /// falling back to `us-east-1`.
    #[cfg_attr(feature = "clap", clap(long, global = true, value_name = "REGION"))]
    pub aws_region: Option<String>,

    /// The AWS access key ID to authenticate with.
    ///
    /// Only used together with `aws_secret_access_key`.  When either is missing, credentials are
    /// resolved by the AWS SDK default credentials chain.
    #[cfg_attr(feature = "clap", clap(long, global = true, requires = "aws_secret_access_key"))]
    pub aws_access_key_id: Option<String>,

    /// The AWS secret access key to authenticate with.
    #[cfg_attr(feature = "clap", clap(long, global = true, requires = "aws_access_key_id"))]
    pub aws_secret_access_key: Option<String>,

    /// The maximum number of concurrent part copy requests when copying a multipart object.
    ///
    /// Each part costs two requests (a HEAD and an UploadPartCopy) but they run one after the
    /// other, so this is also the limit on in-flight requests.  Setting this too high risks being
    /// throttled by S3's per-prefix request rate limits.
    #[cfg_attr(feature = "clap", clap(long, default_value = "50", global = true))]
    pub max_concurrent_requests: usize,
}

impl Default for Config {
    fn default() -> Self {
        // XXX: This is duplicated here and in the `clap` attributes, unfortunately I can't find a
        // better way unless we unconditionally take a clap dependency in the lib crate
        Self {
            s3_endpoint: None,
            aws_region: None,
            aws_access_key_id: None,
            aws_secret_access_key: None,
            max_concurrent_requests: 50,
        }
    }
}
