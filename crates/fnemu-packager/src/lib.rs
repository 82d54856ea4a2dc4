//! Packages a function's source directory as a zip and stages it in a local
//! directory or a storage bucket.

pub mod archive;
pub mod error;
pub mod sink;

use std::path::{Path, PathBuf};

use fnemu_core::EmulatorConfig;

pub use archive::pipe_archive;
pub use error::PackagerError;
pub use sink::{ArchiveSink, BucketSink, LocalFileSink, SinkFuture};

/// Environment variable consulted for a storage bearer token when the config
/// does not carry one.
pub const TOKEN_ENV: &str = "GOOGLE_OAUTH_ACCESS_TOKEN";

/// Where a staged archive ends up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StagingDestination {
    Bucket(String),
    Directory(PathBuf),
}

impl StagingDestination {
    /// Exactly one of `bucket` or `directory` must be given.
    pub fn from_options(
        bucket: Option<&str>,
        directory: Option<&Path>,
    ) -> Result<Self, PackagerError> {
        match (bucket, directory) {
            (Some(_), Some(_)) => Err(PackagerError::ConflictingDestination),
            (None, None) => Err(PackagerError::MissingDestination),
            (Some(bucket), None) => Ok(Self::Bucket(bucket.to_string())),
            (None, Some(dir)) => Ok(Self::Directory(dir.to_path_buf())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ArchiveOptions {
    pub local_path: PathBuf,
    pub region: String,
    pub stage_bucket: Option<String>,
    pub stage_directory: Option<PathBuf>,
}

/// Object name for a staged archive: `{region}-{name}-{random}.zip`.
pub fn artifact_name(region: &str, name: &str) -> String {
    format!("{region}-{name}-{}.zip", uuid::Uuid::new_v4().simple())
}

/// Builds function source archives and stages them.
///
/// Holds the storage endpoint and bearer token used for bucket uploads; a
/// local staging directory needs neither.
pub struct Packager {
    http: reqwest::Client,
    storage_endpoint: String,
    storage_token: Option<String>,
}

impl Packager {
    pub fn new(storage_endpoint: impl Into<String>, storage_token: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            storage_endpoint: storage_endpoint.into().trim_end_matches('/').to_string(),
            storage_token,
        }
    }

    /// Storage settings from `config`, with the token falling back to
    /// [`TOKEN_ENV`].
    pub fn from_config(config: &EmulatorConfig) -> Self {
        let token = config
            .storage_token
            .clone()
            .or_else(|| std::env::var(TOKEN_ENV).ok().filter(|t| !t.is_empty()));
        Self::new(config.storage_endpoint.clone(), token)
    }

    /// Zip `opts.local_path` and stage it, returning the archive location:
    /// `gs://{bucket}/{object}` for buckets or the file path for directories.
    ///
    /// The destination is validated before any filesystem or network work.
    pub async fn create_archive(
        &self,
        name: &str,
        opts: &ArchiveOptions,
    ) -> Result<String, PackagerError> {
        let destination = StagingDestination::from_options(
            opts.stage_bucket.as_deref(),
            opts.stage_directory.as_deref(),
        )?;

        let source = archive::absolute(&opts.local_path)?;
        if !tokio::fs::metadata(&source)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
        {
            return Err(PackagerError::SourceMissing(source));
        }

        let file_name = artifact_name(&opts.region, name);
        tracing::info!(
            function = %name,
            source = %source.display(),
            artifact = %file_name,
            "Packaging function source"
        );

        let sink = self.open_sink(&destination, &file_name).await?;
        pipe_archive(&source, sink).await
    }

    /// Open the sink for `file_name` at `destination`. Bucket uploads start
    /// immediately and receive the archive as it is written.
    pub async fn open_sink(
        &self,
        destination: &StagingDestination,
        file_name: &str,
    ) -> Result<Box<dyn ArchiveSink>, PackagerError> {
        Ok(match destination {
            StagingDestination::Directory(dir) => {
                Box::new(LocalFileSink::create(dir, file_name).await?)
            }
            StagingDestination::Bucket(bucket) => Box::new(BucketSink::open(
                &self.http,
                &self.storage_endpoint,
                bucket,
                file_name,
                self.storage_token.as_deref(),
            )),
        })
    }
}
