use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::PackagerError;

/// Boxed future returned by [`ArchiveSink`] operations.
pub type SinkFuture<'a> = Pin<Box<dyn Future<Output = Result<(), PackagerError>> + Send + 'a>>;

/// Destination writer for a zip stream.
///
/// `finish` resolves only once the bytes are durably stored, so a location is
/// never handed out for an archive that is still being written. `abort`
/// discards whatever was written so far.
pub trait ArchiveSink: Send {
    /// Location identifier the archive will be reachable under.
    fn location(&self) -> &str;

    fn write<'a>(&'a mut self, chunk: Bytes) -> SinkFuture<'a>;

    fn finish(self: Box<Self>) -> SinkFuture<'static>;

    fn abort(self: Box<Self>) -> SinkFuture<'static>;
}

/// Writes the archive to a file in a local staging directory.
pub struct LocalFileSink {
    path: PathBuf,
    location: String,
    file: tokio::fs::File,
}

impl LocalFileSink {
    pub async fn create(directory: &Path, file_name: &str) -> Result<Self, PackagerError> {
        tokio::fs::create_dir_all(directory).await?;
        let path = directory.join(file_name);
        let file = tokio::fs::File::create(&path).await?;
        tracing::debug!(path = %path.display(), "Opened local staging file");
        Ok(Self {
            location: path.display().to_string(),
            path,
            file,
        })
    }
}

impl ArchiveSink for LocalFileSink {
    fn location(&self) -> &str {
        &self.location
    }

    fn write<'a>(&'a mut self, chunk: Bytes) -> SinkFuture<'a> {
        Box::pin(async move {
            self.file.write_all(&chunk).await.map_err(|e| {
                PackagerError::Sink(format!("writing {}: {e}", self.path.display()))
            })
        })
    }

    fn finish(self: Box<Self>) -> SinkFuture<'static> {
        Box::pin(async move {
            let LocalFileSink { path, mut file, .. } = *self;
            file.flush()
                .await
                .map_err(|e| PackagerError::Sink(format!("flushing {}: {e}", path.display())))?;
            file.sync_all()
                .await
                .map_err(|e| PackagerError::Sink(format!("syncing {}: {e}", path.display())))?;
            Ok(())
        })
    }

    fn abort(self: Box<Self>) -> SinkFuture<'static> {
        Box::pin(async move {
            let LocalFileSink { path, file, .. } = *self;
            drop(file);
            if let Err(e) = tokio::fs::remove_file(&path).await {
                tracing::debug!(path = %path.display(), error = %e, "Could not remove partial archive");
            }
            Ok(())
        })
    }
}

/// Streams the archive into a storage bucket with a single media upload.
///
/// The upload request is started when the sink is opened and its body is fed
/// from a channel, so the upload and the zip producer fail independently.
pub struct BucketSink {
    location: String,
    tx: Option<mpsc::Sender<Bytes>>,
    upload: Option<JoinHandle<Result<(), PackagerError>>>,
}

const UPLOAD_CHANNEL_DEPTH: usize = 8;

impl BucketSink {
    pub fn open(
        http: &reqwest::Client,
        endpoint: &str,
        bucket: &str,
        object: &str,
        token: Option<&str>,
    ) -> Self {
        let location = format!("gs://{bucket}/{object}");
        let url = format!("{endpoint}/upload/storage/v1/b/{bucket}/o");
        let (tx, rx) = mpsc::channel::<Bytes>(UPLOAD_CHANNEL_DEPTH);

        let body = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv()
                .await
                .map(|chunk| (Ok::<Bytes, std::io::Error>(chunk), rx))
        });

        let mut request = http
            .post(&url)
            .query(&[("uploadType", "media"), ("name", object)])
            .header(reqwest::header::CONTENT_TYPE, "application/zip")
            .body(reqwest::Body::wrap_stream(body));
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }

        let target = location.clone();
        let upload = tokio::spawn(async move {
            let resp = request
                .send()
                .await
                .map_err(|e| PackagerError::Sink(format!("upload to {target} failed: {e}")))?;
            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                return Err(PackagerError::Sink(format!(
                    "upload to {target} returned {status}: {body}"
                )));
            }
            tracing::debug!(location = %target, "Upload acknowledged");
            Ok(())
        });

        Self {
            location,
            tx: Some(tx),
            upload: Some(upload),
        }
    }

    async fn join_upload(&mut self) -> Result<(), PackagerError> {
        match self.upload.take() {
            Some(handle) => handle
                .await
                .map_err(|e| PackagerError::Sink(format!("upload task failed: {e}")))?,
            None => Ok(()),
        }
    }
}

impl ArchiveSink for BucketSink {
    fn location(&self) -> &str {
        &self.location
    }

    fn write<'a>(&'a mut self, chunk: Bytes) -> SinkFuture<'a> {
        Box::pin(async move {
            let tx = self
                .tx
                .as_ref()
                .ok_or_else(|| PackagerError::Sink("upload already closed".into()))?;
            if tx.send(chunk).await.is_ok() {
                return Ok(());
            }

            // The request side hung up; report why.
            self.tx = None;
            match self.join_upload().await {
                Err(e) => Err(e),
                Ok(()) => Err(PackagerError::Sink(format!(
                    "upload to {} ended before the archive was complete",
                    self.location
                ))),
            }
        })
    }

    fn finish(mut self: Box<Self>) -> SinkFuture<'static> {
        Box::pin(async move {
            // Closing the channel ends the request body.
            self.tx = None;
            self.join_upload().await
        })
    }

    fn abort(mut self: Box<Self>) -> SinkFuture<'static> {
        Box::pin(async move {
            // Cancel the request before the body can complete normally.
            if let Some(upload) = self.upload.take() {
                upload.abort();
            }
            self.tx = None;
            Ok(())
        })
    }
}
