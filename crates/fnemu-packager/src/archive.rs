use std::fs::File;
use std::io::{self, Seek, SeekFrom, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tokio::sync::mpsc;
use walkdir::WalkDir;
use zip::CompressionMethod;
use zip::write::{SimpleFileOptions, ZipWriter};

use crate::error::PackagerError;
use crate::sink::ArchiveSink;

const CHUNK_SIZE: usize = 64 * 1024;
const CHANNEL_DEPTH: usize = 16;

enum Frame {
    Chunk(Bytes),
    End,
}

type FrameSender = mpsc::Sender<Result<Frame, PackagerError>>;

/// Zip `source` and stream it into `sink`.
///
/// Compression runs on a blocking thread while the sink drains the channel,
/// so either side can fail first. Returns the sink's location once the sink
/// has acknowledged completion. A failure on either side aborts the sink and
/// is returned exactly once.
pub async fn pipe_archive(
    source: &Path,
    mut sink: Box<dyn ArchiveSink>,
) -> Result<String, PackagerError> {
    let (tx, mut rx) = mpsc::channel::<Result<Frame, PackagerError>>(CHANNEL_DEPTH);

    let root = source.to_path_buf();
    let producer = tokio::task::spawn_blocking(move || match produce(&root, &tx) {
        Ok(sent) => tracing::debug!(bytes = sent, "Archive producer done"),
        Err(e) => {
            let _ = tx.blocking_send(Err(e));
        }
    });

    let pumped = pump(&mut rx, sink.as_mut()).await;
    // Unblocks the producer if the sink gave up early.
    drop(rx);
    if let Err(e) = producer.await {
        tracing::debug!(error = %e, "Archive producer did not complete");
    }

    match pumped {
        Ok(()) => {
            let location = sink.location().to_string();
            sink.finish().await?;
            tracing::info!(location = %location, "Archive staged");
            Ok(location)
        }
        Err(e) => {
            tracing::warn!(error = %e, location = %sink.location(), "Archiving failed");
            if let Err(abort_err) = sink.abort().await {
                tracing::debug!(error = %abort_err, "Sink abort failed");
            }
            Err(e)
        }
    }
}

async fn pump(
    rx: &mut mpsc::Receiver<Result<Frame, PackagerError>>,
    sink: &mut dyn ArchiveSink,
) -> Result<(), PackagerError> {
    loop {
        match rx.recv().await {
            Some(Ok(Frame::Chunk(chunk))) => sink.write(chunk).await?,
            Some(Ok(Frame::End)) => return Ok(()),
            Some(Err(e)) => return Err(e),
            None => {
                return Err(PackagerError::Archive(
                    "archive stream closed before completion".into(),
                ));
            }
        }
    }
}

/// Write the archive into `tx`. Returns how many bytes were sent.
///
/// If the consumer goes away the walk stops at the next entry boundary and
/// this returns `Ok`: the consumer reports its own error.
fn produce(root: &Path, tx: &FrameSender) -> Result<u64, PackagerError> {
    let mut out = ChunkWriter::new(tx);
    match write_zip(root, &mut out) {
        Ok(()) => {}
        Err(_) if out.closed => return Ok(out.flushed),
        Err(e) => return Err(e),
    }
    if out.flush().is_ok() {
        let _ = tx.blocking_send(Ok(Frame::End));
    }
    Ok(out.flushed)
}

/// Zip every file and directory beneath `root`, with entry names relative
/// to `root` and `/`-separated. Each entry reaches `out` as soon as it is
/// complete.
fn write_zip(root: &Path, out: &mut ChunkWriter<'_>) -> Result<(), PackagerError> {
    let mut zip = ZipWriter::new(out);
    zip.set_flush_on_finish_file(true);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut files = 0usize;
    for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| PackagerError::Archive(format!("walking source: {e}")))?;
        let name = entry_name(root, entry.path())?;
        let mode = entry
            .metadata()
            .map_err(|e| PackagerError::Archive(format!("reading {}: {e}", entry.path().display())))?
            .permissions()
            .mode();
        let options = options.unix_permissions(mode & 0o777);

        if entry.file_type().is_dir() {
            zip.add_directory(format!("{name}/"), options)
                .map_err(zip_error)?;
        } else if entry.file_type().is_file() {
            zip.start_file(name, options).map_err(zip_error)?;
            let mut file = File::open(entry.path())?;
            io::copy(&mut file, &mut zip)?;
            files += 1;
        }
    }

    zip.finish().map_err(zip_error)?;
    tracing::debug!(root = %root.display(), files, "Built archive");
    Ok(())
}

/// Seekable writer over the frame channel.
///
/// The zip writer seeks back to patch each entry's local header once the
/// entry is written, so bytes stay in `pending` until it flushes at the end
/// of the entry. Memory is bounded by the largest compressed entry.
struct ChunkWriter<'a> {
    tx: &'a FrameSender,
    pending: Vec<u8>,
    /// Stream offset of `pending[0]`; everything before it has been sent.
    flushed: u64,
    pos: u64,
    /// Set once the consumer is gone; later output is discarded.
    closed: bool,
}

impl<'a> ChunkWriter<'a> {
    fn new(tx: &'a FrameSender) -> Self {
        Self {
            tx,
            pending: Vec::new(),
            flushed: 0,
            pos: 0,
            closed: false,
        }
    }
}

impl Write for ChunkWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.closed {
            self.pos += buf.len() as u64;
            return Ok(buf.len());
        }
        let offset = self
            .pos
            .checked_sub(self.flushed)
            .and_then(|o| usize::try_from(o).ok())
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::Unsupported, "cannot rewrite streamed bytes")
            })?;
        if offset > self.pending.len() {
            self.pending.resize(offset, 0);
        }
        let overlap = (self.pending.len() - offset).min(buf.len());
        self.pending[offset..offset + overlap].copy_from_slice(&buf[..overlap]);
        self.pending.extend_from_slice(&buf[overlap..]);
        self.pos += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.closed {
            self.pending.clear();
            return Ok(());
        }
        let data = Bytes::from(std::mem::take(&mut self.pending));
        for start in (0..data.len()).step_by(CHUNK_SIZE) {
            let end = (start + CHUNK_SIZE).min(data.len());
            if self.tx.blocking_send(Ok(Frame::Chunk(data.slice(start..end)))).is_err() {
                self.closed = true;
                return Err(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "archive consumer stopped",
                ));
            }
            self.flushed += (end - start) as u64;
        }
        Ok(())
    }
}

/// `ZipWriter::set_flush_on_finish_file` requires `Read`; the zip writer
/// only reads back for append or deep copy, neither of which is used here.
impl io::Read for ChunkWriter<'_> {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "archive stream is write-only"))
    }
}

impl Seek for ChunkWriter<'_> {
    fn seek(&mut self, from: SeekFrom) -> io::Result<u64> {
        let end = self.flushed + self.pending.len() as u64;
        let target = match from {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::End(delta) => end.checked_add_signed(delta),
            SeekFrom::Current(delta) => self.pos.checked_add_signed(delta),
        };
        self.pos = target
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "seek out of range"))?;
        Ok(self.pos)
    }
}

fn entry_name(root: &Path, path: &Path) -> Result<String, PackagerError> {
    let relative = path
        .strip_prefix(root)
        .map_err(|_| PackagerError::Archive(format!("{} escapes source", path.display())))?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Ok(parts.join("/"))
}

fn zip_error(e: zip::result::ZipError) -> PackagerError {
    PackagerError::Archive(e.to_string())
}

/// Absolute form of `path` without requiring it to exist.
pub(crate) fn absolute(path: &Path) -> Result<PathBuf, PackagerError> {
    Ok(std::path::absolute(path)?)
}
