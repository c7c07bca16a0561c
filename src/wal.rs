use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tokio::sync::{mpsc, oneshot};

use crate::model::Event;

/// Bytes framing each entry: the length prefix and the trailing CRC.
const FRAME_OVERHEAD: u64 = 8;

/// Encode a single event to [len][bincode][crc32] format. Returns the number
/// of bytes written.
fn encode_event(writer: &mut impl Write, event: &Event) -> io::Result<u64> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = payload.len() as u32;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(payload.len() as u64 + FRAME_OVERHEAD)
}

/// Result of reading a WAL back from disk.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Replay {
    pub events: Vec<Event>,
    /// Byte offset just past the last intact entry. Anything after it is a
    /// torn or corrupt tail.
    pub valid_len: u64,
}

/// Append-only Write-Ahead Log.
///
/// Format per entry: `[u32: len][bincode: Event][u32: crc32]`
/// - `len` is the byte length of the bincode payload (not including the CRC).
/// - Truncated last entry (crash) is detected via length-prefix + CRC check
///   and cut off by [`Wal::truncate`] before the log is reopened for writing.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    /// File length as of the last successful fsync.
    synced_len: u64,
    /// Bytes appended since then, buffered or written but not yet synced.
    unsynced_len: u64,
    /// Set when a failed batch could not be cut back off the file. Every
    /// later write fails rather than landing behind bytes callers were told
    /// never committed.
    poisoned: bool,
}

impl Wal {
    /// Open (or create) the WAL file at `path`.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let synced_len = file.metadata()?.len();
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            synced_len,
            unsynced_len: 0,
            poisoned: false,
        })
    }

    /// Append a single event and fsync. Production code goes through the
    /// group-commit writer instead.
    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Append a single event to the BufWriter without flushing or syncing.
    /// Call `flush_sync()` after the batch to durably commit all buffered events.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        if self.poisoned {
            return Err(io::Error::other(format!(
                "WAL {} is poisoned by an earlier failed write",
                self.path.display()
            )));
        }
        self.unsynced_len += encode_event(&mut self.writer, event)?;
        Ok(())
    }

    /// Flush the BufWriter and fsync the underlying file.
    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.synced_len += self.unsynced_len;
        self.unsynced_len = 0;
        Ok(())
    }

    /// Throw away everything appended since the last successful fsync: the
    /// buffered bytes are dropped unwritten and the file is cut back to
    /// `synced_len`. If that fails the log is poisoned.
    pub fn discard_unsynced(&mut self) -> io::Result<()> {
        self.unsynced_len = 0;
        let result = self.reset_writer();
        if result.is_err() {
            self.poisoned = true;
        }
        result
    }

    fn reset_writer(&mut self) -> io::Result<()> {
        let file = OpenOptions::new().append(true).open(&self.path)?;
        file.set_len(self.synced_len)?;
        file.sync_all()?;
        let stale = std::mem::replace(&mut self.writer, BufWriter::new(file));
        // into_parts hands back the buffer instead of flushing it on drop
        let (_, _discarded) = stale.into_parts();
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Cut the file at `path` back to `valid_len` and fsync it. Returns the
    /// number of bytes removed.
    pub fn truncate(path: &Path, valid_len: u64) -> io::Result<u64> {
        let file = match OpenOptions::new().write(true).open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };
        let len = file.metadata()?.len();
        if len <= valid_len {
            return Ok(0);
        }
        file.set_len(valid_len)?;
        file.sync_all()?;
        Ok(len - valid_len)
    }

    /// Replay the WAL from disk, returning all valid events and where they end.
    /// Reading stops at the first truncated or corrupt entry.
    pub fn replay(path: &Path) -> io::Result<Replay> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Replay::default()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut replay = Replay::default();

        loop {
            let mut len_buf = [0u8; 4];
            match reader.read_exact(&mut len_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e),
            }
            let len = u32::from_le_bytes(len_buf) as usize;

            let mut payload = vec![0u8; len];
            match reader.read_exact(&mut payload) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break, // truncated
                Err(e) => return Err(e),
            }

            let mut crc_buf = [0u8; 4];
            match reader.read_exact(&mut crc_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break, // truncated
                Err(e) => return Err(e),
            }
            if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
                break;
            }

            match bincode::deserialize::<Event>(&payload) {
                Ok(event) => replay.events.push(event),
                Err(_) => break,
            }
            replay.valid_len += len as u64 + FRAME_OVERHEAD;
        }

        Ok(replay)
    }
}

// ── Group-commit writer ──────────────────────────────────

pub(crate) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    /// Flush whatever is queued, acknowledge, and stop.
    Shutdown { response: oneshot::Sender<()> },
}

/// Cheap cloneable sender side of the group-commit writer.
#[derive(Clone)]
pub struct WalHandle {
    tx: mpsc::Sender<WalCommand>,
}

impl WalHandle {
    /// Take ownership of `wal` and start the writer task. Must run inside a
    /// tokio runtime.
    pub fn spawn(wal: Wal, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        tokio::spawn(writer_loop(wal, rx));
        Self { tx }
    }

    /// Durably append `event`. Resolves once the batch containing it is fsynced.
    pub async fn append(&self, event: &Event) -> io::Result<()> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| io::Error::other("WAL writer shut down"))?;
        rx.await
            .map_err(|_| io::Error::other("WAL writer dropped response"))?
    }

    /// Stop the writer after everything already queued is on disk.
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(WalCommand::Shutdown { response: tx }).await.is_ok() {
            let _ = rx.await;
        }
    }
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            WalCommand::Shutdown { response } => {
                let _ = response.send(());
                break;
            }
        };
        let mut batch = vec![(event, response)];
        let mut stop = None;

        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(WalCommand::Shutdown { response }) => {
                    stop = Some(response);
                    break;
                }
                Err(_) => break, // channel empty — flush batch
            }
        }

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        if let Err(e) = &result {
            tracing::error!("WAL flush of {} events to {} failed: {e}", batch.len(), wal.path().display());
        }
        respond_batch(batch, &result);

        if let Some(response) = stop {
            let _ = response.send(());
            break;
        }
    }
    tracing::debug!("WAL writer for {} stopped", wal.path().display());
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event))
        .and_then(|()| wal.flush_sync());
    // Every caller in the batch is told it failed, so none of its bytes may
    // reach disk later.
    if result.is_err() {
        if let Err(e) = wal.discard_unsynced() {
            tracing::error!(
                "discarding failed WAL batch in {} failed, log is now read-only: {e}",
                wal.path().display()
            );
        }
    }
    result
}

fn respond_batch(batch: Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}
