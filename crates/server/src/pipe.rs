//! Pipe reader - the PCM producer
//!
//! Reads raw PCM from a named FIFO in fixed-duration chunks and hands each
//! one to the coordinator through [`ChunkSink`]. The reader runs on its
//! own OS thread: FIFO opens and reads are blocking calls, and the thread
//! paces itself against the chunk timestamps so a fast producer cannot
//! push audio ahead of real time.
//!
//! The FIFO is opened read-write so the read end never sees EOF when a
//! producer detaches; the next producer just resumes the stream, and the
//! timestamp gap surfaces as a resync. The FIFO itself must already exist
//! (`mkfifo` it before starting the server); until it does, the reader
//! retries with a delay.
//!
//! The reader also owns the codec header served to header requests. For
//! the `pcm` codec that is a canonical 44-byte WAV header derived from the
//! sample format.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use chorus_protocol::{CodecHeader, PcmChunk, SampleFormat, TimeVal};

use crate::error::{Result, ServerError};

/// How far the chunk clock may fall behind wall clock before resyncing
const RESYNC_TOLERANCE_MS: f64 = 50.0;

/// Delay between attempts to open a missing or broken pipe
const REOPEN_DELAY: Duration = Duration::from_secs(1);

/// Sink for produced chunks - implemented by the coordinator
pub trait ChunkSink: Send + Sync + 'static {
    /// A chunk of `duration_ms` milliseconds is ready for broadcast
    fn on_chunk(&self, chunk: PcmChunk, duration_ms: f64);

    /// The stream clock jumped by `ms`; purely informational
    fn on_resync(&self, ms: f64);
}

/// Produces timestamped PCM chunks from a named FIFO
#[derive(Debug)]
pub struct PipeReader {
    path: PathBuf,
    chunk_ms: f64,
    chunk_bytes: usize,
    header: CodecHeader,
    cancel: CancellationToken,
}

impl PipeReader {
    /// Create a reader; fails if the codec is unknown or the chunk size
    /// degenerates to zero bytes
    pub fn new(
        path: impl AsRef<Path>,
        codec: &str,
        format: SampleFormat,
        read_interval_ms: u32,
    ) -> Result<Self> {
        let header = match codec {
            "pcm" => CodecHeader {
                codec: codec.to_string(),
                blob: wav_header(&format),
            },
            other => return Err(ServerError::UnknownCodec(other.to_string())),
        };

        let chunk_bytes = format.bytes_per_ms(read_interval_ms);
        if chunk_bytes == 0 {
            return Err(ServerError::UnknownCodec(format!(
                "sample format {format} yields empty {read_interval_ms} ms chunks"
            )));
        }

        Ok(Self {
            path: path.as_ref().to_path_buf(),
            chunk_ms: read_interval_ms as f64,
            chunk_bytes,
            header,
            cancel: CancellationToken::new(),
        })
    }

    /// The codec initialization header for this stream
    pub fn header(&self) -> CodecHeader {
        self.header.clone()
    }

    /// Bytes per produced chunk
    pub fn chunk_bytes(&self) -> usize {
        self.chunk_bytes
    }

    /// Spawn the producer thread
    pub fn start(self: &Arc<Self>, sink: Arc<dyn ChunkSink>) {
        let reader = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name("chorus-pipe".into())
            .spawn(move || reader.run(sink));
        if let Err(e) = spawned {
            warn!(error = %e, "failed to spawn pipe reader thread");
        }
    }

    /// Ask the producer thread to exit
    ///
    /// A thread blocked inside a FIFO read only notices once data arrives;
    /// process exit covers final shutdown.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    fn run(self: Arc<Self>, sink: Arc<dyn ChunkSink>) {
        let Some(mut file) = self.open_pipe() else {
            return;
        };

        let mut buf = vec![0u8; self.chunk_bytes];
        let mut next_ts = TimeVal::now();

        while !self.cancel.is_cancelled() {
            if !self.fill_chunk(&mut file, &mut buf) {
                return;
            }

            let now = TimeVal::now();
            let behind = now.diff_millis(next_ts);
            if behind > RESYNC_TOLERANCE_MS {
                sink.on_resync(behind);
                next_ts = now;
            }

            let chunk = PcmChunk {
                timestamp: next_ts,
                payload: Bytes::copy_from_slice(&buf),
            };
            next_ts = next_ts.add_millis(self.chunk_ms);
            sink.on_chunk(chunk, self.chunk_ms);

            // Pace against the chunk clock so a producer that dumps data
            // into the FIFO does not stream faster than real time.
            let ahead = next_ts.diff_millis(TimeVal::now());
            if ahead > 0.0 {
                thread::sleep(Duration::from_micros((ahead * 1e3) as u64));
            }
        }
    }

    /// Read one full chunk into `buf`; false means shutdown
    fn fill_chunk(&self, file: &mut File, buf: &mut [u8]) -> bool {
        let mut filled = 0;
        while filled < buf.len() {
            if self.cancel.is_cancelled() {
                return false;
            }
            match file.read(&mut buf[filled..]) {
                Ok(0) => {
                    // Not expected on a read-write FIFO handle; reopen.
                    match self.open_pipe() {
                        Some(f) => *file = f,
                        None => return false,
                    }
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "pipe read failed, reopening");
                    thread::sleep(REOPEN_DELAY);
                    match self.open_pipe() {
                        Some(f) => *file = f,
                        None => return false,
                    }
                }
            }
        }
        true
    }

    /// Open the FIFO, retrying until it exists; None means shutdown
    fn open_pipe(&self) -> Option<File> {
        loop {
            if self.cancel.is_cancelled() {
                return None;
            }
            match OpenOptions::new().read(true).write(true).open(&self.path) {
                Ok(file) => {
                    info!(path = %self.path.display(), "pipe opened");
                    return Some(file);
                }
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "cannot open pipe, retrying");
                    thread::sleep(REOPEN_DELAY);
                }
            }
        }
    }
}

/// Canonical 44-byte WAV header for a raw PCM stream
///
/// Chunk sizes are pinned to the maximum since the stream is unbounded.
fn wav_header(format: &SampleFormat) -> Bytes {
    let byte_rate = format.rate * format.channels as u32 * format.bits as u32 / 8;
    let block_align = format.frame_size() as u16;

    let mut buf = BytesMut::with_capacity(44);
    buf.put_slice(b"RIFF");
    buf.put_u32_le(u32::MAX);
    buf.put_slice(b"WAVE");
    buf.put_slice(b"fmt ");
    buf.put_u32_le(16);
    buf.put_u16_le(1); // PCM
    buf.put_u16_le(format.channels);
    buf.put_u32_le(format.rate);
    buf.put_u32_le(byte_rate);
    buf.put_u16_le(block_align);
    buf.put_u16_le(format.bits);
    buf.put_slice(b"data");
    buf.put_u32_le(u32::MAX);
    buf.freeze()
}

#[cfg(test)]
#[path = "pipe_test.rs"]
mod tests;
