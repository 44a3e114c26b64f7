//! This module contains the capture side: chunked reads from the device
//! node, the relay to the output sink, and the trigger cadence for gain
//! checks.

use std::{
    io::{self, Read, Write},
    thread::JoinHandle,
};

use crossbeam_channel::Receiver;
use tracing::{debug, info};

use crate::{agc::spawn_evaluation, control::GainPort, SampleWidth};

/// Pulls fixed-size chunks off the device stream
pub struct ChunkReader<R> {
    source: R,
    chunk_size: usize,
}

impl<R: Read> ChunkReader<R> {
    pub fn new(source: R, chunk_size: usize) -> Self {
        Self { source, chunk_size }
    }

    /// One read of up to `chunk_size` bytes. A short chunk is fine near the
    /// end of the stream; `None` means the stream is exhausted.
    pub fn read_chunk(&mut self) -> io::Result<Option<Vec<u8>>> {
        let mut chunk = vec![0u8; self.chunk_size];
        let n = self.source.read(&mut chunk)?;
        if n == 0 {
            return Ok(None);
        }
        chunk.truncate(n);
        Ok(Some(chunk))
    }
}

/// Decides which relayed chunks get a gain check.
///
/// The counter starts one whole interval below zero so the first check
/// lands only after the signal has had time to settle; after that, checks
/// come every `interval + 1` chunks.
pub struct IntervalScheduler {
    counter: i64,
    interval: i64,
}

impl IntervalScheduler {
    pub fn new(interval: i64) -> Self {
        Self {
            counter: -interval,
            interval,
        }
    }

    /// Returns true when the chunk just relayed should be evaluated
    pub fn on_chunk(&mut self) -> bool {
        self.counter += 1;
        if self.counter > self.interval {
            self.counter = 0;
            true
        } else {
            false
        }
    }
}

/// Totals for the completion report
#[derive(Debug, Default, Clone, Copy)]
pub struct CaptureStats {
    pub bytes: u64,
    pub chunks: u64,
}

/// The primary loop: read, relay, count, and every so often hand the chunk
/// just written to a fresh evaluator thread. This thread blocks only on the
/// device read and the sink write; gain checks never run here.
///
/// Runs until the stream is exhausted or something arrives on `stop`. The
/// evaluator handles are joined on the way out so a triggered check always
/// completes; one that panicked is dropped without touching the relay
/// result.
pub fn run_relay<R: Read, W: Write>(
    mut reader: ChunkReader<R>,
    mut sink: W,
    mut scheduler: IntervalScheduler,
    width: SampleWidth,
    port: GainPort,
    tolerance: u32,
    stop: Receiver<()>,
) -> io::Result<CaptureStats> {
    let mut stats = CaptureStats::default();
    let mut checks: Vec<JoinHandle<()>> = Vec::new();
    loop {
        if stop.try_recv().is_ok() {
            info!("interrupted, stopping capture");
            break;
        }
        let chunk = match reader.read_chunk()? {
            Some(chunk) => chunk,
            None => break,
        };
        sink.write_all(&chunk)?;
        stats.bytes += chunk.len() as u64;
        stats.chunks += 1;
        if scheduler.on_chunk() {
            debug!(chunk = stats.chunks, "triggering gain check");
            // prune checks that already ran; their threads are detached
            checks.retain(|check| !check.is_finished());
            checks.push(spawn_evaluation(chunk, width, port.clone(), tolerance));
        }
    }
    sink.flush()?;
    for check in checks {
        let _ = check.join();
    }
    Ok(stats)
}
