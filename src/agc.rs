//! The gain check itself: stride-sample a relayed chunk, count saturated
//! samples, and step the card's gain register down when too many clip.
//!
//! Each check runs on its own thread so the relay loop never waits on the
//! sysfs round trips. Overlapping checks are independent and uncoordinated;
//! the last write to the level parameter wins.

use std::fmt;
use std::thread::{self, JoinHandle};

use chrono::Local;
use tracing::error;

use crate::{
    control::{GainPort, PortError},
    SampleWidth,
};

/// Only every Nth sample unit of a chunk is inspected
pub const SAMPLE_STRIDE: usize = 16;
/// Inclusive window an 8-bit sample must stay inside to count as clean
pub const IN_RANGE_8: (u8, u8) = (8, 248);
/// Inclusive window a 16-bit sample must stay inside to count as clean
pub const IN_RANGE_16: (u16, u16) = (514, 64900);
/// Clipped-sample count that steps the gain down even when the scan ran to
/// the end of the chunk
pub const MODERATE_CLIP_LIMIT: u32 = 20;
/// Counter value marking a scan that was abandoned for clipping too much
pub const CLIP_SENTINEL: u32 = 99_999;

/// Running stats over the inspected subset of one chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanResult {
    pub low: u16,
    pub high: u16,
    pub clipped: u32,
}

/// Walk every [`SAMPLE_STRIDE`]th byte of the chunk, tracking min/max and
/// counting samples outside the clean window. The moment `tolerance`
/// samples have clipped, the counter is pinned at [`CLIP_SENTINEL`] and the
/// rest of the chunk is never looked at.
pub fn scan_chunk8(chunk: &[u8], tolerance: u32) -> ScanResult {
    let mut low = u8::MAX;
    let mut high = u8::MIN;
    let mut clipped = 0u32;
    for &sample in chunk.iter().step_by(SAMPLE_STRIDE) {
        low = low.min(sample);
        high = high.max(sample);
        if sample < IN_RANGE_8.0 || sample > IN_RANGE_8.1 {
            clipped += 1;
            if clipped >= tolerance {
                clipped = CLIP_SENTINEL;
                break;
            }
        }
    }
    ScanResult {
        low: low.into(),
        high: high.into(),
        clipped,
    }
}

/// 16-bit variant of [`scan_chunk8`]: samples are little-endian words,
/// inspected at the same stride in words. A trailing odd byte carries no
/// complete sample and is skipped.
pub fn scan_chunk16(chunk: &[u8], tolerance: u32) -> ScanResult {
    let mut low = u16::MAX;
    let mut high = u16::MIN;
    let mut clipped = 0u32;
    for pair in chunk.chunks_exact(2).step_by(SAMPLE_STRIDE) {
        let sample = u16::from_le_bytes([pair[0], pair[1]]);
        low = low.min(sample);
        high = high.max(sample);
        if sample < IN_RANGE_16.0 || sample > IN_RANGE_16.1 {
            clipped += 1;
            if clipped >= tolerance {
                clipped = CLIP_SENTINEL;
                break;
            }
        }
    }
    ScanResult { low, high, clipped }
}

/// What one evaluation decided to do with the gain register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GainAction {
    Maintain,
    Lower,
}

pub fn decide(clipped: u32) -> GainAction {
    if clipped == CLIP_SENTINEL || clipped >= MODERATE_CLIP_LIMIT {
        GainAction::Lower
    } else {
        GainAction::Maintain
    }
}

/// One evaluation's result, kept only long enough to print the status line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvaluationOutcome {
    pub action: GainAction,
    /// Level as written back to the card
    pub level: i64,
    pub low: u16,
    pub high: u16,
    pub clipped: u32,
}

impl fmt::Display for EvaluationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.action {
            GainAction::Maintain => write!(f, "Maintaining Gain:")?,
            GainAction::Lower => write!(f, "Lowering Gain: Fine {}", self.level)?,
        }
        write!(
            f,
            " Low: {} High: {} Clipped: {}",
            self.low, self.high, self.clipped
        )
    }
}

/// Run one full gain check against a chunk: read the register, scan, decide,
/// write the register back (even when unchanged). The lowered level is
/// floored at zero on both clipping paths.
pub fn evaluate(
    chunk: &[u8],
    width: SampleWidth,
    port: &GainPort,
    tolerance: u32,
) -> Result<EvaluationOutcome, PortError> {
    let level = port.read_level()?;
    let scan = match width {
        SampleWidth::Eight => scan_chunk8(chunk, tolerance),
        SampleWidth::Sixteen => scan_chunk16(chunk, tolerance),
    };
    let action = decide(scan.clipped);
    let level = match action {
        GainAction::Maintain => level,
        GainAction::Lower => (level - 1).max(0),
    };
    port.write_level(level)?;
    Ok(EvaluationOutcome {
        action,
        level,
        low: scan.low,
        high: scan.high,
        clipped: scan.clipped,
    })
}

/// Fire off one evaluation on its own thread. The chunk moves into the
/// task; a port failure aborts this task alone and costs one adjustment.
pub fn spawn_evaluation(
    chunk: Vec<u8>,
    width: SampleWidth,
    port: GainPort,
    tolerance: u32,
) -> JoinHandle<()> {
    thread::spawn(move || {
        match evaluate(&chunk, width, &port, tolerance) {
            Ok(outcome) => {
                println!("{} : {outcome}", Local::now().format("%Y-%m-%d %H:%M:%S"));
            }
            Err(e) => error!("gain check failed: {e}"),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};

    // 2 MiB chunk / 50000
    const TOLERANCE: u32 = 41;

    static SEQ: AtomicUsize = AtomicUsize::new(0);

    fn scratch_port(level: i64, tenbit: i64) -> GainPort {
        let dir = std::env::temp_dir().join(format!(
            "cxcap-agc-{}-{}",
            std::process::id(),
            SEQ.fetch_add(1, Ordering::Relaxed)
        ));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("level"), level.to_string()).unwrap();
        fs::write(dir.join("tenbit"), tenbit.to_string()).unwrap();
        GainPort::with_params_dir(dir)
    }

    fn chunk_from_words(words: &[u16]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    #[test]
    fn quiet_chunk_maintains_gain() {
        let chunk = vec![128u8; 2 * 1024 * 1024];
        let scan = scan_chunk8(&chunk, TOLERANCE);
        assert_eq!(
            scan,
            ScanResult {
                low: 128,
                high: 128,
                clipped: 0
            }
        );
        assert_eq!(decide(scan.clipped), GainAction::Maintain);
    }

    #[test]
    fn min_max_track_only_the_stride_subset() {
        // full-scale spikes between stride points must stay invisible
        let mut chunk = vec![100u8; 4096];
        for (i, b) in chunk.iter_mut().enumerate() {
            if i % SAMPLE_STRIDE != 0 {
                *b = if i % 2 == 0 { 0 } else { 255 };
            }
        }
        let scan = scan_chunk8(&chunk, TOLERANCE);
        assert_eq!((scan.low, scan.high, scan.clipped), (100, 100, 0));
    }

    #[test]
    fn heavy_clipping_abandons_the_scan() {
        // 50 clipped stride samples with tolerance 41: the 41st pins the
        // counter, so a spike further in is never seen
        let mut chunk = vec![128u8; 4096 * SAMPLE_STRIDE];
        for i in 0..50 {
            chunk[i * SAMPLE_STRIDE] = 0;
        }
        chunk[100 * SAMPLE_STRIDE] = 255;
        let scan = scan_chunk8(&chunk, TOLERANCE);
        assert_eq!(scan.clipped, CLIP_SENTINEL);
        assert_eq!((scan.low, scan.high), (0, 128));
        assert_eq!(decide(scan.clipped), GainAction::Lower);
    }

    #[test]
    fn moderate_clipping_lowers_after_a_full_scan() {
        let mut chunk = vec![128u8; 4096 * SAMPLE_STRIDE];
        for i in 0..MODERATE_CLIP_LIMIT as usize {
            chunk[i * SAMPLE_STRIDE] = 250;
        }
        let scan = scan_chunk8(&chunk, 1000);
        assert_eq!(scan.clipped, MODERATE_CLIP_LIMIT);
        assert_eq!(scan.high, 250);
        assert_eq!(decide(scan.clipped), GainAction::Lower);
    }

    #[test]
    fn window_edges_are_clean_for_both_widths() {
        let mut chunk = vec![128u8; 64 * SAMPLE_STRIDE];
        chunk[0] = IN_RANGE_8.0;
        chunk[SAMPLE_STRIDE] = IN_RANGE_8.1;
        assert_eq!(scan_chunk8(&chunk, TOLERANCE).clipped, 0);
        chunk[2 * SAMPLE_STRIDE] = IN_RANGE_8.0 - 1;
        chunk[3 * SAMPLE_STRIDE] = IN_RANGE_8.1 + 1;
        assert_eq!(scan_chunk8(&chunk, TOLERANCE).clipped, 2);

        let mut words = vec![32768u16; 64 * SAMPLE_STRIDE];
        words[0] = IN_RANGE_16.0;
        words[SAMPLE_STRIDE] = IN_RANGE_16.1;
        let scan = scan_chunk16(&chunk_from_words(&words), TOLERANCE);
        assert_eq!((scan.low, scan.high, scan.clipped), (514, 64900, 0));
        words[2 * SAMPLE_STRIDE] = IN_RANGE_16.0 - 1;
        words[3 * SAMPLE_STRIDE] = IN_RANGE_16.1 + 1;
        let scan = scan_chunk16(&chunk_from_words(&words), TOLERANCE);
        assert_eq!((scan.low, scan.high, scan.clipped), (513, 64901, 2));
    }

    #[test]
    fn trailing_odd_byte_is_skipped() {
        let mut chunk = chunk_from_words(&vec![32768u16; SAMPLE_STRIDE]);
        chunk.push(0xff);
        assert_eq!(scan_chunk16(&chunk, TOLERANCE).clipped, 0);
    }

    #[test]
    fn clean_sixteen_bit_chunk_keeps_the_level() {
        let port = scratch_port(5, 1);
        let chunk = chunk_from_words(&vec![32768u16; 256 * SAMPLE_STRIDE]);
        let outcome = evaluate(&chunk, SampleWidth::Sixteen, &port, TOLERANCE).unwrap();
        assert_eq!(outcome.action, GainAction::Maintain);
        assert_eq!(port.read_level().unwrap(), 5);
        assert_eq!(
            outcome.to_string(),
            "Maintaining Gain: Low: 32768 High: 32768 Clipped: 0"
        );
    }

    #[test]
    fn heavy_clipping_steps_the_level_down() {
        let port = scratch_port(5, 0);
        let chunk = vec![0u8; 2 * 1024 * 1024];
        let outcome = evaluate(&chunk, SampleWidth::Eight, &port, TOLERANCE).unwrap();
        assert_eq!(outcome.action, GainAction::Lower);
        assert_eq!(outcome.clipped, CLIP_SENTINEL);
        assert_eq!(port.read_level().unwrap(), 4);
        assert_eq!(
            outcome.to_string(),
            "Lowering Gain: Fine 4 Low: 0 High: 0 Clipped: 99999"
        );
    }

    #[test]
    fn heavy_clipping_floors_the_level_at_zero() {
        let port = scratch_port(0, 0);
        let chunk = vec![255u8; 2 * 1024 * 1024];
        evaluate(&chunk, SampleWidth::Eight, &port, TOLERANCE).unwrap();
        assert_eq!(port.read_level().unwrap(), 0);
    }

    #[test]
    fn moderate_clipping_floors_the_level_at_zero() {
        let port = scratch_port(0, 0);
        let mut chunk = vec![128u8; 4096 * SAMPLE_STRIDE];
        for i in 0..MODERATE_CLIP_LIMIT as usize {
            chunk[i * SAMPLE_STRIDE] = 0;
        }
        let outcome = evaluate(&chunk, SampleWidth::Eight, &port, 1000).unwrap();
        assert_eq!(outcome.action, GainAction::Lower);
        assert_eq!(outcome.clipped, MODERATE_CLIP_LIMIT);
        assert_eq!(port.read_level().unwrap(), 0);
    }

    #[test]
    fn evaluation_failure_stays_inside_its_task() {
        let port = GainPort::with_params_dir(std::env::temp_dir().join("cxcap-agc-missing"));
        let handle = spawn_evaluation(vec![128u8; 1024], SampleWidth::Eight, port, TOLERANCE);
        assert!(handle.join().is_ok());
    }
}
