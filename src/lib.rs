//! Continuous capture from a cxadc digitizer with automatic gain control.
//!
//! One thread runs the read -> relay loop against the device node, copying
//! the raw sample stream to the output file untouched. Every
//! `check_interval` chunks, the chunk just relayed is handed to an
//! independent evaluator thread that counts saturated samples and may step
//! the card's analog gain register down by one.

use std::path::PathBuf;

use crate::control::PortError;

pub mod agc;
pub mod args;
pub mod capture;
pub mod control;

/// Bytes per read from the device node
pub const CHUNK_SIZE: usize = 2 * 1024 * 1024;
/// Chunks relayed between gain checks
pub const CHECK_INTERVAL: i64 = 150;
/// Divisor mapping the chunk size to the clipped-sample tolerance
pub const TOLERANCE_DIVISOR: usize = 50_000;

/// How many bits each sample in the stream occupies, reported by the
/// driver's `tenbit` parameter. Fixed for the whole session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleWidth {
    Eight,
    Sixteen,
}

impl SampleWidth {
    pub fn from_flag(flag: i64) -> Result<Self, PortError> {
        match flag {
            0 => Ok(SampleWidth::Eight),
            1 => Ok(SampleWidth::Sixteen),
            n => Err(PortError::UnsupportedWidth(n)),
        }
    }

    pub fn bits(self) -> u32 {
        match self {
            SampleWidth::Eight => 8,
            SampleWidth::Sixteen => 16,
        }
    }
}

/// Settings for one capture session, passed into the reader and scheduler
/// explicitly.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub device_path: PathBuf,
    pub chunk_size: usize,
    pub check_interval: i64,
}

impl CaptureConfig {
    pub fn new(device: &str) -> Self {
        Self {
            device_path: PathBuf::from(format!("/dev/{device}")),
            chunk_size: CHUNK_SIZE,
            check_interval: CHECK_INTERVAL,
        }
    }

    /// How many clipped samples a gain check rides through before giving up
    /// on the rest of the chunk
    pub fn clip_tolerance(&self) -> u32 {
        (self.chunk_size / TOLERANCE_DIVISOR) as u32
    }
}
