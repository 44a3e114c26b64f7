//! Access to the card's control surface, the sysfs parameter files the
//! cxadc driver exposes under /sys/class/cxadc.

use std::{
    fs,
    io::{self, Write},
    path::PathBuf,
};

use thiserror::Error;

use crate::SampleWidth;

#[derive(Debug, Error)]
pub enum PortError {
    #[error("failed to read parameter {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write parameter {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed value {text:?} in {}", .path.display())]
    Malformed { path: PathBuf, text: String },
    #[error("unsupported sample width flag {0}")]
    UnsupportedWidth(i64),
}

/// Handle on one card's parameter directory.
///
/// Every accessor is a single open/transfer/close cycle, the same access
/// pattern a shell redirect to sysfs performs; nothing is cached, so two
/// overlapping gain checks both see whatever the driver holds at the moment
/// they read.
#[derive(Debug, Clone)]
pub struct GainPort {
    params: PathBuf,
}

impl GainPort {
    pub fn new(device: &str) -> Self {
        Self {
            params: PathBuf::from(format!("/sys/class/cxadc/{device}/device/parameters")),
        }
    }

    /// Point the port at an arbitrary parameters directory
    pub fn with_params_dir(params: PathBuf) -> Self {
        Self { params }
    }

    fn read_param(&self, name: &str) -> Result<i64, PortError> {
        let path = self.params.join(name);
        let text = fs::read_to_string(&path).map_err(|source| PortError::Read {
            path: path.clone(),
            source,
        })?;
        text.trim().parse().map_err(|_| PortError::Malformed {
            path,
            text: text.trim().to_string(),
        })
    }

    fn write_param(&self, name: &str, value: i64) -> Result<(), PortError> {
        let path = self.params.join(name);
        let mut file = fs::OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&path)
            .map_err(|source| PortError::Write {
                path: path.clone(),
                source,
            })?;
        file.write_all(value.to_string().as_bytes())
            .map_err(|source| PortError::Write { path, source })
    }

    pub fn read_level(&self) -> Result<i64, PortError> {
        self.read_param("level")
    }

    pub fn write_level(&self, level: i64) -> Result<(), PortError> {
        self.write_param("level", level)
    }

    /// The driver's `tenbit` flag: 0 means 8-bit samples, 1 means 16-bit
    pub fn sample_width(&self) -> Result<SampleWidth, PortError> {
        SampleWidth::from_flag(self.read_param("tenbit")?)
    }
}
