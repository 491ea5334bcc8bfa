// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! SoundFont sound banks.
//!
//! A bank is checked once when a library is created so a missing or broken
//! file fails initialization instead of the first playback. The synthesizer
//! itself loads the samples per player.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use tracing::info;

use super::EngineError;

/// A validated SF2 file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoundBank {
    path: PathBuf,
    size: u64,
    name: Option<String>,
}

impl SoundBank {
    /// Validate the SF2 file at `path`
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let fail = |reason: String| EngineError::SoundBank(format!("{}: {}", path.display(), reason));

        let mut file = File::open(path).map_err(|e| fail(e.to_string()))?;
        let size = file.metadata().map_err(|e| fail(e.to_string()))?.len();

        let mut header = [0u8; 12];
        file.read_exact(&mut header)
            .map_err(|_| fail("file too short".to_string()))?;

        // RIFF container with an sfbk form type
        if &header[0..4] != b"RIFF" || &header[8..12] != b"sfbk" {
            return Err(fail("not a SoundFont 2 file".to_string()));
        }

        let name = read_bank_name(&mut file);
        info!(
            "Sound bank {} ({} bytes){}",
            path.display(),
            size,
            name.as_deref().map(|n| format!(": {}", n)).unwrap_or_default()
        );

        Ok(Self {
            path: path.to_path_buf(),
            size,
            name,
        })
    }

    /// Path of the bank file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File size in bytes
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Bank name from the INFO list, if present
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

/// Read the INAM entry of the leading LIST/INFO chunk
fn read_bank_name(file: &mut File) -> Option<String> {
    let mut chunk = [0u8; 12];
    file.read_exact(&mut chunk).ok()?;
    if &chunk[0..4] != b"LIST" || &chunk[8..12] != b"INFO" {
        return None;
    }
    let length = u32::from_le_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]) as usize;
    let mut info = vec![0u8; length.saturating_sub(4).min(64 * 1024)];
    file.read_exact(&mut info).ok()?;

    let mut pos = 0;
    while pos + 8 <= info.len() {
        let id = &info[pos..pos + 4];
        let size = u32::from_le_bytes([info[pos + 4], info[pos + 5], info[pos + 6], info[pos + 7]])
            as usize;
        let start = pos + 8;
        let end = (start + size).min(info.len());
        if id == b"INAM" {
            let text = String::from_utf8_lossy(&info[start..end]);
            let text = text.trim_end_matches('\0').trim();
            return (!text.is_empty()).then(|| text.to_string());
        }
        // Sub-chunks are padded to even sizes
        pos = start + size + (size & 1);
    }
    None
}
