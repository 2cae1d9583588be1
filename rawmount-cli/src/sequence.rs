//! Directory-backed DNG sequence decoder.
//!
//! Reads an existing folder of `.dng` files, ordered by the frame number
//! embedded in their names (falling back to lexical order), and assigns
//! timestamps on a fixed cadence. This is the host-side decoder this build
//! ships; the container decoders for MCRAW and DirectLog are external
//! bindings with the same contract.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use rawmount::source::{DngSequenceSource, OpenDngSequence, SequenceFrame, SourceError, Timestamp};

pub struct DirDngSequence {
    files: Vec<(PathBuf, u64)>,
    interval_ns: i64,
}

impl DirDngSequence {
    pub fn scan(dir: &Path, fps: f64) -> Result<DirDngSequence> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(dir)
            .with_context(|| format!("reading sequence directory {}", dir.display()))?
        {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("dng") {
                continue;
            }
            let size = entry.metadata()?.len();
            files.push((path, size));
        }

        if files.is_empty() {
            bail!("no .dng files in {}", dir.display());
        }

        files.sort_by_key(|(path, _)| (frame_number_of(path), path.clone()));

        Ok(DirDngSequence {
            files,
            interval_ns: (1e9 / fps.max(1.0)) as i64,
        })
    }

    /// Opener for the filesystem constructors: rescans the directory per
    /// instance so decoder slots stay independent.
    pub fn opener(dir: PathBuf, fps: f64) -> Arc<dyn OpenDngSequence> {
        Arc::new(move || {
            DirDngSequence::scan(&dir, fps)
                .map(|s| Box::new(s) as Box<dyn DngSequenceSource>)
                .map_err(|e| SourceError::Open(e.to_string()))
        })
    }
}

/// Trailing digit run of the file stem, e.g. `clip-000042.dng` -> 42.
fn frame_number_of(path: &Path) -> u64 {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("");
    let digits: String = stem
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    digits.parse().unwrap_or(u64::MAX)
}

impl DngSequenceSource for DirDngSequence {
    fn frames(&self) -> Vec<SequenceFrame> {
        self.files
            .iter()
            .enumerate()
            .map(|(i, (_, size))| SequenceFrame {
                timestamp: i as Timestamp * self.interval_ns,
                size: *size,
            })
            .collect()
    }

    fn extract_frame(&mut self, index: usize) -> Result<Vec<u8>, SourceError> {
        let (path, _) = self
            .files
            .get(index)
            .ok_or_else(|| SourceError::Decode(format!("no frame {}", index)))?;
        Ok(std::fs::read(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_number_of() {
        assert_eq!(frame_number_of(Path::new("clip-000042.dng")), 42);
        assert_eq!(frame_number_of(Path::new("7.dng")), 7);
        assert_eq!(frame_number_of(Path::new("nodigits.dng")), u64::MAX);
    }
}
