use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::domain::TagTask;
use crate::error::HarvestError;

/// Plain-text file with one tag query per line.
///
/// Line numbers are positions in the unfiltered file, so blank lines keep
/// their number even though they never become tasks.
#[derive(Debug, Clone)]
pub struct TagSource {
    path: PathBuf,
}

impl TagSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-reads the file; called once per resume attempt.
    pub fn read_from(&self, start_line: u64) -> Result<Vec<TagTask>, HarvestError> {
        let content = self.read()?;
        let start_line = start_line.max(1);
        Ok(content
            .lines()
            .zip(1u64..)
            .skip_while(|(_, number)| *number < start_line)
            .filter_map(|(line, number)| {
                let query = line.trim();
                (!query.is_empty()).then(|| TagTask::new(number, query))
            })
            .collect())
    }

    /// Total number of lines, blank ones included.
    pub fn line_count(&self) -> Result<u64, HarvestError> {
        Ok(self.read()?.lines().count() as u64)
    }

    fn read(&self) -> Result<String, HarvestError> {
        fs::read_to_string(&self.path).map_err(|err| match err.kind() {
            ErrorKind::NotFound => HarvestError::SourceNotFound(self.path.clone()),
            _ => HarvestError::SourceRead {
                path: self.path.clone(),
                message: err.to_string(),
            },
        })
    }
}
