use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::HarvestError;

/// Names of every file entry in the archive; empty when it does not exist yet.
pub fn zip_entry_names(zip_path: &Path) -> Result<HashSet<String>, HarvestError> {
    if !zip_path.exists() || fs::metadata(zip_path).map(|meta| meta.len()).unwrap_or(0) == 0 {
        return Ok(HashSet::new());
    }
    let file = fs::File::open(zip_path)
        .map_err(|err| HarvestError::Archive(format!("open zip {}: {err}", zip_path.display())))?;
    let archive = ZipArchive::new(file).map_err(|err| HarvestError::Archive(err.to_string()))?;
    Ok(archive
        .file_names()
        .filter(|name| !name.ends_with('/'))
        .map(|name| name.to_string())
        .collect())
}

/// Appends one deflated entry and finalizes the central directory right away,
/// so an interrupted run never leaves a truncated archive behind.
pub fn append_zip_entry(zip_path: &Path, name: &str, content: &[u8]) -> Result<(), HarvestError> {
    if let Some(parent) = zip_path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|err| HarvestError::Filesystem(err.to_string()))?;
    }
    let exists = fs::metadata(zip_path)
        .map(|meta| meta.len() > 0)
        .unwrap_or(false);
    let file = fs::OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(zip_path)
        .map_err(|err| HarvestError::Archive(format!("open zip {}: {err}", zip_path.display())))?;
    let mut writer = if exists {
        ZipWriter::new_append(file).map_err(|err| HarvestError::Archive(err.to_string()))?
    } else {
        ZipWriter::new(file)
    };
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    writer
        .start_file(name, options)
        .map_err(|err| HarvestError::Archive(err.to_string()))?;
    writer
        .write_all(content)
        .map_err(|err| HarvestError::Archive(err.to_string()))?;
    writer
        .finish()
        .map_err(|err| HarvestError::Archive(err.to_string()))?;
    Ok(())
}

/// Every file below `root`, depth first. Hidden directories are not entered.
pub fn walk_files(root: &Path) -> Result<Vec<PathBuf>, HarvestError> {
    let mut items = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(path) = stack.pop() {
        let entries =
            fs::read_dir(&path).map_err(|err| HarvestError::StoreUnreadable(err.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|err| HarvestError::StoreUnreadable(err.to_string()))?;
            let path = entry.path();
            if path.is_dir() {
                if !is_hidden(&path) {
                    stack.push(path);
                }
            } else {
                items.push(path);
            }
        }
    }
    Ok(items)
}

pub fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.starts_with('.'))
        .unwrap_or(false)
}
