use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::sync::{Mutex, MutexGuard};

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::domain::{DedupKey, TagTask};
use crate::error::HarvestError;
use crate::fs_util::{append_zip_entry, is_hidden, walk_files, zip_entry_names};

/// A downloaded, normalized asset waiting to be committed.
///
/// The file is a temp file: if it is dropped without being persisted it is
/// removed, which is what keeps failed items from leaving traces.
pub struct StagedAsset {
    pub file: NamedTempFile,
    pub key: DedupKey,
    pub tag_payload: String,
}

/// Where Output Records live. The store itself is the dedup index.
pub trait OutputStore: Send + Sync {
    /// Directory for temp files; must be on the same filesystem as the store.
    fn staging_dir(&self) -> &Utf8Path;
    fn ensure_layout(&self) -> Result<(), HarvestError>;
    /// Keys of every complete Output Record.
    fn scan(&self) -> Result<HashSet<DedupKey>, HarvestError>;
    /// Writes the asset and then its metadata record. Returns where it landed.
    fn persist(&self, task: &TagTask, asset: StagedAsset) -> Result<String, HarvestError>;
}

/// Folder per tag: `<root>/<tag>/<key>` plus `<root>/<tag>/<stem>.txt`.
#[derive(Debug, Clone)]
pub struct FolderStore {
    root: Utf8PathBuf,
    staging: Utf8PathBuf,
}

impl FolderStore {
    pub fn new(root: Utf8PathBuf) -> Self {
        let staging = root.join(".staging");
        Self { root, staging }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn tag_dir(&self, task: &TagTask) -> Utf8PathBuf {
        self.root.join(task.folder_name())
    }
}

impl OutputStore for FolderStore {
    fn staging_dir(&self) -> &Utf8Path {
        &self.staging
    }

    fn ensure_layout(&self) -> Result<(), HarvestError> {
        fs::create_dir_all(self.staging.as_std_path())
            .map_err(|err| HarvestError::StoreUnreadable(err.to_string()))
    }

    fn scan(&self) -> Result<HashSet<DedupKey>, HarvestError> {
        if !self.root.as_std_path().exists() {
            return Ok(HashSet::new());
        }
        let mut keys = HashSet::new();
        for path in walk_files(self.root.as_std_path())? {
            if is_hidden(&path) {
                continue;
            }
            let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            if path
                .extension()
                .map(|ext| ext.eq_ignore_ascii_case("txt"))
                .unwrap_or(false)
            {
                continue;
            }
            let Some(key) = DedupKey::from_filename(name) else {
                continue;
            };
            // An asset without its sidecar is an interrupted write, not a record.
            if path.with_file_name(key.sidecar_name()).exists() {
                keys.insert(key);
            }
        }
        Ok(keys)
    }

    fn persist(&self, task: &TagTask, asset: StagedAsset) -> Result<String, HarvestError> {
        let dir = self.tag_dir(task);
        fs::create_dir_all(dir.as_std_path())
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        let asset_path = dir.join(asset.key.as_str());
        let sidecar_path = dir.join(asset.key.sidecar_name());

        asset
            .file
            .persist(asset_path.as_std_path())
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        if let Err(err) = write_bytes_atomic(&sidecar_path, asset.tag_payload.as_bytes()) {
            let _ = fs::remove_file(asset_path.as_std_path());
            return Err(err);
        }
        Ok(asset_path.to_string())
    }
}

/// One shared zip plus one shared CSV log of `filename,tags` rows.
///
/// Both files take exclusive appends, so all writes go through one lock. The
/// lock also guards the names already archived and logged, loaded from disk on
/// the first write after each scan.
#[derive(Debug)]
pub struct ArchiveStore {
    archive: Utf8PathBuf,
    log: Utf8PathBuf,
    staging: Utf8PathBuf,
    writer: Mutex<Option<ArchiveIndex>>,
}

#[derive(Debug, Default)]
struct ArchiveIndex {
    archived: HashSet<String>,
    logged: HashSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRow {
    pub filename: String,
    pub tags: String,
}

impl ArchiveStore {
    pub fn new(archive: Utf8PathBuf, log: Utf8PathBuf, staging: Utf8PathBuf) -> Self {
        Self {
            archive,
            log,
            staging,
            writer: Mutex::new(None),
        }
    }

    pub fn archive_path(&self) -> &Utf8Path {
        &self.archive
    }

    pub fn log_path(&self) -> &Utf8Path {
        &self.log
    }

    pub fn read_log(&self) -> Result<Vec<LogRow>, HarvestError> {
        let mut reader = match csv::Reader::from_path(self.log.as_std_path()) {
            Ok(reader) => reader,
            Err(err) => {
                if let csv::ErrorKind::Io(io) = err.kind() {
                    if io.kind() == ErrorKind::NotFound {
                        return Ok(Vec::new());
                    }
                }
                return Err(HarvestError::StoreUnreadable(err.to_string()));
            }
        };
        reader
            .deserialize::<LogRow>()
            .map(|row| row.map_err(|err| HarvestError::StoreUnreadable(err.to_string())))
            .collect()
    }

    fn lock_writer(&self) -> Result<MutexGuard<'_, Option<ArchiveIndex>>, HarvestError> {
        self.writer
            .lock()
            .map_err(|_| HarvestError::Archive("archive writer poisoned".to_string()))
    }

    fn load_index(&self) -> Result<ArchiveIndex, HarvestError> {
        Ok(ArchiveIndex {
            archived: zip_entry_names(self.archive.as_std_path())?,
            logged: self
                .read_log()?
                .into_iter()
                .map(|row| row.filename)
                .collect(),
        })
    }

    fn append_row(&self, row: &LogRow) -> Result<(), HarvestError> {
        if let Some(parent) = self.log.parent().filter(|parent| !parent.as_str().is_empty()) {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        }
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log.as_std_path())
            .map_err(|err| HarvestError::Csv(err.to_string()))?;
        let is_new = file
            .metadata()
            .map(|meta| meta.len() == 0)
            .map_err(|err| HarvestError::Csv(err.to_string()))?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(is_new)
            .from_writer(file);
        writer
            .serialize(row)
            .map_err(|err| HarvestError::Csv(err.to_string()))?;
        writer
            .flush()
            .map_err(|err| HarvestError::Csv(err.to_string()))
    }
}

impl OutputStore for ArchiveStore {
    fn staging_dir(&self) -> &Utf8Path {
        &self.staging
    }

    fn ensure_layout(&self) -> Result<(), HarvestError> {
        fs::create_dir_all(self.staging.as_std_path())
            .map_err(|err| HarvestError::StoreUnreadable(err.to_string()))
    }

    fn scan(&self) -> Result<HashSet<DedupKey>, HarvestError> {
        let keys = self
            .read_log()?
            .iter()
            .filter_map(|row| DedupKey::from_filename(&row.filename))
            .collect();
        // The files may have changed since the last attempt.
        *self.lock_writer()? = None;
        Ok(keys)
    }

    fn persist(&self, _task: &TagTask, asset: StagedAsset) -> Result<String, HarvestError> {
        let name = asset.key.as_str().to_string();
        let location = format!("{}:{}", self.archive, asset.key);
        let mut guard = self.lock_writer()?;
        let index = match guard.take() {
            Some(index) => index,
            None => self.load_index()?,
        };
        let index = guard.insert(index);

        if index.logged.contains(&name) {
            debug!(key = %asset.key, "already logged");
            return Ok(location);
        }
        // A previous run may have archived the entry and died before logging it.
        if !index.archived.contains(&name) {
            let content = fs::read(asset.file.path())
                .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
            append_zip_entry(self.archive.as_std_path(), &name, &content)?;
            index.archived.insert(name.clone());
        }
        self.append_row(&LogRow {
            filename: name.clone(),
            tags: asset.tag_payload,
        })?;
        index.logged.insert(name);
        Ok(location)
    }
}

pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), HarvestError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
    }
    let file_name = path
        .file_name()
        .ok_or_else(|| HarvestError::Filesystem(format!("invalid path {path}")))?;
    let tmp_path = path.with_file_name(format!(".{file_name}.tmp"));
    fs::write(tmp_path.as_std_path(), content)
        .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
    fs::rename(tmp_path.as_std_path(), path.as_std_path())
        .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn staged(store: &dyn OutputStore, key: &str, body: &[u8], tags: &str) -> StagedAsset {
        let mut file = tempfile::Builder::new()
            .prefix(".harvest-")
            .tempfile_in(store.staging_dir().as_std_path())
            .unwrap();
        file.write_all(body).unwrap();
        StagedAsset {
            file,
            key: DedupKey::from_filename(key).unwrap(),
            tag_payload: tags.to_string(),
        }
    }

    #[test]
    fn folder_layout_paths() {
        let store = FolderStore::new(Utf8PathBuf::from("out"));
        let task = TagTask::new(1, "red hair");
        assert!(store.tag_dir(&task).ends_with("out/red_hair"));
        assert!(store.staging_dir().ends_with("out/.staging"));
    }

    #[test]
    fn folder_persist_writes_asset_and_sidecar() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().join("out")).unwrap();
        let store = FolderStore::new(root.clone());
        store.ensure_layout().unwrap();
        let task = TagTask::new(1, "red hair");

        store
            .persist(&task, staged(&store, "abc.jpg", b"jpeg", "a,b"))
            .unwrap();

        let dir = root.join("red_hair");
        assert_eq!(fs::read(dir.join("abc.jpg")).unwrap(), b"jpeg");
        assert_eq!(fs::read_to_string(dir.join("abc.txt")).unwrap(), "a,b");
        let keys = store.scan().unwrap();
        assert!(keys.contains(&DedupKey::from_filename("abc.jpg").unwrap()));
    }

    #[test]
    fn folder_scan_ignores_orphans_and_staging() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let store = FolderStore::new(root.clone());
        store.ensure_layout().unwrap();
        fs::create_dir_all(root.join("tag").as_std_path()).unwrap();
        fs::write(root.join("tag/orphan.png").as_std_path(), b"x").unwrap();
        fs::write(root.join("tag/lonely.txt").as_std_path(), b"x").unwrap();
        fs::write(root.join(".staging/.harvest-1.jpg").as_std_path(), b"x").unwrap();

        assert!(store.scan().unwrap().is_empty());
    }

    #[test]
    fn archive_header_written_once() {
        let temp = tempfile::tempdir().unwrap();
        let base = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let store = ArchiveStore::new(
            base.join("images.zip"),
            base.join("train.csv"),
            base.join("images"),
        );
        store.ensure_layout().unwrap();
        let task = TagTask::new(1, "q");

        store.persist(&task, staged(&store, "a.jpg", b"1", "x,y")).unwrap();
        let reopened = ArchiveStore::new(
            base.join("images.zip"),
            base.join("train.csv"),
            base.join("images"),
        );
        reopened.persist(&task, staged(&reopened, "b.jpg", b"2", "z")).unwrap();

        let log = fs::read_to_string(base.join("train.csv").as_std_path()).unwrap();
        assert_eq!(log.matches("filename,tags").count(), 1);
        assert_eq!(reopened.read_log().unwrap().len(), 2);
        assert_eq!(reopened.scan().unwrap().len(), 2);
        assert_eq!(zip_entry_names(base.join("images.zip").as_std_path()).unwrap().len(), 2);
    }

    #[test]
    fn archive_entry_without_row_is_not_duplicated() {
        let temp = tempfile::tempdir().unwrap();
        let base = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let store = ArchiveStore::new(
            base.join("images.zip"),
            base.join("train.csv"),
            base.join("images"),
        );
        store.ensure_layout().unwrap();
        append_zip_entry(base.join("images.zip").as_std_path(), "a.jpg", b"1").unwrap();
        assert!(store.scan().unwrap().is_empty());

        store
            .persist(&TagTask::new(1, "q"), staged(&store, "a.jpg", b"1", "t"))
            .unwrap();

        assert_eq!(zip_entry_names(base.join("images.zip").as_std_path()).unwrap().len(), 1);
        assert_eq!(store.scan().unwrap().len(), 1);
    }

    #[test]
    fn archive_persist_is_idempotent_per_key() {
        let temp = tempfile::tempdir().unwrap();
        let base = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let store = ArchiveStore::new(
            base.join("images.zip"),
            base.join("train.csv"),
            base.join("images"),
        );
        store.ensure_layout().unwrap();

        std::thread::scope(|scope| {
            for line in 1..=4 {
                let store = &store;
                scope.spawn(move || {
                    let asset = staged(store, "same.jpg", b"1", "t");
                    store.persist(&TagTask::new(line, "q"), asset).unwrap();
                });
            }
        });
        // A fresh scan reloads the index from disk.
        assert_eq!(store.scan().unwrap().len(), 1);
        store
            .persist(&TagTask::new(9, "q"), staged(&store, "same.jpg", b"1", "t"))
            .unwrap();

        assert_eq!(store.read_log().unwrap().len(), 1);
        assert_eq!(zip_entry_names(base.join("images.zip").as_std_path()).unwrap().len(), 1);
    }
}
