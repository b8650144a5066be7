use std::fs;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};

use chrono::NaiveDateTime;
use tempfile::NamedTempFile;

use crate::codec::{decode_tasks, encode_tasks};
use crate::error::StoreError;
use crate::models::{BackupInfo, Task, Timestamp};

pub const TASKS_FILE: &str = "tasks.csv";
pub const BACKUP_DIR: &str = "backups";
const BACKUP_PREFIX: &str = "tasks_backup_";
const BACKUP_SUFFIX: &str = ".csv";
const BACKUP_STAMP_FORMAT: &str = "%Y%m%d_%H%M%S_%3f";

/// On-disk layout: the canonical record file plus a `backups/` directory next to it.
#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
    tasks_file: String,
}

struct BackupEntry {
    path: PathBuf,
    file_name: String,
    created_at: Option<Timestamp>,
    sequence: u32,
    size: u64,
}

/// A fully written and synced temp file that has not replaced the canonical file yet.
/// Dropping it discards the write.
pub struct StagedWrite {
    temp: NamedTempFile,
    target: PathBuf,
}

impl StagedWrite {
    pub fn temp_path(&self) -> &Path {
        self.temp.path()
    }

    pub fn commit(self) -> Result<(), StoreError> {
        self.temp
            .persist(&self.target)
            .map_err(|err| StoreError::Io(err.error))?;
        Ok(())
    }
}

impl Storage {
    pub fn new(root: PathBuf) -> Self {
        Self::with_file_name(root, TASKS_FILE)
    }

    pub fn with_file_name(root: PathBuf, tasks_file: &str) -> Self {
        Self {
            root,
            tasks_file: tasks_file.to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn tasks_path(&self) -> PathBuf {
        self.root.join(&self.tasks_file)
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.root.join(BACKUP_DIR)
    }

    pub fn ensure_dirs(&self) -> Result<(), StoreError> {
        fs::create_dir_all(self.backups_dir())?;
        Ok(())
    }

    /// Reads the canonical file, creating a header-only file when none exists yet.
    pub fn load_tasks(&self) -> Result<Vec<Task>, StoreError> {
        let path = self.tasks_path();
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                log::info!("no record file at {}, creating an empty one", path.display());
                self.save_tasks(&[])?;
                return Ok(Vec::new());
            }
            Err(err) => return Err(err.into()),
        };
        decode_tasks(&bytes, &path)
    }

    pub fn save_tasks(&self, tasks: &[Task]) -> Result<(), StoreError> {
        self.stage_tasks(tasks)?.commit()
    }

    pub fn stage_tasks(&self, tasks: &[Task]) -> Result<StagedWrite, StoreError> {
        let bytes = encode_tasks(tasks)?;
        self.stage_bytes(&self.tasks_path(), &bytes)
    }

    pub fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
        self.stage_bytes(path, bytes)?.commit()
    }

    fn stage_bytes(&self, path: &Path, bytes: &[u8]) -> Result<StagedWrite, StoreError> {
        let dir = path.parent().unwrap_or(&self.root);
        fs::create_dir_all(dir)?;
        let mut temp = NamedTempFile::new_in(dir)?;
        temp.write_all(bytes)?;
        temp.as_file().sync_all()?;
        Ok(StagedWrite {
            temp,
            target: path.to_path_buf(),
        })
    }

    /// Copies the canonical file into `backups/` under a timestamped name.
    pub fn create_backup(&self, now: Timestamp) -> Result<PathBuf, StoreError> {
        self.ensure_dirs()?;
        let stamp = now.format(BACKUP_STAMP_FORMAT).to_string();
        let mut backup_path = self
            .backups_dir()
            .join(format!("{BACKUP_PREFIX}{stamp}{BACKUP_SUFFIX}"));
        let mut attempt = 1;
        while backup_path.exists() {
            backup_path = self
                .backups_dir()
                .join(format!("{BACKUP_PREFIX}{stamp}-{attempt}{BACKUP_SUFFIX}"));
            attempt += 1;
        }

        let source = self.tasks_path();
        if source.exists() {
            fs::copy(&source, &backup_path)?;
        } else {
            fs::write(&backup_path, encode_tasks(&[])?)?;
        }
        log::info!("backup created path={}", backup_path.display());
        Ok(backup_path)
    }

    /// Backups newest first. A missing backups directory is an empty list.
    pub fn list_backups(&self) -> Result<Vec<BackupInfo>, StoreError> {
        let mut results = Vec::new();
        for entry in self.scan_backups()? {
            let record_count = fs::read(&entry.path)
                .ok()
                .and_then(|bytes| decode_tasks(&bytes, &entry.path).ok())
                .map(|tasks| tasks.len());
            results.push(BackupInfo {
                path: entry.path,
                file_name: entry.file_name,
                created_at: entry.created_at,
                record_count,
                size: entry.size,
            });
        }
        Ok(results)
    }

    /// Newest backup time from file names (or mtime), without reading any backup.
    pub fn latest_backup_at(&self) -> Result<Option<Timestamp>, StoreError> {
        Ok(self
            .scan_backups()?
            .into_iter()
            .filter_map(|entry| entry.created_at)
            .max())
    }

    /// Backup files sorted by `(created_at, collision suffix)`, newest first.
    fn scan_backups(&self) -> Result<Vec<BackupEntry>, StoreError> {
        let entries = match fs::read_dir(self.backups_dir()) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut results = Vec::new();
        for entry in entries.filter_map(|entry| entry.ok()) {
            let Some(file_name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if !is_backup_name(&file_name) {
                continue;
            }
            let metadata = entry.metadata()?;
            if !metadata.is_file() {
                continue;
            }
            let (created_at, sequence) = match backup_stamp(&file_name) {
                Some((stamp, sequence)) => (Some(stamp), sequence),
                None => (
                    metadata
                        .modified()
                        .ok()
                        .map(|time| chrono::DateTime::<chrono::Local>::from(time).naive_local()),
                    0,
                ),
            };
            results.push(BackupEntry {
                path: entry.path(),
                file_name,
                created_at,
                sequence,
                size: metadata.len(),
            });
        }
        results.sort_by(|a, b| {
            (b.created_at, b.sequence, &b.file_name).cmp(&(a.created_at, a.sequence, &a.file_name))
        });
        Ok(results)
    }

    /// Maps a caller-supplied backup reference (bare file name or path) to a path inside
    /// the backups directory.
    pub fn resolve_backup(&self, raw: &str) -> Result<PathBuf, StoreError> {
        let raw = raw.trim();
        let candidate = Path::new(raw);
        let file_name = candidate
            .file_name()
            .and_then(|name| name.to_str())
            .filter(|name| !name.is_empty())
            .ok_or_else(|| StoreError::InvalidBackupPath(raw.to_string()))?;
        if candidate
            .components()
            .any(|component| matches!(component, Component::ParentDir))
        {
            return Err(StoreError::InvalidBackupPath(raw.to_string()));
        }
        if let Some(parent) = candidate.parent().filter(|p| !p.as_os_str().is_empty()) {
            let backups_dir = self.backups_dir();
            let inside = parent == backups_dir.as_path()
                || parent == Path::new(BACKUP_DIR)
                || same_dir(parent, &backups_dir);
            if !inside {
                return Err(StoreError::InvalidBackupPath(raw.to_string()));
            }
        }
        Ok(self.backups_dir().join(file_name))
    }

    /// Raw bytes and decoded records of a backup.
    pub fn read_backup(&self, raw: &str) -> Result<(Vec<u8>, Vec<Task>), StoreError> {
        let path = self.resolve_backup(raw)?;
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(format!("backup {raw}")));
            }
            Err(err) => return Err(err.into()),
        };
        let tasks = decode_tasks(&bytes, &path)?;
        Ok((bytes, tasks))
    }

    /// Returns whether a file was removed; an absent backup is not an error.
    pub fn delete_backup(&self, raw: &str) -> Result<bool, StoreError> {
        let path = self.resolve_backup(raw)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                log::info!("backup deleted path={}", path.display());
                Ok(true)
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }
}

fn is_backup_name(name: &str) -> bool {
    name.starts_with(BACKUP_PREFIX) && name.ends_with(BACKUP_SUFFIX)
}

/// Timestamp and collision suffix (`-N`, 0 when absent) encoded in a backup name.
fn backup_stamp(name: &str) -> Option<(Timestamp, u32)> {
    let stem = name.strip_prefix(BACKUP_PREFIX)?.strip_suffix(BACKUP_SUFFIX)?;
    let (stamp, sequence) = match stem.split_once('-') {
        Some((stamp, sequence)) => (stamp, sequence.parse().ok()?),
        None => (stem, 0),
    };
    let stamp = NaiveDateTime::parse_from_str(stamp, BACKUP_STAMP_FORMAT).ok()?;
    Some((stamp, sequence))
}

fn same_dir(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Priority;

    fn ts(raw: &str) -> Timestamp {
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    fn make_task(id: &str) -> Task {
        let mut task = Task::blank(id, ts("2024-01-01 09:00:00"));
        task.task = format!("task-{id}");
        task
    }

    fn storage() -> (tempfile::TempDir, Storage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path().to_path_buf());
        storage.ensure_dirs().unwrap();
        (dir, storage)
    }

    #[test]
    fn load_creates_header_only_file_when_missing() {
        let (_dir, storage) = storage();
        assert!(storage.load_tasks().unwrap().is_empty());
        let text = fs::read_to_string(storage.tasks_path()).unwrap();
        assert!(text.starts_with("id,task,priority"));
    }

    #[test]
    fn save_then_load_returns_the_same_records() {
        let (_dir, storage) = storage();
        let mut b = make_task("b");
        b.priority = Priority::Low;
        storage.save_tasks(&[make_task("a"), b.clone()]).unwrap();
        let loaded = storage.load_tasks().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[1], b);
    }

    #[test]
    fn load_reports_corrupt_file() {
        let (_dir, storage) = storage();
        fs::write(storage.tasks_path(), "this is not,the header\n1,2\n").unwrap();
        assert!(matches!(
            storage.load_tasks().unwrap_err(),
            StoreError::Corrupt { .. }
        ));
    }

    #[test]
    fn aborted_write_leaves_canonical_file_untouched() {
        let (_dir, storage) = storage();
        storage.save_tasks(&[make_task("a")]).unwrap();
        let before = fs::read(storage.tasks_path()).unwrap();

        let staged = storage
            .stage_tasks(&[make_task("a"), make_task("b")])
            .unwrap();
        let temp_path = staged.temp_path().to_path_buf();
        assert!(temp_path.exists());
        assert_eq!(temp_path.parent(), storage.tasks_path().parent());
        drop(staged);

        assert_eq!(fs::read(storage.tasks_path()).unwrap(), before);
        assert!(!temp_path.exists());
    }

    #[test]
    fn failed_write_keeps_previous_file() {
        let (_dir, storage) = storage();
        storage.save_tasks(&[make_task("a")]).unwrap();
        let before = fs::read(storage.tasks_path()).unwrap();

        // A directory in the way of the target makes the final rename fail.
        let blocked = storage.root().join("blocked.csv");
        fs::create_dir_all(blocked.join("inner")).unwrap();
        assert!(storage.write_atomic(&blocked, b"x").is_err());
        assert_eq!(fs::read(storage.tasks_path()).unwrap(), before);
    }

    #[test]
    fn create_backup_copies_file_and_never_overwrites() {
        let (_dir, storage) = storage();
        storage.save_tasks(&[make_task("a")]).unwrap();
        let now = ts("2024-02-03 04:05:06");

        let first = storage.create_backup(now).unwrap();
        let second = storage.create_backup(now).unwrap();
        assert_ne!(first, second);
        assert_eq!(
            first.file_name().unwrap().to_str().unwrap(),
            "tasks_backup_20240203_040506_000.csv"
        );
        assert_eq!(fs::read(&first).unwrap(), fs::read(storage.tasks_path()).unwrap());

        let list = storage.list_backups().unwrap();
        assert_eq!(list.len(), 2);
        assert!(list.iter().all(|b| b.record_count == Some(1)));
        assert!(list.iter().all(|b| b.created_at == Some(now)));
    }

    #[test]
    fn create_backup_without_canonical_file_writes_header_only() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path().to_path_buf());
        let path = storage.create_backup(ts("2024-02-03 04:05:06")).unwrap();
        let (_, tasks) = storage
            .read_backup(path.file_name().unwrap().to_str().unwrap())
            .unwrap();
        assert!(tasks.is_empty());
    }

    #[test]
    fn list_backups_is_newest_first_and_skips_foreign_files() {
        let (_dir, storage) = storage();
        storage.save_tasks(&[]).unwrap();
        storage.create_backup(ts("2024-01-01 00:00:00")).unwrap();
        storage.create_backup(ts("2024-03-01 00:00:00")).unwrap();
        storage.create_backup(ts("2024-02-01 00:00:00")).unwrap();
        fs::write(storage.backups_dir().join("notes.txt"), "x").unwrap();
        fs::write(
            storage.backups_dir().join("tasks_backup_broken.csv"),
            "garbage\n\"unterminated",
        )
        .unwrap();

        let list = storage.list_backups().unwrap();
        let names: Vec<_> = list.iter().map(|b| b.file_name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "tasks_backup_broken.csv",
                "tasks_backup_20240301_000000_000.csv",
                "tasks_backup_20240201_000000_000.csv",
                "tasks_backup_20240101_000000_000.csv",
            ]
        );
        assert_eq!(list[0].record_count, None);
        // The foreign-named file falls back to its modification time.
        assert!(storage.latest_backup_at().unwrap() >= Some(ts("2024-03-01 00:00:00")));
    }

    #[test]
    fn list_backups_orders_same_stamp_collisions_by_suffix() {
        let (_dir, storage) = storage();
        storage.save_tasks(&[]).unwrap();
        let now = ts("2024-02-03 04:05:06");
        let created: Vec<PathBuf> = (0..12).map(|_| storage.create_backup(now).unwrap()).collect();
        storage.create_backup(ts("2024-02-03 04:05:05")).unwrap();

        let list = storage.list_backups().unwrap();
        assert_eq!(list.len(), 13);
        assert_eq!(list[0].path, created[11]);
        assert_eq!(list[0].file_name, "tasks_backup_20240203_040506_000-11.csv");
        assert_eq!(list[1].file_name, "tasks_backup_20240203_040506_000-10.csv");
        assert_eq!(list[10].file_name, "tasks_backup_20240203_040506_000-1.csv");
        assert_eq!(list[11].path, created[0]);
        assert_eq!(list[12].file_name, "tasks_backup_20240203_040505_000.csv");
    }

    #[test]
    fn latest_backup_at_uses_names_without_reading_contents() {
        let (_dir, storage) = storage();
        storage.save_tasks(&[]).unwrap();
        storage.create_backup(ts("2024-01-01 00:00:00")).unwrap();
        fs::write(
            storage
                .backups_dir()
                .join("tasks_backup_20240501_000000_000.csv"),
            "garbage\n\"unterminated",
        )
        .unwrap();

        assert_eq!(
            storage.latest_backup_at().unwrap(),
            Some(ts("2024-05-01 00:00:00"))
        );
        let list = storage.list_backups().unwrap();
        assert_eq!(list[0].record_count, None);
        assert_eq!(list[1].record_count, Some(0));
    }

    #[test]
    fn list_backups_without_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path().to_path_buf());
        assert!(storage.list_backups().unwrap().is_empty());
        assert_eq!(storage.latest_backup_at().unwrap(), None);
    }

    #[test]
    fn resolve_backup_rejects_paths_outside_backups_dir() {
        let (_dir, storage) = storage();
        let inside = storage.backups_dir().join("tasks_backup_x.csv");
        assert_eq!(
            storage.resolve_backup("tasks_backup_x.csv").unwrap(),
            inside
        );
        assert_eq!(
            storage
                .resolve_backup("backups/tasks_backup_x.csv")
                .unwrap(),
            inside
        );
        assert_eq!(
            storage
                .resolve_backup(inside.to_str().unwrap())
                .unwrap(),
            inside
        );
        assert!(matches!(
            storage.resolve_backup("../tasks.csv"),
            Err(StoreError::InvalidBackupPath(_))
        ));
        assert!(matches!(
            storage.resolve_backup("/etc/passwd"),
            Err(StoreError::InvalidBackupPath(_))
        ));
        assert!(storage.resolve_backup("").is_err());
    }

    #[test]
    fn read_and_delete_backup_handle_missing_files() {
        let (_dir, storage) = storage();
        assert!(matches!(
            storage.read_backup("tasks_backup_missing.csv"),
            Err(StoreError::NotFound(_))
        ));

        storage.save_tasks(&[make_task("a")]).unwrap();
        let path = storage.create_backup(ts("2024-01-01 00:00:00")).unwrap();
        let name = path.file_name().unwrap().to_str().unwrap().to_string();
        assert!(storage.delete_backup(&name).unwrap());
        assert!(!path.exists());
        assert!(!storage.delete_backup(&name).unwrap());
    }
}
