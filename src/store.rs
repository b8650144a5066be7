use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Datelike;

use crate::config::BackupSchedule;
use crate::error::StoreError;
use crate::models::{new_task_id, BackupInfo, Task, TaskInput, Timestamp};
use crate::storage::Storage;
use crate::validation::apply_input;

/// The live record set and the file behind it.
///
/// Every mutation runs under one lock: build the next set, write it atomically, and only
/// then swap it into memory. A failed write leaves both the file and memory as they were.
#[derive(Clone)]
pub struct TaskStore {
    inner: Arc<Mutex<StoreData>>,
}

#[derive(Debug)]
struct StoreData {
    tasks: Vec<Task>,
    storage: Storage,
    schedule: BackupSchedule,
}

impl TaskStore {
    pub fn open(storage: Storage, schedule: BackupSchedule) -> Result<Self, StoreError> {
        storage.ensure_dirs()?;
        let tasks = storage.load_tasks()?;
        log::info!(
            "store opened path={} tasks={}",
            storage.tasks_path().display(),
            tasks.len()
        );
        Ok(Self {
            inner: Arc::new(Mutex::new(StoreData {
                tasks,
                storage,
                schedule,
            })),
        })
    }

    fn lock(&self) -> MutexGuard<'_, StoreData> {
        self.inner.lock().expect("state poisoned")
    }

    pub fn storage(&self) -> Storage {
        self.lock().storage.clone()
    }

    /// Snapshot of every record in file order.
    pub fn tasks(&self) -> Vec<Task> {
        self.lock().tasks.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, id: &str) -> Result<Task, StoreError> {
        self.lock()
            .tasks
            .iter()
            .find(|task| task.id == id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("task {id}")))
    }

    pub fn create(&self, input: &TaskInput, now: Timestamp) -> Result<Task, StoreError> {
        let mut task = Task::blank(new_task_id(), now);
        if let Err(errors) = apply_input(&mut task, input, now) {
            log::warn!("create rejected: {errors}");
            return Err(errors.into());
        }
        let (created, _) = self.transact(now, false, |tasks| {
            let mut next = tasks.to_vec();
            next.push(task.clone());
            Ok((next, task))
        })?;
        log::info!("task created id={}", created.id);
        Ok(created)
    }

    /// Applies `input` to an existing record; `id` and `created_date` never change.
    pub fn update(&self, id: &str, input: &TaskInput, now: Timestamp) -> Result<Task, StoreError> {
        let (updated, _) = self.transact(now, false, |tasks| {
            let mut next = tasks.to_vec();
            let task = next
                .iter_mut()
                .find(|task| task.id == id)
                .ok_or_else(|| StoreError::NotFound(format!("task {id}")))?;
            if let Err(errors) = apply_input(task, input, now) {
                log::warn!("update rejected id={id}: {errors}");
                return Err(errors.into());
            }
            let updated = task.clone();
            Ok((next, updated))
        })?;
        log::info!("task updated id={id}");
        Ok(updated)
    }

    pub fn delete(&self, id: &str, now: Timestamp) -> Result<Task, StoreError> {
        let (removed, _) = self.transact(now, false, |tasks| {
            let index = tasks
                .iter()
                .position(|task| task.id == id)
                .ok_or_else(|| StoreError::NotFound(format!("task {id}")))?;
            let mut next = tasks.to_vec();
            let removed = next.remove(index);
            Ok((next, removed))
        })?;
        log::info!("task deleted id={id}");
        Ok(removed)
    }

    /// Runs one read-modify-write cycle under the lock.
    ///
    /// `build` sees the current set and returns the next one; nothing is written when it
    /// fails. With `safety_backup` the canonical file is copied into `backups/` first and
    /// the backup path is returned; otherwise the scheduled backup runs when due.
    pub fn transact<R>(
        &self,
        now: Timestamp,
        safety_backup: bool,
        build: impl FnOnce(&[Task]) -> Result<(Vec<Task>, R), StoreError>,
    ) -> Result<(R, Option<PathBuf>), StoreError> {
        let mut data = self.lock();
        let (next, result) = build(&data.tasks)?;
        let backup = if safety_backup {
            Some(data.storage.create_backup(now)?)
        } else {
            data.scheduled_backup(now)?
        };
        if let Err(err) = data.storage.save_tasks(&next) {
            log::error!("save failed path={}: {err}", data.storage.tasks_path().display());
            return Err(err);
        }
        data.tasks = next;
        Ok((result, backup))
    }

    pub fn create_backup(&self, now: Timestamp) -> Result<PathBuf, StoreError> {
        self.lock().storage.create_backup(now)
    }

    pub fn list_backups(&self) -> Result<Vec<BackupInfo>, StoreError> {
        self.lock().storage.list_backups()
    }

    pub fn delete_backup(&self, raw: &str) -> Result<bool, StoreError> {
        self.lock().storage.delete_backup(raw)
    }

    /// Replaces the record set with a backup's content.
    ///
    /// The backup must parse cleanly before anything is touched. The current file is then
    /// backed up and the backup's bytes are written over it atomically.
    pub fn restore_backup(&self, raw: &str, now: Timestamp) -> Result<Vec<Task>, StoreError> {
        let mut data = self.lock();
        let (bytes, tasks) = data.storage.read_backup(raw)?;
        let safety = data.storage.create_backup(now)?;
        let target = data.storage.tasks_path();
        data.storage.write_atomic(&target, &bytes)?;
        data.tasks = tasks.clone();
        log::info!(
            "backup restored source={raw} tasks={} safety_backup={}",
            tasks.len(),
            safety.display()
        );
        Ok(tasks)
    }

    /// Re-reads the canonical file, replacing memory only when it parses.
    pub fn reload(&self) -> Result<usize, StoreError> {
        let mut data = self.lock();
        let tasks = data.storage.load_tasks()?;
        data.tasks = tasks;
        Ok(data.tasks.len())
    }

    /// Final flush of the in-memory set.
    pub fn close(&self) -> Result<(), StoreError> {
        let data = self.lock();
        data.storage.save_tasks(&data.tasks)?;
        log::info!("store closed tasks={}", data.tasks.len());
        Ok(())
    }
}

impl StoreData {
    fn scheduled_backup(&self, now: Timestamp) -> Result<Option<PathBuf>, StoreError> {
        if self.schedule == BackupSchedule::None || !self.storage.tasks_path().exists() {
            return Ok(None);
        }
        let last = self.storage.latest_backup_at()?;
        if !is_backup_due(self.schedule, last, now) {
            return Ok(None);
        }
        let path = self.storage.create_backup(now)?;
        log::info!("scheduled backup schedule={:?} path={}", self.schedule, path.display());
        Ok(Some(path))
    }
}

pub fn is_backup_due(schedule: BackupSchedule, last: Option<Timestamp>, now: Timestamp) -> bool {
    match schedule {
        BackupSchedule::None => false,
        BackupSchedule::Daily => is_new_day(last, now),
        BackupSchedule::Weekly => is_new_week(last, now),
        BackupSchedule::Monthly => is_new_month(last, now),
    }
}

fn is_new_day(last: Option<Timestamp>, now: Timestamp) -> bool {
    match last {
        None => true,
        Some(last) => last.date() != now.date(),
    }
}

fn is_new_week(last: Option<Timestamp>, now: Timestamp) -> bool {
    match last {
        None => true,
        Some(last) => last.iso_week() != now.iso_week(),
    }
}

fn is_new_month(last: Option<Timestamp>, now: Timestamp) -> bool {
    match last {
        None => true,
        Some(last) => (last.year(), last.month()) != (now.year(), now.month()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Priority, Status};
    use chrono::NaiveDateTime;
    use std::fs;

    fn ts(raw: &str) -> Timestamp {
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    fn now() -> Timestamp {
        ts("2024-03-01 09:00:00")
    }

    fn open(schedule: BackupSchedule) -> (tempfile::TempDir, TaskStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::open(Storage::new(dir.path().to_path_buf()), schedule).unwrap();
        (dir, store)
    }

    fn titled(title: &str) -> TaskInput {
        TaskInput::titled(title)
    }

    #[test]
    fn create_fills_defaults_and_persists() {
        let (dir, store) = open(BackupSchedule::None);
        let mut input = titled("Write report");
        input.priority = Some("High".into());
        let task = store.create(&input, now()).unwrap();

        assert_eq!(task.task, "Write report");
        assert_eq!(task.priority, Priority::High);
        assert_eq!(task.status, Status::NotStarted);
        assert_eq!(task.created_date, now());
        assert_eq!(task.completion_date, None);
        assert!(uuid::Uuid::parse_str(&task.id).is_ok());

        let reopened =
            TaskStore::open(Storage::new(dir.path().to_path_buf()), BackupSchedule::None).unwrap();
        assert_eq!(reopened.tasks(), vec![task]);
    }

    #[test]
    fn rejected_create_writes_nothing() {
        let (_dir, store) = open(BackupSchedule::None);
        let before = fs::read(store.storage().tasks_path()).unwrap();
        let err = store.create(&TaskInput::default(), now()).unwrap_err();
        assert!(matches!(err, StoreError::Validation(ref errors) if errors.has_field("task")));
        assert!(store.is_empty());
        assert_eq!(fs::read(store.storage().tasks_path()).unwrap(), before);
    }

    #[test]
    fn update_keeps_identity_and_validates() {
        let (_dir, store) = open(BackupSchedule::None);
        let task = store.create(&titled("First"), now()).unwrap();

        let mut input = TaskInput::default();
        input.status = Some("Completed".into());
        let later = ts("2024-03-02 10:00:00");
        let updated = store.update(&task.id, &input, later).unwrap();
        assert_eq!(updated.id, task.id);
        assert_eq!(updated.created_date, task.created_date);
        assert_eq!(updated.status, Status::Completed);
        assert_eq!(updated.completion_date, Some(later));

        let mut bad = TaskInput::default();
        bad.priority = Some("Urgent".into());
        assert!(matches!(
            store.update(&task.id, &bad, later),
            Err(StoreError::Validation(_))
        ));
        assert_eq!(store.get(&task.id).unwrap(), updated);

        assert!(matches!(
            store.update("missing", &input, later),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn deleting_unknown_id_leaves_file_byte_identical() {
        let (_dir, store) = open(BackupSchedule::None);
        store.create(&titled("Keep me"), now()).unwrap();
        let path = store.storage().tasks_path();
        let before = fs::read(&path).unwrap();

        assert!(matches!(
            store.delete("no-such-id", now()),
            Err(StoreError::NotFound(_))
        ));
        assert_eq!(fs::read(&path).unwrap(), before);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn delete_removes_record_from_file_and_memory() {
        let (_dir, store) = open(BackupSchedule::None);
        let a = store.create(&titled("A"), now()).unwrap();
        let b = store.create(&titled("B"), now()).unwrap();
        let removed = store.delete(&a.id, now()).unwrap();
        assert_eq!(removed.id, a.id);
        assert_eq!(store.tasks(), vec![b.clone()]);
        assert_eq!(store.storage().load_tasks().unwrap(), vec![b]);
    }

    #[test]
    fn failed_save_keeps_previous_memory() {
        let (_dir, store) = open(BackupSchedule::None);
        store.create(&titled("A"), now()).unwrap();
        let path = store.storage().tasks_path();
        fs::remove_file(&path).unwrap();
        fs::create_dir_all(path.join("blocker")).unwrap();

        assert!(store.create(&titled("B"), now()).is_err());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn open_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("tasks.csv"), "nope\n").unwrap();
        let result = TaskStore::open(Storage::new(dir.path().to_path_buf()), BackupSchedule::None);
        assert!(matches!(result, Err(StoreError::Corrupt { .. })));
    }

    #[test]
    fn restore_is_idempotent_and_takes_a_safety_backup() {
        let (_dir, store) = open(BackupSchedule::None);
        store.create(&titled("A"), now()).unwrap();
        store.create(&titled("B"), now()).unwrap();
        let backup = store.create_backup(ts("2024-03-01 10:00:00")).unwrap();
        let snapshot = store.tasks();

        store.create(&titled("C"), now()).unwrap();
        let name = backup.file_name().unwrap().to_str().unwrap().to_string();

        let first = store.restore_backup(&name, ts("2024-03-01 11:00:00")).unwrap();
        let second = store.restore_backup(&name, ts("2024-03-01 12:00:00")).unwrap();
        assert_eq!(first, snapshot);
        assert_eq!(second, snapshot);
        assert_eq!(store.tasks(), snapshot);
        assert_eq!(fs::read(store.storage().tasks_path()).unwrap(), fs::read(&backup).unwrap());

        // One manual backup plus one safety backup per restore.
        assert_eq!(store.list_backups().unwrap().len(), 3);
    }

    #[test]
    fn restore_of_missing_or_corrupt_backup_changes_nothing() {
        let (_dir, store) = open(BackupSchedule::None);
        store.create(&titled("A"), now()).unwrap();
        let path = store.storage().tasks_path();
        let before = fs::read(&path).unwrap();

        assert!(matches!(
            store.restore_backup("tasks_backup_missing.csv", now()),
            Err(StoreError::NotFound(_))
        ));
        fs::write(
            store.storage().backups_dir().join("tasks_backup_bad.csv"),
            "garbage\n",
        )
        .unwrap();
        assert!(matches!(
            store.restore_backup("tasks_backup_bad.csv", now()),
            Err(StoreError::Corrupt { .. })
        ));
        assert!(matches!(
            store.restore_backup("../tasks.csv", now()),
            Err(StoreError::InvalidBackupPath(_))
        ));
        assert_eq!(fs::read(&path).unwrap(), before);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn scheduled_backup_runs_once_per_period() {
        let (_dir, store) = open(BackupSchedule::Daily);
        store.create(&titled("A"), ts("2024-03-01 09:00:00")).unwrap();
        assert_eq!(store.list_backups().unwrap().len(), 1);

        store.create(&titled("B"), ts("2024-03-01 18:00:00")).unwrap();
        assert_eq!(store.list_backups().unwrap().len(), 1);

        store.create(&titled("C"), ts("2024-03-02 08:00:00")).unwrap();
        assert_eq!(store.list_backups().unwrap().len(), 2);
    }

    #[test]
    fn no_schedule_means_no_automatic_backups() {
        let (_dir, store) = open(BackupSchedule::None);
        store.create(&titled("A"), now()).unwrap();
        assert!(store.list_backups().unwrap().is_empty());
    }

    #[test]
    fn transact_with_safety_backup_returns_its_path() {
        let (_dir, store) = open(BackupSchedule::None);
        let (count, backup) = store
            .transact(now(), true, |tasks| Ok((tasks.to_vec(), tasks.len())))
            .unwrap();
        assert_eq!(count, 0);
        assert!(backup.expect("safety backup").is_file());
    }

    #[test]
    fn reload_and_close_sync_memory_with_disk() {
        let (_dir, store) = open(BackupSchedule::None);
        let task = store.create(&titled("A"), now()).unwrap();
        let path = store.storage().tasks_path();

        fs::remove_file(&path).unwrap();
        store.close().unwrap();
        assert_eq!(store.storage().load_tasks().unwrap(), vec![task]);

        store.storage().save_tasks(&[]).unwrap();
        assert_eq!(store.reload().unwrap(), 0);
        assert!(store.is_empty());
    }

    #[test]
    fn backup_due_predicates_cover_all_schedules() {
        let now = ts("2024-01-02 12:00:00");
        let yesterday = ts("2024-01-01 12:00:00");

        assert!(!is_backup_due(BackupSchedule::None, None, now));

        assert!(is_backup_due(BackupSchedule::Daily, None, now));
        assert!(is_backup_due(BackupSchedule::Daily, Some(yesterday), now));
        assert!(!is_backup_due(BackupSchedule::Daily, Some(now), now));

        let week_start = ts("2024-01-01 12:00:00");
        let same_week = ts("2024-01-02 12:00:00");
        let next_week = ts("2024-01-08 12:00:00");
        assert!(is_backup_due(BackupSchedule::Weekly, None, now));
        assert!(!is_backup_due(BackupSchedule::Weekly, Some(week_start), same_week));
        assert!(is_backup_due(BackupSchedule::Weekly, Some(week_start), next_week));

        let month_start = ts("2024-01-15 12:00:00");
        let same_month = ts("2024-01-20 12:00:00");
        let next_month = ts("2024-02-01 12:00:00");
        assert!(is_backup_due(BackupSchedule::Monthly, None, now));
        assert!(!is_backup_due(BackupSchedule::Monthly, Some(month_start), same_month));
        assert!(is_backup_due(BackupSchedule::Monthly, Some(month_start), next_month));
    }
}
