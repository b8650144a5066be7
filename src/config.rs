use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::storage::{Storage, TASKS_FILE};

pub const CONFIG_FILE: &str = "tasktable.json";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid {CONFIG_FILE}: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_tasks_file")]
    pub tasks_file: String,
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default)]
    pub backup_schedule: BackupSchedule,
    #[serde(default = "default_backup_before_import")]
    pub backup_before_import: bool,
    /// How many row errors an import report carries in full.
    #[serde(default = "default_error_preview_limit")]
    pub error_preview_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            tasks_file: default_tasks_file(),
            bind: default_bind(),
            backup_schedule: BackupSchedule::default(),
            backup_before_import: default_backup_before_import(),
            error_preview_limit: default_error_preview_limit(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackupSchedule {
    #[default]
    None,
    Daily,
    Weekly,
    Monthly,
}

impl FromStr for BackupSchedule {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(BackupSchedule::None),
            "daily" => Ok(BackupSchedule::Daily),
            "weekly" => Ok(BackupSchedule::Weekly),
            "monthly" => Ok(BackupSchedule::Monthly),
            other => Err(format!("unknown backup schedule '{other}' (none, daily, weekly, monthly)")),
        }
    }
}

impl Config {
    /// Reads `tasktable.json` from `data_dir` when present. The directory the file was
    /// found in always wins over any `data_dir` written inside it.
    pub fn load(data_dir: &Path) -> Result<Self, ConfigError> {
        let path = data_dir.join(CONFIG_FILE);
        let mut config = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice::<Config>(&bytes)?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => Config::default(),
            Err(err) => return Err(err.into()),
        };
        config.data_dir = data_dir.to_path_buf();
        Ok(config)
    }

    pub fn storage(&self) -> Storage {
        Storage::with_file_name(self.data_dir.clone(), &self.tasks_file)
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_tasks_file() -> String {
    TASKS_FILE.to_string()
}

fn default_bind() -> String {
    "127.0.0.1:5000".to_string()
}

fn default_backup_before_import() -> bool {
    true
}

fn default_error_preview_limit() -> usize {
    10
}
