use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tasktable::{logging, BackupSchedule, Config};

#[derive(Parser)]
#[command(
    name = "tasktable",
    about = "Single-user task tracker backed by a CSV file",
    version
)]
struct Cli {
    /// Directory holding the record file, backups/, logs/ and tasktable.json.
    #[arg(long = "data-dir", env = "TASKTABLE_DATA_DIR", default_value = "data")]
    data_dir: PathBuf,

    /// Address to listen on, e.g. 127.0.0.1:5000.
    #[arg(long, env = "TASKTABLE_BIND")]
    bind: Option<String>,

    #[arg(long, env = "TASKTABLE_BACKUP_SCHEDULE")]
    backup_schedule: Option<BackupSchedule>,

    /// Skip the safety backup normally taken before an import is written.
    #[arg(long)]
    no_import_backup: bool,
}

impl Cli {
    fn into_config(self) -> Result<Config, tasktable::config::ConfigError> {
        let mut config = Config::load(&self.data_dir)?;
        if let Some(bind) = self.bind {
            config.bind = bind;
        }
        if let Some(schedule) = self.backup_schedule {
            config.backup_schedule = schedule;
        }
        if self.no_import_backup {
            config.backup_before_import = false;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(err) = logging::init_logging(&cli.data_dir) {
        eprintln!("failed to initialize logging: {err}");
    }

    let config = match cli.into_config() {
        Ok(config) => config,
        Err(err) => {
            log::error!("config error: {err}");
            eprintln!("config error: {err}");
            return ExitCode::FAILURE;
        }
    };

    match tasktable::run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("fatal: {err}");
            eprintln!("tasktable: {err}");
            ExitCode::FAILURE
        }
    }
}
