//! CLI entry point for local maintenance.
//!
//! # Responsibility
//! - Verify `unithub_core` linkage with deterministic output.
//! - Run the ordering repair pass against a database file.
//!
//! Usage: `unithub_cli [fix-ordering [DB_PATH]]`. Without a path the
//! database comes from `UNITHUB_DB` or the default file name.

use log::error;
use std::process::ExitCode;
use unithub_core::config::CoreConfig;
use unithub_core::{
    init_logging_from, open_db_with, retry_on_conflict, OrderingRepository,
    SqliteOrderingRepository, ORDERED_TABLES,
};

fn main() -> ExitCode {
    println!("unithub_core ping={}", unithub_core::ping());
    println!("unithub_core version={}", unithub_core::core_version());

    let mut args = std::env::args().skip(1);
    match args.next().as_deref() {
        None => ExitCode::SUCCESS,
        Some("fix-ordering") => {
            let mut config = CoreConfig::from_env();
            if let Some(path) = args.next() {
                config.database_path = path.into();
            }
            match fix_ordering(&config) {
                Ok(rows) => {
                    println!("fix-ordering rows_written={rows}");
                    ExitCode::SUCCESS
                }
                Err(message) => {
                    error!("event=cli_fix_ordering module=cli status=error error={message}");
                    eprintln!("fix-ordering failed: {message}");
                    ExitCode::FAILURE
                }
            }
        }
        Some(other) => {
            eprintln!("unknown command `{other}`; expected `fix-ordering [DB_PATH]`");
            ExitCode::from(2)
        }
    }
}

fn fix_ordering(config: &CoreConfig) -> Result<usize, String> {
    // Logging failure must not block maintenance.
    if let Err(err) = init_logging_from(config) {
        eprintln!("logging disabled: {err}");
    }

    let conn = open_db_with(config).map_err(|err| err.to_string())?;
    let repo = SqliteOrderingRepository::try_new(&conn).map_err(|err| err.to_string())?;
    let mut total = 0;
    for table in ORDERED_TABLES {
        total += retry_on_conflict(config.conflict_retry_attempts, || {
            repo.fix_ordering(*table, None)
        })
        .map_err(|err| err.to_string())?;
    }
    Ok(total)
}
