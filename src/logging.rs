use std::io::Write;

use chrono::Local;
use env_logger::{Builder, Env};
use log::{Level, Record, SetLoggerError};

/// Installs the process logger at `level`. A `RUST_LOG` setting overrides it.
pub fn init(level: Level) -> Result<(), SetLoggerError> {
    let level_filter = level.to_level_filter();

    Builder::new()
        .filter_level(level_filter)
        .parse_env(Env::default())
        .format(|buf, record| writeln!(buf, "{}", format_record(record, &Local::now().to_rfc3339())))
        .try_init()
}

fn format_record(record: &Record, timestamp: &str) -> String {
    format!(
        "[{} {} {}] {}",
        timestamp,
        record.level(),
        record.target(),
        record.args()
    )
}
