//! Logger setup for console verbs and managed-service mode.

use std::fs::OpenOptions;
use std::io::Write;

use log::LevelFilter;

use crate::config::LogSettings;

fn builder(level: LevelFilter) -> env_logger::Builder {
    let mut builder = env_logger::Builder::new();
    builder
        .filter_level(level)
        .parse_default_env()
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {} {}:{}] {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f %z"),
                record.level(),
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.args()
            )
        });
    builder
}

/// Logs to stderr. `RUST_LOG` overrides `level`.
pub fn init_stderr(level: LevelFilter) {
    if let Err(e) = builder(level).try_init() {
        eprintln!("failed to set logger: {e}");
    }
}

/// Logs to the configured file, or to stderr at info level without one.
///
/// A log file that cannot be opened is reported on stderr and replaced by stderr logging.
pub fn init_service(settings: Option<&LogSettings>) {
    let Some(settings) = settings else {
        init_stderr(LevelFilter::Info);
        return;
    };

    let file = match OpenOptions::new().create(true).append(true).open(&settings.path) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("failed to open log file {}: {e}", settings.path.display());
            init_stderr(LevelFilter::Info);
            return;
        }
    };

    let mut builder = builder(settings.level);
    builder.target(env_logger::Target::Pipe(Box::new(file)));
    if let Err(e) = builder.try_init() {
        eprintln!("failed to set logger: {e}");
    }
}
