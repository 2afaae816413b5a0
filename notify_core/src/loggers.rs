//! # Process Logging
//!
//! Installs a `fern` dispatcher behind the `log` facade: one line per record
//! to stdout and to a timestamped file under the log directory. Only the most
//! recent previous log file for the same application is kept.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::LoggingError;

pub fn parse_level(log_level: &str) -> log::LevelFilter {
    match log_level.trim().to_lowercase().as_str() {
        "trace" => log::LevelFilter::Trace,
        "debug" => log::LevelFilter::Debug,
        "warn" => log::LevelFilter::Warn,
        "error" => log::LevelFilter::Error,
        "off" => log::LevelFilter::Off,
        _ => log::LevelFilter::Info,
    }
}

pub fn log_file_name(app_name: &str) -> String {
    format!("{}_{}.log", app_name, chrono::Local::now().format("%Y-%m-%d_%H-%M-%S"))
}

/// Installs the global logger. Fails if one is already installed.
pub fn setup_logging(log_dir: &Path, log_level: &str, app_name: &str) -> Result<PathBuf, LoggingError> {
    if !log_dir.exists() {
        fs::create_dir_all(log_dir)?;
    }

    cleanup_old_logs(log_dir, app_name)?;

    let log_path = log_dir.join(log_file_name(app_name));

    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}[{}][{}] {}",
                chrono::Local::now().format("[%Y-%m-%d %H:%M:%S]"),
                record.target(),
                record.level(),
                message
            ))
        })
        .level(parse_level(log_level))
        // lapin and its executor are chatty at debug level.
        .level_for("lapin", log::LevelFilter::Warn)
        .level_for("async_io", log::LevelFilter::Warn)
        .level_for("polling", log::LevelFilter::Warn)
        .chain(std::io::stdout())
        .chain(fern::log_file(&log_path)?)
        .apply()?;

    Ok(log_path)
}

/// Deletes all but the newest `<app_name>_*.log` file in `log_dir`.
pub fn cleanup_old_logs(log_dir: &Path, app_name: &str) -> Result<usize, LoggingError> {
    let prefix = format!("{}_", app_name);
    let mut entries: Vec<(std::time::SystemTime, PathBuf)> = fs::read_dir(log_dir)?
        .filter_map(|res| res.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "log"))
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(&prefix))
        })
        .filter_map(|p| {
            let modified = fs::metadata(&p).and_then(|m| m.modified()).ok()?;
            Some((modified, p))
        })
        .collect();

    // Newest first
    entries.sort_by(|a, b| b.cmp(a));

    let mut removed = 0;
    for (_, path) in entries.iter().skip(1) {
        match fs::remove_file(path) {
            Ok(()) => removed += 1,
            Err(e) => eprintln!("Failed to delete old log file {:?}: {}", path, e),
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};

    #[test]
    fn parses_levels_with_info_fallback() {
        assert_eq!(parse_level("DEBUG"), log::LevelFilter::Debug);
        assert_eq!(parse_level("warn"), log::LevelFilter::Warn);
        assert_eq!(parse_level("fatal"), log::LevelFilter::Info);
    }

    #[test]
    fn file_name_carries_app_name() {
        let name = log_file_name("notify_gateway");
        assert!(name.starts_with("notify_gateway_"));
        assert!(name.ends_with(".log"));
    }

    #[test]
    fn cleanup_keeps_newest_log_of_the_app_only() {
        let dir = tempfile::tempdir().unwrap();
        let old = dir.path().join("gw_2024-01-01_00-00-00.log");
        let new = dir.path().join("gw_2024-01-02_00-00-00.log");
        let other = dir.path().join("other_2024-01-01_00-00-00.log");
        for p in [&old, &new, &other] {
            fs::write(p, "x").unwrap();
        }
        let past = SystemTime::now() - Duration::from_secs(3600);
        fs::File::options()
            .write(true)
            .open(&old)
            .unwrap()
            .set_modified(past)
            .unwrap();

        let removed = cleanup_old_logs(dir.path(), "gw").unwrap();
        assert_eq!(removed, 1);
        assert!(!old.exists());
        assert!(new.exists());
        assert!(other.exists());
    }
}
