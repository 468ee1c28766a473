use crate::correlation::CorrelationId;
use log::LevelFilter;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

/// Open the shared log file for appending, creating it if needed.
pub fn open_log_file(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

fn level(verbose: bool) -> LevelFilter {
    if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    }
}

/// Logger writing every record to `file`, each line tagged with the correlation id.
///
/// Every record is written with a single append, so concurrent invocations
/// sharing the file interleave whole lines only.
pub fn invocation_logger(
    file: File,
    correlation_id: &CorrelationId,
    verbose: bool,
) -> env_logger::Logger {
    let id = correlation_id.to_string();
    env_logger::Builder::from_default_env()
        .filter_level(level(verbose))
        .target(env_logger::Target::Pipe(Box::new(file)))
        .format(move |buf, record| {
            writeln!(
                buf,
                "{} {} {} {}",
                chrono::Local::now().format("%Y/%m/%d %H:%M:%S"),
                id,
                record.level(),
                record.args()
            )
        })
        .build()
}

/// Route all logging for this invocation into `file`.
pub fn init_invocation_logger(
    file: File,
    correlation_id: &CorrelationId,
    verbose: bool,
) -> Result<(), log::SetLoggerError> {
    let logger = invocation_logger(file, correlation_id, verbose);
    let max_level = logger.filter();
    log::set_boxed_logger(Box::new(logger))?;
    log::set_max_level(max_level);
    Ok(())
}

/// Logger for the interactive commands.
pub fn init_console_logger(verbose: bool) {
    let _ = env_logger::Builder::from_default_env()
        .filter_level(level(verbose))
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_log_file_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proxy.log");

        writeln!(open_log_file(&path).unwrap(), "first").unwrap();
        writeln!(open_log_file(&path).unwrap(), "second").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "first\nsecond\n");
    }

    #[test]
    fn test_invocation_log_line_format() {
        use log::{Level, Log, Record};

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proxy.log");
        let id = CorrelationId::generate();
        let logger = invocation_logger(open_log_file(&path).unwrap(), &id, false);

        logger.log(
            &Record::builder()
                .args(format_args!("PASSED: a => b"))
                .level(Level::Info)
                .build(),
        );
        logger.log(
            &Record::builder()
                .args(format_args!("Message handed to relay"))
                .level(Level::Debug)
                .build(),
        );
        logger.flush();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].ends_with(&format!(" {id} INFO PASSED: a => b")));

        // YYYY/MM/DD HH:MM:SS
        let stamp = &lines[0][..19];
        assert!(chrono::NaiveDateTime::parse_from_str(stamp, "%Y/%m/%d %H:%M:%S").is_ok());
    }

    #[test]
    fn test_open_log_file_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(open_log_file(&dir.path().join("nope").join("proxy.log")).is_err());
    }
}
