use super::{EventLogger, FileEventLogger, NullEventLogger, Severity};

#[test]
fn severity_labels() {
    assert_eq!(Severity::Info.label(), "info");
    assert_eq!(Severity::Warning.label(), "warning");
    assert_eq!(Severity::Error.label(), "error");
}

#[test]
fn null_logger_accepts_everything() {
    let logger = NullEventLogger;
    logger.log(Severity::Error, "discarded");
}

#[test]
fn file_logger_appends_json_lines() {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let path = dir.path().join("squad.log");

    let logger = FileEventLogger::open(&path).expect("logger should open");
    logger.log(Severity::Info, "session started");
    logger.log(Severity::Warning, "diff stats unavailable");
    drop(logger);

    let raw = std::fs::read_to_string(&path).expect("log should be readable");
    let lines: Vec<&str> = raw.lines().collect();
    assert_eq!(lines.len(), 2);

    let first: serde_json::Value =
        serde_json::from_str(lines[0]).expect("line should be json");
    assert_eq!(first["level"], "info");
    assert_eq!(first["message"], "session started");
    assert!(first["ts"].is_u64());

    let second: serde_json::Value =
        serde_json::from_str(lines[1]).expect("line should be json");
    assert_eq!(second["level"], "warning");
}

#[test]
fn file_logger_appends_across_reopens() {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let path = dir.path().join("squad.log");

    {
        let logger = FileEventLogger::open(&path).expect("logger should open");
        logger.log(Severity::Info, "first");
    }
    {
        let logger = FileEventLogger::open(&path).expect("logger should reopen");
        logger.log(Severity::Info, "second");
    }

    let raw = std::fs::read_to_string(&path).expect("log should be readable");
    assert_eq!(raw.lines().count(), 2);
}
