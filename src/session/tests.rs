use super::*;
use crate::error::{CommandFailure, FailureKind, InstallerError};
use std::io::Read;
use tempfile::TempDir;

fn begin(temp: &TempDir) -> SessionGuard {
    Session::begin(temp.path(), "install").unwrap()
}

fn touch(session: &Session, name: &str, content: &str) {
    fs::write(session.folder().join(name), content).unwrap();
}

#[test]
fn test_slug_replaces_non_letters() {
    assert_eq!(command_slug("docker compose up -d"), "docker-compose-up-d");
    assert_eq!(command_slug("  ./bin/setup.sh --port=8501 "), "bin-setup-sh-port");
    assert_eq!(command_slug("123"), "");
}

#[test]
fn test_slug_is_cut_before_trimming() {
    let command = format!("{} {}", "a".repeat(99), "tail");
    let slug = command_slug(&command);
    assert_eq!(slug, "a".repeat(99));
    assert!(command_slug(&"word ".repeat(50)).len() <= 100);
}

#[test]
fn test_artifact_file_name() {
    assert_eq!(
        artifact_file_name(7, StreamName::Stderr, "docker compose ls"),
        "0007-stderr-docker-compose-ls.txt"
    );
}

#[test]
fn test_begin_creates_named_folder() {
    let temp = TempDir::new().unwrap();
    let session = begin(&temp);

    assert!(session.folder().is_dir());
    assert!(session.name().starts_with("install-"));
    assert_eq!(session.folder().parent().unwrap(), temp.path());
    assert_eq!(session.next_invocation_index(), 1);
    assert_eq!(session.next_invocation_index(), 2);
    assert_eq!(session.invocation_count(), 2);
}

#[test]
fn test_begin_suffixes_on_collision() {
    let temp = TempDir::new().unwrap();
    let first = begin(&temp);
    let second = begin(&temp);

    assert_ne!(second.folder(), first.folder());
    // Within the same second the name gets a numeric suffix
    if second.name().starts_with(first.name()) {
        assert_eq!(second.name(), format!("{}-2", first.name()));
    }
}

#[test]
fn test_begin_fails_when_root_is_a_file() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("file");
    fs::write(&root, "x").unwrap();

    let err = Session::begin(&root, "install").unwrap_err();
    assert_eq!(err.code(), ErrorCode::SESSION_FOLDER_ERROR);
}

#[test]
fn test_archive_packs_folder_and_updates_alias() {
    let temp = TempDir::new().unwrap();
    let session = begin(&temp);
    touch(&session, "0001-stdout-echo.txt", "hello\n");
    touch(&session, LOG_FILE_NAME, "log line\n");
    let name = session.name().to_string();
    let folder = session.folder().to_path_buf();

    let archive = session.close().unwrap();

    assert_eq!(archive, temp.path().join(format!("{}.zip", name)));
    assert!(!folder.exists());

    let mut zip = zip::ZipArchive::new(File::open(&archive).unwrap()).unwrap();
    let mut names = zip.file_names().map(String::from).collect::<Vec<_>>();
    names.sort();
    assert_eq!(
        names,
        vec![
            format!("{}/0001-stdout-echo.txt", name),
            format!("{}/{}", name, LOG_FILE_NAME),
        ]
    );
    let mut content = String::new();
    zip.by_name(&format!("{}/0001-stdout-echo.txt", name))
        .unwrap()
        .read_to_string(&mut content)
        .unwrap();
    assert_eq!(content, "hello\n");

    let latest = temp.path().join(LATEST_ALIAS);
    assert!(fs::symlink_metadata(&latest).is_ok());
    assert_eq!(fs::read(&latest).unwrap(), fs::read(&archive).unwrap());
}

#[cfg(unix)]
#[test]
fn test_latest_alias_is_relative_symlink() {
    let temp = TempDir::new().unwrap();
    let session = begin(&temp);
    let name = session.name().to_string();
    session.close().unwrap();

    let target = fs::read_link(temp.path().join(LATEST_ALIAS)).unwrap();
    assert_eq!(target, PathBuf::from(format!("{}.zip", name)));
}

#[test]
fn test_latest_alias_is_replaced() {
    let temp = TempDir::new().unwrap();
    let first = Session::begin(temp.path(), "first").unwrap();
    let first_archive = first.close().unwrap();
    let second = Session::begin(temp.path(), "second").unwrap();
    touch(&second, "marker.txt", "second");
    let second_archive = second.close().unwrap();

    assert_ne!(first_archive, second_archive);
    let latest = fs::read(temp.path().join(LATEST_ALIAS)).unwrap();
    assert_eq!(latest, fs::read(&second_archive).unwrap());
}

#[test]
fn test_archive_is_idempotent() {
    let temp = TempDir::new().unwrap();
    let session = begin(&temp);
    touch(&session, "a.txt", "a");

    let first = session.archive().unwrap();
    let modified = fs::metadata(&first).unwrap().modified().unwrap();
    let second = session.archive().unwrap();

    assert_eq!(first, second);
    assert!(session.is_closed());
    assert_eq!(fs::metadata(&second).unwrap().modified().unwrap(), modified);
}

#[test]
fn test_guard_drop_archives() {
    let temp = TempDir::new().unwrap();
    let archive = {
        let session = begin(&temp);
        touch(&session, "a.txt", "a");
        session.archive_path()
    };

    assert!(archive.is_file());
    assert!(temp.path().join(LATEST_ALIAS).exists());
}

#[test]
fn test_handle_outlives_guard() {
    let temp = TempDir::new().unwrap();
    let session = begin(&temp);
    let handle = session.handle();
    drop(session);

    assert!(handle.is_closed());
    assert!(handle.archive_path().is_file());
}

#[test]
fn test_failure_artifact_prefers_stderr() {
    let temp = TempDir::new().unwrap();
    let session = begin(&temp);
    touch(&session, "0003-stdout-docker-pull.txt", "pulling\n");
    touch(&session, "0003-stderr-docker-pull.txt", "denied\n");
    touch(&session, "0004-stderr-other.txt", "other\n");

    let error = InstallerError::defect("Failed step: Pull images").with_source(
        CommandFailure::new(3, "docker pull", Some(1), FailureKind::ExitCode),
    );
    let artifact = session.locate_failure_artifact(&error).unwrap();

    assert_eq!(artifact.index, 3);
    assert_eq!(artifact.command, "docker pull");
    assert_eq!(artifact.stream, StreamName::Stderr);
    assert_eq!(artifact.read().unwrap(), "denied\n");
}

#[test]
fn test_failure_artifact_falls_back_to_stdout() {
    let temp = TempDir::new().unwrap();
    let session = begin(&temp);
    touch(&session, "0002-stdout-make.txt", "make: error\n");

    let error = InstallerError::from(CommandFailure::new(2, "make", Some(2), FailureKind::ExitCode));
    let artifact = session.locate_failure_artifact(&error).unwrap();

    assert_eq!(artifact.stream, StreamName::Stdout);
    assert_eq!(artifact.read().unwrap(), "make: error\n");
}

#[test]
fn test_failure_artifact_requires_unique_match() {
    let temp = TempDir::new().unwrap();
    let session = begin(&temp);
    touch(&session, "0005-stderr-one.txt", "1");
    touch(&session, "0005-stderr-two.txt", "2");

    let error = CommandFailure::new(5, "one", Some(1), FailureKind::ExitCode);
    assert!(session.locate_failure_artifact(&error).is_none());
}

#[test]
fn test_failure_artifact_needs_command_failure() {
    let temp = TempDir::new().unwrap();
    let session = begin(&temp);
    touch(&session, "0001-stderr-x.txt", "x");

    let error = InstallerError::abort("no command involved");
    assert!(session.locate_failure_artifact(&error).is_none());

    // Failure without any captured output
    let error = CommandFailure::new(9, "silent", Some(1), FailureKind::ExitCode);
    assert!(session.locate_failure_artifact(&error).is_none());
}

#[test]
fn test_session_logging_writes_log_file() {
    let temp = TempDir::new().unwrap();
    let session = begin(&temp);
    {
        let logging = SessionLogging::configure(&session, false).unwrap();
        assert_eq!(logging.path(), session.log_file_path());
        tracing::debug!("debug record from the session");
        tracing::info!("info record from the session");
    }

    let log = fs::read_to_string(session.log_file_path()).unwrap();
    assert!(log.contains("debug record from the session"));
    assert!(log.contains("info record from the session"));
}

#[test]
fn test_session_logging_detaches_on_drop() {
    let temp = TempDir::new().unwrap();
    let session = begin(&temp);
    drop(SessionLogging::configure(&session, false).unwrap());
    tracing::info!("record after the session logging ended");

    let log = fs::read_to_string(session.log_file_path()).unwrap();
    assert!(!log.contains("record after the session logging ended"));
}
