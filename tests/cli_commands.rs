//! Integration tests for the short-lived CLI commands.
//!
//! `new` and `join CODE` start a long-running session. Besides the commands
//! that exit immediately (or must refuse to start), one Linux-only test runs
//! a session against a private SQLite presence file and stops it with SIGTERM.

use regex::Regex;
use std::process::Command;

fn meetroom() -> Command {
    Command::new(env!("CARGO_BIN_EXE_meetroom"))
}

#[test]
fn test_room_id_prints_a_valid_code() {
    let output = meetroom().arg("room-id").output().expect("Failed to run command");

    assert!(output.status.success(), "Command failed: {:?}", output);
    let stdout = String::from_utf8_lossy(&output.stdout);
    let pattern = Regex::new(r"^[0-9]{3}-[0-9]{3}-[0-9]{3}$").unwrap();
    assert!(pattern.is_match(stdout.trim()), "unexpected output: {stdout:?}");
}

#[test]
fn test_version_prints_package_version() {
    let output = meetroom().arg("version").output().expect("Failed to run command");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_join_with_malformed_code_fails_before_starting() {
    for code in ["12-345-678", "abc-def-ghi", ""] {
        let output = meetroom()
            .args(["join", code])
            .output()
            .expect("Failed to run command");

        assert!(!output.status.success(), "accepted {code:?}");
        let stderr = String::from_utf8_lossy(&output.stderr);
        assert!(stderr.contains("Invalid room code"), "stderr: {stderr}");
    }
}

#[cfg(target_os = "linux")]
mod signals {
    use super::meetroom;
    use std::path::Path;
    use std::process::{Command, Stdio};
    use std::time::{Duration, Instant};

    fn participant_rows(db: &Path) -> Option<i64> {
        let conn = rusqlite::Connection::open(db).ok()?;
        conn.query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))
            .ok()
    }

    #[test]
    fn test_sigterm_removes_participant_record() {
        let home = tempfile::tempdir().unwrap();
        let config_dir = home.path().join("config").join("meetroom");
        let db = home.path().join("presence.db");
        std::fs::create_dir_all(&config_dir).unwrap();
        std::fs::write(
            config_dir.join("config.toml"),
            format!(
                "[recording]\noutput_dir = {:?}\n\n[presence]\nbackend = \"sqlite\"\ndatabase = {:?}\npoll_ms = 20\n\n[api]\nenabled = false\n",
                home.path().join("recordings"),
                db
            ),
        )
        .unwrap();

        let mut child = meetroom()
            .arg("new")
            .env("HOME", home.path())
            .env("XDG_CONFIG_HOME", home.path().join("config"))
            .env("XDG_DATA_HOME", home.path().join("data"))
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("Failed to start session");

        let deadline = Instant::now() + Duration::from_secs(10);
        while participant_rows(&db) != Some(1) {
            assert!(Instant::now() < deadline, "session never joined");
            std::thread::sleep(Duration::from_millis(20));
        }

        let killed = Command::new("kill")
            .args(["-TERM", &child.id().to_string()])
            .status()
            .expect("Failed to send SIGTERM");
        assert!(killed.success());

        let deadline = Instant::now() + Duration::from_secs(10);
        let status = loop {
            if let Some(status) = child.try_wait().unwrap() {
                break status;
            }
            if Instant::now() >= deadline {
                child.kill().ok();
                panic!("session did not exit after SIGTERM");
            }
            std::thread::sleep(Duration::from_millis(20));
        };

        assert!(status.success(), "exit status: {status:?}");
        assert_eq!(participant_rows(&db), Some(0));
    }
}
