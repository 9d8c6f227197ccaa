
use std::fs;

use test_util::{dead_pid, rshctl, Sleeper};

#[test]
fn missing_record_is_not_running() {
    let dir = tempfile::tempdir().unwrap();
    let run = rshctl(&dir.path().join("rshd.pid"), &["status"]);
    assert_eq!(run.code, 1);
    assert_eq!(run.stdout, "rshctl: not running\n");
}

#[test]
fn live_record_is_running_every_time() {
    let dir = tempfile::tempdir().unwrap();
    let pidfile = dir.path().join("rshd.pid");
    let sleeper = Sleeper::spawn();
    fs::write(&pidfile, format!("{}\n", sleeper.pid())).unwrap();

    for _ in 0..2 {
        let run = rshctl(&pidfile, &["status"]);
        assert_eq!(run.code, 0);
        assert_eq!(run.stdout, format!("rshctl: running (pid={})\n", sleeper.pid()));
    }
    assert!(pidfile.exists());
}

#[test]
fn dead_record_is_stale_and_left_alone() {
    let dir = tempfile::tempdir().unwrap();
    let pidfile = dir.path().join("rshd.pid");
    let pid = dead_pid();
    fs::write(&pidfile, format!("{pid}\n")).unwrap();

    for _ in 0..2 {
        let run = rshctl(&pidfile, &["status"]);
        assert_eq!(run.code, 2);
        assert_eq!(run.stdout, format!("rshctl: stale pidfile (pid={pid})\n"));
    }
    assert!(pidfile.exists());
}

#[test]
fn unparsable_record_is_not_running() {
    let dir = tempfile::tempdir().unwrap();
    let pidfile = dir.path().join("rshd.pid");
    fs::write(&pidfile, "not a pid\n").unwrap();
    assert_eq!(rshctl(&pidfile, &["status"]).code, 1);
}
