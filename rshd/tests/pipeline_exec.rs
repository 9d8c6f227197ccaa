
use std::fs;

use test_util::run_session;

#[test]
fn builtin_feeds_external_stage() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("in.txt"), "one\ntwo\nthree\n").unwrap();
    let t = run_session(dir.path(), "cat in.txt | wc -l\n");
    assert!(t.out.starts_with("rshd (unencrypted) - remote stdio\n"), "{}", t.out);
    assert!(t.out.contains("$ 3\n"), "{}", t.out);
}

#[test]
fn builtin_piped_into_external_terminates() {
    let dir = tempfile::tempdir().unwrap();
    let t = run_session(dir.path(), "help | wc -l\n");
    let count: usize = t
        .out
        .lines()
        .find_map(|l| l.trim_start_matches("$ ").trim().parse().ok())
        .expect("line count in output");
    assert!(count >= 15, "{}", t.out);
}

#[test]
fn append_redirect_accumulates() {
    let dir = tempfile::tempdir().unwrap();
    run_session(dir.path(), "echo first >> log.txt\necho second >> log.txt\n");
    assert_eq!(fs::read_to_string(dir.path().join("log.txt")).unwrap(), "first\nsecond\n");
}

#[test]
fn truncate_redirect_replaces() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("out.txt"), "old contents that are long\n").unwrap();
    run_session(dir.path(), "echo new > out.txt\n");
    assert_eq!(fs::read_to_string(dir.path().join("out.txt")).unwrap(), "new\n");
}

#[test]
fn builtin_stage_honors_redirect() {
    let dir = tempfile::tempdir().unwrap();
    run_session(dir.path(), "pwd > where.txt\n");
    let written = fs::read_to_string(dir.path().join("where.txt")).unwrap();
    assert_eq!(written.trim_end(), dir.path().canonicalize().unwrap().to_str().unwrap());
}

#[test]
fn parse_error_runs_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let t = run_session(dir.path(), "foo >\necho still here\n");
    assert!(t.out.contains("parse error: missing path after '>'"), "{}", t.out);
    assert!(t.out.contains("still here"));
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn exit_stops_the_session() {
    let dir = tempfile::tempdir().unwrap();
    let t = run_session(dir.path(), "echo before\nexit\necho after\n");
    assert!(t.out.contains("before"));
    assert!(!t.out.contains("after"), "{}", t.out);
}

#[test]
fn exit_inside_pipeline_stops_the_session() {
    let dir = tempfile::tempdir().unwrap();
    let t = run_session(dir.path(), "exit | cat\necho after\n");
    assert!(!t.out.contains("after"), "{}", t.out);
}

#[test]
fn external_status_255_does_not_end_session() {
    let dir = tempfile::tempdir().unwrap();
    let t = run_session(dir.path(), "sh -c \"exit 255\"\necho still\n");
    assert!(t.out.contains("still"), "{}", t.out);
}

#[test]
fn exec_failure_is_reported_and_session_continues() {
    let dir = tempfile::tempdir().unwrap();
    let t = run_session(dir.path(), "no-such-cmd-rshd arg\necho ok\n");
    assert!(t.err.contains("exec failed: no-such-cmd-rshd"), "{}", t.err);
    assert!(t.out.contains("ok\n"));
}

#[test]
fn redirect_failure_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let t = run_session(dir.path(), "echo x > missing-dir/f\necho ok\n");
    assert!(t.err.contains("error: missing-dir/f:"), "{}", t.err);
    assert!(t.out.contains("ok\n"));
}

#[test]
fn cd_persists_across_lines() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir(dir.path().join("sub")).unwrap();
    let t = run_session(dir.path(), "cd sub\npwd\n");
    let expected = format!("{}\n", dir.path().canonicalize().unwrap().join("sub").display());
    assert!(t.out.contains(&expected), "{}", t.out);
}

#[test]
fn ll_alias_lists_long_format() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("a.txt"), "abc").unwrap();
    let t = run_session(dir.path(), "ll\n");
    let line = t.out.lines().find(|l| l.ends_with(" a.txt")).expect("a.txt listed");
    assert!(line.trim_start_matches("$ ").starts_with("-rw"), "{line}");
}

#[test]
fn put_then_cat_within_one_session() {
    let dir = tempfile::tempdir().unwrap();
    let t = run_session(dir.path(), "put up.bin\naGVsbG8=\n.\ncat up.bin\n");
    assert_eq!(fs::read(dir.path().join("up.bin")).unwrap(), b"hello");
    assert!(t.out.contains("hello"));
}

#[test]
fn external_stages_see_fixed_environment() {
    let dir = tempfile::tempdir().unwrap();
    let t = run_session(dir.path(), "env\n");
    assert!(t.out.contains("TERM=dumb"), "{}", t.out);
    assert!(t.out.contains(&format!("SESSION_LISTENER_PID={}", t.pid)), "{}", t.out);
    assert!(!t.out.contains("HOME="), "{}", t.out);
}
