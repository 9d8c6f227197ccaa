//! Line-oriented base64 file transfer.
//!
//! `get` sends a file as base64 lines of at most [`CHUNK`] raw bytes each,
//! then a line holding `.`. `put` announces readiness with a `.` line and
//! accepts the same format back.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::fs::OpenOptionsExt;

use base64::{engine::general_purpose, Engine as _};

use crate::lineio::{read_line, MAX_LINE};
use crate::registry::{Context, Outcome};

pub const CHUNK: usize = 3072;
const END: &str = ".";

pub fn put(ctx: &mut Context<'_>, argv: &[String]) -> Outcome {
    let [_, dest] = argv else {
        return ctx.usage("put <dest>");
    };
    let opened = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o644)
        .open(dest);
    let mut file = match opened {
        Ok(f) => f,
        Err(e) => return ctx.fail(dest, e),
    };
    let _ = writeln!(ctx.output, "{END}");
    let _ = ctx.output.flush();

    // keep consuming until the terminator even after a failure, so the
    // payload is never read back as commands
    let mut failure: Option<String> = None;
    loop {
        let line = match read_line(&mut *ctx.input, MAX_LINE) {
            Ok(Some(line)) => line,
            Ok(None) => {
                failure.get_or_insert_with(|| "input ended before terminator".to_string());
                break;
            }
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                failure.get_or_insert_with(|| format!("decode: {e}"));
                continue;
            }
            Err(e) => return ctx.fail(dest, e),
        };
        let line = line.trim();
        if line == END {
            break;
        }
        if failure.is_some() || line.is_empty() {
            continue;
        }
        match general_purpose::STANDARD.decode(line) {
            Ok(bytes) => {
                if let Err(e) = file.write_all(&bytes) {
                    failure = Some(format!("write: {e}"));
                }
            }
            Err(e) => failure = Some(format!("decode: {e}")),
        }
    }
    match failure {
        None => Outcome::OK,
        Some(msg) => ctx.fail(dest, msg),
    }
}

pub fn get(ctx: &mut Context<'_>, argv: &[String]) -> Outcome {
    let [_, src] = argv else {
        return ctx.usage("get <src>");
    };
    let sent = File::open(src).and_then(|mut file| {
        let mut buf = vec![0u8; CHUNK];
        loop {
            let n = fill(&mut file, &mut buf)?;
            if n == 0 {
                break;
            }
            writeln!(ctx.output, "{}", general_purpose::STANDARD.encode(&buf[..n]))?;
        }
        Ok(())
    });
    if let Err(e) = sent {
        return ctx.fail(src, e);
    }
    let _ = writeln!(ctx.output, "{END}");
    Outcome::OK
}

/// Read until `buf` is full or the reader is exhausted.
fn fill(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins::testing::run;
    use std::fs;

    #[test]
    fn put_writes_decoded_payload() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.bin");
        let dest_s = dest.to_str().unwrap();
        let (status, out) = run(put, &["put", dest_s], b"aGVsbG8g\r\nd29ybGQ=\n.\nls\n");
        assert_eq!(status, Outcome::OK);
        assert_eq!(out, ".\n");
        assert_eq!(fs::read(&dest).unwrap(), b"hello world");
    }

    #[test]
    fn put_reports_bad_payload_after_terminator() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("bad");
        let (status, out) = run(put, &["put", dest.to_str().unwrap()], b"!!!!\nAAAA\n.\n");
        assert_eq!(status, Outcome::FAILED);
        assert!(out.starts_with(".\nerror: "), "{out}");
        assert!(out.contains("decode"));
    }

    #[test]
    fn put_without_terminator_fails() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("cut");
        let (status, _) = run(put, &["put", dest.to_str().unwrap()], b"AAAA\n");
        assert_eq!(status, Outcome::FAILED);
    }

    #[test]
    fn get_chunks_lines() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.bin");
        let data: Vec<u8> = (0..7000u32).map(|i| (i % 251) as u8).collect();
        fs::write(&src, &data).unwrap();

        let (status, out) = run(get, &["get", src.to_str().unwrap()], b"");
        assert_eq!(status, Outcome::OK);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0].len(), CHUNK / 3 * 4);
        assert_eq!(lines[3], ".");
        let decoded: Vec<u8> = lines[..3]
            .iter()
            .flat_map(|l| general_purpose::STANDARD.decode(l).unwrap())
            .collect();
        assert_eq!(decoded, data);
    }

    #[test]
    fn get_missing_file() {
        let (status, out) = run(get, &["get", "/nonexistent/rshd-test"], b"");
        assert_eq!(status, Outcome::FAILED);
        assert!(!out.contains("\n.\n"));
    }
}
