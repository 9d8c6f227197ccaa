//! File-system built-ins.

use std::env;
use std::fs::{self, DirBuilder, File, Metadata};
use std::io::{self, Write};
use std::os::unix::fs::{DirBuilderExt, MetadataExt};
use std::path::{Path, PathBuf};

use super::Flags;
use crate::registry::{Context, Outcome};

struct Listing {
    long: bool,
    all: bool,
    recursive: bool,
}

pub fn ls(ctx: &mut Context<'_>, argv: &[String]) -> Outcome {
    let (flags, operands) = match Flags::parse(&argv[1..], "laR") {
        Ok(v) => v,
        Err(c) => return ctx.usage(&format!("ls [-l] [-a] [-R] [path...] (unknown option -{c})")),
    };
    let opts = Listing { long: flags.has('l'), all: flags.has('a'), recursive: flags.has('R') };
    let targets = if operands.is_empty() { vec!["."] } else { operands };
    let headers = targets.len() > 1 || opts.recursive;

    let mut status = Outcome::OK;
    for target in targets {
        let path = Path::new(target);
        let meta = match fs::symlink_metadata(path) {
            Ok(m) => m,
            Err(e) => {
                status = ctx.fail(target, e);
                continue;
            }
        };
        let listed = if meta.is_dir() {
            list_dir(ctx.output, path, &opts, headers)
        } else {
            write_entry(ctx.output, path, target, &meta, opts.long)
        };
        if let Err(e) = listed {
            status = ctx.fail(target, e);
        }
    }
    status
}

fn list_dir(out: &mut dyn Write, dir: &Path, opts: &Listing, header: bool) -> io::Result<()> {
    let mut entries: Vec<(String, PathBuf)> = fs::read_dir(dir)?
        .flatten()
        .map(|e| (e.file_name().to_string_lossy().into_owned(), e.path()))
        .filter(|(name, _)| opts.all || !name.starts_with('.'))
        .collect();
    entries.sort();

    if header {
        writeln!(out, "{}:", dir.display())?;
    }
    for (name, path) in &entries {
        match fs::symlink_metadata(path) {
            Ok(meta) => write_entry(out, path, name, &meta, opts.long)?,
            Err(e) => writeln!(out, "error: {}: {e}", path.display())?,
        }
    }
    if opts.recursive {
        for (_, path) in &entries {
            if fs::symlink_metadata(path).is_ok_and(|m| m.is_dir()) {
                writeln!(out)?;
                if let Err(e) = list_dir(out, path, opts, true) {
                    writeln!(out, "error: {}: {e}", path.display())?;
                }
            }
        }
    }
    Ok(())
}

fn write_entry(
    out: &mut dyn Write,
    path: &Path,
    name: &str,
    meta: &Metadata,
    long: bool,
) -> io::Result<()> {
    if !long {
        return writeln!(out, "{name}");
    }
    let mut shown = name.to_string();
    if meta.file_type().is_symlink() {
        if let Ok(target) = fs::read_link(path) {
            shown = format!("{name} -> {}", target.display());
        }
    }
    writeln!(
        out,
        "{} {:>6} {:>6} {:>6} {:>8} {} {}",
        mode_string(meta.mode()),
        meta.nlink(),
        meta.uid(),
        meta.gid(),
        meta.size(),
        format_mtime(meta.mtime()),
        shown
    )
}

pub(crate) fn mode_string(mode: u32) -> String {
    let kind = match mode & 0o170000 {
        0o040000 => 'd',
        0o120000 => 'l',
        0o020000 => 'c',
        0o060000 => 'b',
        0o010000 => 'p',
        0o140000 => 's',
        _ => '-',
    };
    let mut s = String::with_capacity(10);
    s.push(kind);
    for (i, c) in "rwxrwxrwx".chars().enumerate() {
        s.push(if mode & (0o400 >> i) != 0 { c } else { '-' });
    }
    s
}

/// `YYYY-MM-DD HH:MM` in UTC.
pub(crate) fn format_mtime(secs: i64) -> String {
    let days = secs.div_euclid(86_400);
    let rem = secs.rem_euclid(86_400);
    let (y, m, d) = civil_from_days(days);
    format!("{y:04}-{m:02}-{d:02} {:02}:{:02}", rem / 3600, rem % 3600 / 60)
}

// days since 1970-01-01 → proleptic Gregorian (year, month, day)
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = (if z >= 0 { z } else { z - 146_096 }) / 146_097;
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let y = yoe + era * 400 + i64::from(m <= 2);
    (y, m, d)
}

pub fn cd(ctx: &mut Context<'_>, argv: &[String]) -> Outcome {
    let target = argv.get(1).map(String::as_str).unwrap_or("/");
    match env::set_current_dir(target) {
        Ok(()) => Outcome::OK,
        Err(e) => ctx.fail(target, e),
    }
}

pub fn pwd(ctx: &mut Context<'_>, _argv: &[String]) -> Outcome {
    match env::current_dir() {
        Ok(dir) => {
            let _ = writeln!(ctx.output, "{}", dir.display());
            Outcome::OK
        }
        Err(e) => ctx.fail("pwd", e),
    }
}

/// Copy files to output; with no operands, copy input.
pub fn cat(ctx: &mut Context<'_>, argv: &[String]) -> Outcome {
    if argv.len() < 2 {
        return match io::copy(&mut *ctx.input, &mut *ctx.output) {
            Ok(_) => Outcome::OK,
            Err(e) => ctx.fail("cat", e),
        };
    }
    let mut status = Outcome::OK;
    for name in &argv[1..] {
        let copied = File::open(name).and_then(|mut f| io::copy(&mut f, &mut *ctx.output));
        if let Err(e) = copied {
            status = ctx.fail(name, e);
        }
    }
    status
}

pub fn mkdir(ctx: &mut Context<'_>, argv: &[String]) -> Outcome {
    let (flags, dirs) = match Flags::parse(&argv[1..], "p") {
        Ok(v) if !v.1.is_empty() => v,
        _ => return ctx.usage("mkdir [-p] dir..."),
    };
    let mut builder = DirBuilder::new();
    builder.recursive(flags.has('p')).mode(0o755);
    let mut status = Outcome::OK;
    for dir in dirs {
        if let Err(e) = builder.create(dir) {
            status = ctx.fail(dir, e);
        }
    }
    status
}

pub fn rm(ctx: &mut Context<'_>, argv: &[String]) -> Outcome {
    let (flags, paths) = match Flags::parse(&argv[1..], "r") {
        Ok(v) if !v.1.is_empty() => v,
        _ => return ctx.usage("rm [-r] path..."),
    };
    let mut status = Outcome::OK;
    for path in paths {
        let removed = match fs::symlink_metadata(path) {
            Ok(m) if m.is_dir() && flags.has('r') => fs::remove_dir_all(path),
            Ok(m) if m.is_dir() => Err(io::Error::new(io::ErrorKind::Other, "is a directory")),
            Ok(_) => fs::remove_file(path),
            Err(e) => Err(e),
        };
        if let Err(e) = removed {
            status = ctx.fail(path, e);
        }
    }
    status
}

pub fn cp(ctx: &mut Context<'_>, argv: &[String]) -> Outcome {
    let (flags, src, dst) = match Flags::parse(&argv[1..], "r") {
        Ok((flags, ops)) if ops.len() == 2 => (flags, ops[0], ops[1]),
        _ => return ctx.usage("cp [-r] src dst"),
    };
    let src = Path::new(src);
    let dst = into_dir(src, Path::new(dst));
    let copied = match fs::metadata(src) {
        Ok(m) if m.is_dir() && flags.has('r') => copy_tree(src, &dst),
        Ok(m) if m.is_dir() => Err(io::Error::new(io::ErrorKind::Other, "is a directory (use -r)")),
        Ok(_) => fs::copy(src, &dst).map(|_| ()),
        Err(e) => Err(e),
    };
    match copied {
        Ok(()) => Outcome::OK,
        Err(e) => ctx.fail(src.display(), e),
    }
}

fn copy_tree(src: &Path, dst: &Path) -> io::Result<()> {
    DirBuilder::new().recursive(true).mode(0o755).create(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_tree(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

pub fn mv(ctx: &mut Context<'_>, argv: &[String]) -> Outcome {
    let [_, src, dst] = argv else {
        return ctx.usage("mv src dst");
    };
    let src = Path::new(src);
    match fs::rename(src, into_dir(src, Path::new(dst))) {
        Ok(()) => Outcome::OK,
        Err(e) => ctx.fail(src.display(), e),
    }
}

/// `dst/<name of src>` when `dst` is an existing directory.
fn into_dir(src: &Path, dst: &Path) -> PathBuf {
    match src.file_name() {
        Some(name) if dst.is_dir() => dst.join(name),
        _ => dst.to_path_buf(),
    }
}
