//! The built-in command set.

pub mod control;
pub mod fs;
pub mod transfer;

use crate::registry::Registry;

/// Registry holding every built-in and alias.
pub fn registry() -> Registry {
    use crate::registry::Command::{BuiltinFastPath as Fast, BuiltinForksRequired as Forks};

    let mut reg = Registry::new();
    reg.insert("help", Fast(control::help), "list built-in commands")
        .insert("exit", Fast(control::exit), "end the session")
        .insert("ls", Fast(fs::ls), "list directory contents [-l] [-a] [-R]")
        .insert("cd", Fast(fs::cd), "change directory (default /)")
        .insert("pwd", Fast(fs::pwd), "print working directory")
        .insert("cat", Fast(fs::cat), "print files")
        .insert("mkdir", Fast(fs::mkdir), "create directories [-p]")
        .insert("rm", Fast(fs::rm), "remove files [-r]")
        .insert("cp", Fast(fs::cp), "copy a file [-r]")
        .insert("mv", Fast(fs::mv), "rename a file")
        .insert("ps", Fast(control::ps), "list processes")
        .insert("kill", Fast(control::kill), "send a signal: kill <pid> [sig]")
        .insert("put", Fast(transfer::put), "receive a base64 file")
        .insert("get", Fast(transfer::get), "send a file as base64")
        .insert(
            "serverctl",
            Forks(control::serverctl),
            "control the server: start|stop|restart|status",
        )
        .alias("ll", &["ls", "-l"], "ls -l");
    reg
}

/// Leading single-letter options (`-la`, `-r`), stopping at `--` or the
/// first operand.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct Flags {
    set: Vec<char>,
}

impl Flags {
    /// Split `args` (without the command name) into flags and operands.
    /// Returns the first flag not in `allowed` as the error.
    pub(crate) fn parse<'a>(
        args: &'a [String],
        allowed: &str,
    ) -> Result<(Flags, Vec<&'a str>), char> {
        let mut flags = Flags::default();
        let mut rest = args.iter();
        while let Some(arg) = rest.next() {
            if arg == "--" {
                break;
            }
            if arg.len() < 2 || !arg.starts_with('-') {
                let operands =
                    std::iter::once(arg.as_str()).chain(rest.map(String::as_str)).collect();
                return Ok((flags, operands));
            }
            for c in arg.chars().skip(1) {
                if !allowed.contains(c) {
                    return Err(c);
                }
                flags.set.push(c);
            }
        }
        Ok((flags, rest.map(String::as_str).collect()))
    }

    pub(crate) fn has(&self, c: char) -> bool {
        self.set.contains(&c)
    }
}


#[cfg(test)]
pub(crate) mod testing {
    use std::io::Cursor;

    use nix::unistd::Pid;

    use crate::config::ServerConfig;
    use crate::registry::{Context, Handler, Outcome};
    use crate::session::Host;

    /// Call `handler` in-process with in-memory I/O.
    pub(crate) fn run(handler: Handler, argv: &[&str], input: &[u8]) -> (Outcome, String) {
        let host = Host::new(super::registry(), ServerConfig::default(), Pid::this());
        let argv: Vec<String> = argv.iter().map(|s| s.to_string()).collect();
        let mut input = Cursor::new(input.to_vec());
        let mut out = Vec::new();
        let outcome = {
            let mut ctx = Context { input: &mut input, output: &mut out, host: &host };
            handler(&mut ctx, &argv)
        };
        (outcome, String::from_utf8_lossy(&out).into_owned())
    }
}
