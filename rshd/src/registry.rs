//! Command registry: name → capability-tagged handler, plus aliases.

use std::fmt::{self, Display};
use std::io::{Read, Write};

use crate::session::Host;

/// Exit status a built-in child uses to ask the session to end. Ordinary
/// built-in statuses are clamped below it.
pub const TERMINATE_SENTINEL: i32 = 255;

/// What a built-in handler asks of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Continue(i32),
    TerminateSession,
}

impl Outcome {
    pub const OK: Outcome = Outcome::Continue(0);
    pub const FAILED: Outcome = Outcome::Continue(1);

    /// Status used when the handler ran in a child process.
    pub fn exit_code(self) -> i32 {
        match self {
            Outcome::TerminateSession => TERMINATE_SENTINEL,
            Outcome::Continue(s) if (0..TERMINATE_SENTINEL).contains(&s) => s,
            Outcome::Continue(_) => 1,
        }
    }
}

/// I/O and server context handed to a built-in.
pub struct Context<'a> {
    pub input: &'a mut dyn Read,
    pub output: &'a mut dyn Write,
    pub host: &'a Host,
}

impl Context<'_> {
    /// Report a per-command failure on the session output.
    pub fn fail(&mut self, what: impl Display, err: impl Display) -> Outcome {
        let _ = writeln!(self.output, "error: {what}: {err}");
        Outcome::FAILED
    }

    pub fn usage(&mut self, text: &str) -> Outcome {
        let _ = writeln!(self.output, "usage: {text}");
        Outcome::Continue(2)
    }
}

pub type Handler = fn(&mut Context<'_>, &[String]) -> Outcome;

#[derive(Clone, Copy)]
pub enum Command {
    /// May run inside the session process when it is alone on the line.
    BuiltinFastPath(Handler),
    /// Always runs in its own child.
    BuiltinForksRequired(Handler),
    ExternalOnly,
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Command::BuiltinFastPath(_) => "BuiltinFastPath",
            Command::BuiltinForksRequired(_) => "BuiltinForksRequired",
            Command::ExternalOnly => "ExternalOnly",
        })
    }
}

impl Command {
    pub fn handler(&self) -> Option<Handler> {
        match *self {
            Command::BuiltinFastPath(h) | Command::BuiltinForksRequired(h) => Some(h),
            Command::ExternalOnly => None,
        }
    }

    pub fn is_fast_path(&self) -> bool {
        matches!(self, Command::BuiltinFastPath(_))
    }
}

#[derive(Debug, Clone)]
struct Entry {
    name: &'static str,
    command: Command,
    help: &'static str,
}

#[derive(Debug, Clone)]
struct Alias {
    name: &'static str,
    expansion: &'static [&'static str],
    help: &'static str,
}

#[derive(Debug, Clone, Default)]
pub struct Registry {
    entries: Vec<Entry>,
    aliases: Vec<Alias>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `name`, replacing any earlier entry of the same name.
    pub fn insert(
        &mut self,
        name: &'static str,
        command: Command,
        help: &'static str,
    ) -> &mut Self {
        self.entries.retain(|e| e.name != name);
        self.entries.push(Entry { name, command, help });
        self
    }

    pub fn alias(
        &mut self,
        name: &'static str,
        expansion: &'static [&'static str],
        help: &'static str,
    ) -> &mut Self {
        self.aliases.retain(|a| a.name != name);
        self.aliases.push(Alias { name, expansion, help });
        self
    }

    /// Unknown names are external programs.
    pub fn resolve(&self, name: &str) -> Command {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.command)
            .unwrap_or(Command::ExternalOnly)
    }

    /// Expand a leading alias in place of the command name.
    pub fn normalize(&self, argv: Vec<String>) -> Vec<String> {
        let Some(first) = argv.first() else { return argv };
        match self.aliases.iter().find(|a| a.name == first.as_str()) {
            Some(alias) => alias
                .expansion
                .iter()
                .map(|s| s.to_string())
                .chain(argv.into_iter().skip(1))
                .collect(),
            None => argv,
        }
    }

    pub fn commands(&self) -> impl Iterator<Item = (&'static str, &'static str)> + '_ {
        self.entries.iter().map(|e| (e.name, e.help))
    }

    pub fn aliases(
        &self,
    ) -> impl Iterator<Item = (&'static str, &'static [&'static str], &'static str)> + '_ {
        self.aliases.iter().map(|a| (a.name, a.expansion, a.help))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nop(_: &mut Context<'_>, _: &[String]) -> Outcome {
        Outcome::OK
    }

    fn argv(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn exit_code_reserves_sentinel() {
        assert_eq!(Outcome::TerminateSession.exit_code(), TERMINATE_SENTINEL);
        assert_eq!(Outcome::Continue(0).exit_code(), 0);
        assert_eq!(Outcome::Continue(254).exit_code(), 254);
        assert_eq!(Outcome::Continue(255).exit_code(), 1);
        assert_eq!(Outcome::Continue(-3).exit_code(), 1);
    }

    #[test]
    fn resolve_tags() {
        let mut reg = Registry::new();
        reg.insert("fast", Command::BuiltinFastPath(nop), "")
            .insert("slow", Command::BuiltinForksRequired(nop), "");
        assert!(reg.resolve("fast").is_fast_path());
        assert!(!reg.resolve("slow").is_fast_path());
        assert!(reg.resolve("slow").handler().is_some());
        assert!(matches!(reg.resolve("grep"), Command::ExternalOnly));
    }

    #[test]
    fn insert_replaces() {
        let mut reg = Registry::new();
        reg.insert("x", Command::BuiltinFastPath(nop), "one");
        reg.insert("x", Command::BuiltinForksRequired(nop), "two");
        assert_eq!(reg.commands().collect::<Vec<_>>(), vec![("x", "two")]);
        assert!(!reg.resolve("x").is_fast_path());
    }

    #[test]
    fn alias_expands_only_command_position() {
        let mut reg = Registry::new();
        reg.alias("ll", &["ls", "-l"], "long listing");
        assert_eq!(reg.normalize(argv(&["ll", "/tmp"])), argv(&["ls", "-l", "/tmp"]));
        assert_eq!(reg.normalize(argv(&["echo", "ll"])), argv(&["echo", "ll"]));
        assert!(reg.normalize(Vec::new()).is_empty());
    }
}
