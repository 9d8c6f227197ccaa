//! Tokens → stages with an optional trailing redirect.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::path::PathBuf;

use crate::error::ParseError;
use crate::registry::{Command, Handler, Registry};
use crate::token::Token;

pub const MAX_STAGES: usize = 16;

#[derive(Clone, Copy)]
pub enum StageKind {
    Builtin { handler: Handler, fast_path: bool },
    External,
}

impl fmt::Debug for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageKind::Builtin { fast_path, .. } => {
                f.debug_struct("Builtin").field("fast_path", fast_path).finish()
            }
            StageKind::External => f.write_str("External"),
        }
    }
}

impl StageKind {
    fn from_command(cmd: Command) -> StageKind {
        match cmd {
            Command::BuiltinFastPath(handler) => StageKind::Builtin { handler, fast_path: true },
            Command::BuiltinForksRequired(handler) => {
                StageKind::Builtin { handler, fast_path: false }
            }
            Command::ExternalOnly => StageKind::External,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Stage {
    pub argv: Vec<String>,
    pub kind: StageKind,
}

impl Stage {
    pub fn name(&self) -> &str {
        self.argv.first().map(String::as_str).unwrap_or("")
    }

    pub fn is_builtin(&self) -> bool {
        matches!(self.kind, StageKind::Builtin { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectMode {
    Truncate,
    Append,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    pub path: PathBuf,
    pub mode: RedirectMode,
}

impl Redirect {
    pub fn open(&self) -> io::Result<File> {
        let mut opts = OpenOptions::new();
        opts.write(true).create(true).mode(0o644);
        match self.mode {
            RedirectMode::Truncate => opts.truncate(true),
            RedirectMode::Append => opts.append(true),
        };
        opts.open(&self.path)
    }
}

#[derive(Debug, Clone)]
pub struct Pipeline {
    pub stages: Vec<Stage>,
    pub redirect: Option<Redirect>,
}

impl Pipeline {
    /// Handler to call in-process: a lone fast-path built-in, not redirected.
    pub fn fast_path(&self) -> Option<Handler> {
        match (self.stages.as_slice(), &self.redirect) {
            ([stage], None) => match stage.kind {
                StageKind::Builtin { handler, fast_path: true } => Some(handler),
                _ => None,
            },
            _ => None,
        }
    }
}

/// Group tokens into stages and classify each one against `registry`.
pub fn build(tokens: Vec<Token>, registry: &Registry) -> Result<Pipeline, ParseError> {
    let mut groups: Vec<Vec<String>> = Vec::new();
    let mut cur: Vec<String> = Vec::new();
    let mut redirect = None;
    let mut it = tokens.into_iter();

    while let Some(tok) = it.next() {
        match tok {
            Token::Word(w) => cur.push(w),
            Token::Pipe => close_stage(&mut groups, &mut cur)?,
            Token::Truncate => {
                redirect = Some(target(&mut it, RedirectMode::Truncate, ">")?);
                close_stage(&mut groups, &mut cur)?;
            }
            Token::Append => {
                redirect = Some(target(&mut it, RedirectMode::Append, ">>")?);
                close_stage(&mut groups, &mut cur)?;
            }
        }
    }
    close_stage(&mut groups, &mut cur)?;
    if groups.is_empty() {
        return Err(ParseError::EmptyPipeline);
    }

    let stages = groups
        .into_iter()
        .map(|argv| {
            let argv = registry.normalize(argv);
            let kind = StageKind::from_command(registry.resolve(&argv[0]));
            Stage { argv, kind }
        })
        .collect();
    Ok(Pipeline { stages, redirect })
}

fn target(
    it: &mut impl Iterator<Item = Token>,
    mode: RedirectMode,
    op: &'static str,
) -> Result<Redirect, ParseError> {
    match it.next() {
        Some(Token::Word(path)) => Ok(Redirect { path: PathBuf::from(path), mode }),
        _ => Err(ParseError::MissingRedirectTarget { op }),
    }
}

fn close_stage(groups: &mut Vec<Vec<String>>, cur: &mut Vec<String>) -> Result<(), ParseError> {
    if cur.is_empty() {
        return Ok(());
    }
    if groups.len() == MAX_STAGES {
        return Err(ParseError::TooManyStages { max: MAX_STAGES });
    }
    groups.push(std::mem::take(cur));
    Ok(())
}
