//! Typed command construction for external tools.
//!
//! Arguments that name host input files are declared as such when the
//! command is built, so the staging manifest comes from typed fields
//! instead of existence-checking tokens after the fact.

use std::fmt;
use std::path::{Path, PathBuf};

/// One argument token of a tool command.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolArg {
    /// A plain token passed through unchanged.
    Literal(String),
    /// A host input file; staged into the execution context and rewritten
    /// to the staged path before invocation.
    Input(PathBuf),
}

/// An external tool invocation under construction.
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: String,
    args: Vec<ToolArg>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Append a plain token.
    pub fn arg(mut self, token: impl Into<String>) -> Self {
        self.args.push(ToolArg::Literal(token.into()));
        self
    }

    /// Append a host input file argument.
    pub fn input(mut self, path: impl Into<PathBuf>) -> Self {
        self.args.push(ToolArg::Input(path.into()));
        self
    }

    /// Append a `-FLAG value` pair.
    pub fn opt(self, flag: impl Into<String>, value: impl Into<String>) -> Self {
        self.arg(flag).arg(value)
    }

    /// Append a `-FLAG <host file>` pair.
    pub fn opt_input(self, flag: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.arg(flag).input(path)
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[ToolArg] {
        &self.args
    }

    /// Host input files referenced by this command, in argument order.
    pub fn inputs(&self) -> impl Iterator<Item = &Path> {
        self.args.iter().filter_map(|arg| match arg {
            ToolArg::Input(path) => Some(path.as_path()),
            ToolArg::Literal(_) => None,
        })
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            match arg {
                ToolArg::Literal(token) => write!(f, " {token}")?,
                ToolArg::Input(path) => write!(f, " {}", path.display())?,
            }
        }
        Ok(())
    }
}

/// Host-path to staged-path mapping for one invocation. Built while staging
/// and discarded when the invocation completes.
#[derive(Debug, Default)]
pub struct StagingManifest {
    entries: Vec<(PathBuf, PathBuf)>,
}

impl StagingManifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, host: PathBuf, staged: PathBuf) {
        self.entries.push((host, staged));
    }

    pub fn staged_path(&self, host: &Path) -> Option<&Path> {
        self.entries
            .iter()
            .find(|(h, _)| h == host)
            .map(|(_, s)| s.as_path())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Path, &Path)> {
        self.entries.iter().map(|(h, s)| (h.as_path(), s.as_path()))
    }
}
