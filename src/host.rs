//! Host execution seam.
//!
//! The assembled program is handed to whatever attaches and runs scripts in
//! the host environment. The shipped implementation just delivers the text
//! to a sink (a file, or stdout) and reports completion; a browser-like
//! embedding would attach it as a script element instead.

use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;

use crate::importer::diagnostics::{ImportError, ImportResult};

pub trait ScriptHost: Send + Sync {
    fn execute(&self, program: &str) -> ImportResult<()>;
}

/// Writes the composed program to a file, or stdout when no path is set.
#[derive(Debug, Default)]
pub struct SinkHost {
    out: Option<PathBuf>,
}

impl SinkHost {
    pub fn stdout() -> Self {
        Self { out: None }
    }

    pub fn to_file(path: impl Into<PathBuf>) -> Self {
        Self {
            out: Some(path.into()),
        }
    }
}

impl ScriptHost for SinkHost {
    fn execute(&self, program: &str) -> ImportResult<()> {
        match &self.out {
            Some(path) => fs::write(path, program)
                .map_err(|e| ImportError::io(&path.display().to_string(), e.to_string())),
            None => {
                let mut stdout = io::stdout();
                stdout
                    .write_all(program.as_bytes())
                    .map_err(|e| ImportError::io("stdout", e.to_string()))
            }
        }
    }
}
