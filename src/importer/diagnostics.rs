use std::fmt;
use std::time::Duration;

#[derive(Debug)]
pub enum ImportErrorKind {
    Resolution {
        reference: String,
        message: String,
    },
    Fetch {
        url: String,
        message: String,
    },
    Rewrite {
        path: String,
        message: String,
    },
    RegistryLookup {
        path: String,
        key: Option<String>,
        known_paths: Vec<String>,
    },
    Cycle {
        chain: Vec<String>,
    },
    Directive {
        message: String,
    },
    Store {
        message: String,
    },
    Io {
        path: String,
        message: String,
    },
}

/// Error type for the whole load pipeline. Carries the chain of imports that
/// led to the failing file so a deep failure still names its entry point.
#[derive(Debug)]
pub struct ImportError {
    pub kind: ImportErrorKind,
    pub dependency_chain: Vec<String>,
    pub suggestion: Option<String>,
}

impl ImportError {
    pub fn resolution(reference: &str, message: impl Into<String>) -> Self {
        Self {
            kind: ImportErrorKind::Resolution {
                reference: reference.to_string(),
                message: message.into(),
            },
            dependency_chain: Vec::new(),
            suggestion: Some("Use a relative path (./, ../), an absolute URL, or a known module name".to_string()),
        }
    }

    pub fn fetch_failed(url: &str, message: impl Into<String>) -> Self {
        Self {
            kind: ImportErrorKind::Fetch {
                url: url.to_string(),
                message: message.into(),
            },
            dependency_chain: Vec::new(),
            suggestion: None,
        }
    }

    pub fn fetch_timeout(url: &str, window: Duration) -> Self {
        Self {
            kind: ImportErrorKind::Fetch {
                url: url.to_string(),
                message: format!("no response within {}ms", window.as_millis()),
            },
            dependency_chain: Vec::new(),
            suggestion: Some("Check the network, or enable caching so a stale copy can be served".to_string()),
        }
    }

    pub fn rewrite(path: &str, message: impl Into<String>) -> Self {
        Self {
            kind: ImportErrorKind::Rewrite {
                path: path.to_string(),
                message: message.into(),
            },
            dependency_chain: Vec::new(),
            suggestion: Some(
                "Only default and named import/export declarations are supported".to_string(),
            ),
        }
    }

    pub fn registry_missing_path(path: &str, known_paths: Vec<String>) -> Self {
        Self {
            kind: ImportErrorKind::RegistryLookup {
                path: path.to_string(),
                key: None,
                known_paths,
            },
            dependency_chain: Vec::new(),
            suggestion: None,
        }
    }

    pub fn registry_missing_key(path: &str, key: &str, available: Vec<String>) -> Self {
        Self {
            kind: ImportErrorKind::RegistryLookup {
                path: path.to_string(),
                key: Some(key.to_string()),
                known_paths: Vec::new(),
            },
            dependency_chain: Vec::new(),
            suggestion: Some(format!("Available exports: {}", available.join(", "))),
        }
    }

    pub fn cycle(chain: Vec<String>) -> Self {
        Self {
            kind: ImportErrorKind::Cycle { chain },
            dependency_chain: Vec::new(),
            suggestion: Some(
                "Review the import statements to break the circular dependency".to_string(),
            ),
        }
    }

    pub fn directive(message: impl Into<String>) -> Self {
        Self {
            kind: ImportErrorKind::Directive {
                message: message.into(),
            },
            dependency_chain: Vec::new(),
            suggestion: Some(
                "The entry directive needs an import attribute naming the entry file".to_string(),
            ),
        }
    }

    pub fn store(message: impl Into<String>) -> Self {
        Self {
            kind: ImportErrorKind::Store {
                message: message.into(),
            },
            dependency_chain: Vec::new(),
            suggestion: None,
        }
    }

    pub fn io(path: &str, message: impl Into<String>) -> Self {
        Self {
            kind: ImportErrorKind::Io {
                path: path.to_string(),
                message: message.into(),
            },
            dependency_chain: Vec::new(),
            suggestion: None,
        }
    }

    pub fn with_dependency_chain(mut self, chain: Vec<String>) -> Self {
        self.dependency_chain = chain;
        self
    }
}

impl fmt::Display for ImportError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.kind {
            ImportErrorKind::Resolution { reference, message } => {
                writeln!(f, "Cannot resolve reference '{}': {}", reference, message)?;
            }
            ImportErrorKind::Fetch { url, message } => {
                writeln!(f, "Failed to fetch '{}': {}", url, message)?;
            }
            ImportErrorKind::Rewrite { path, message } => {
                writeln!(f, "Malformed source in '{}': {}", path, message)?;
            }
            ImportErrorKind::RegistryLookup {
                path,
                key,
                known_paths,
            } => {
                match key {
                    Some(key) => {
                        writeln!(f, "Export '{}' not found in module '{}'", key, path)?;
                    }
                    None => {
                        writeln!(f, "Module '{}' is not registered", path)?;
                    }
                }
                if !known_paths.is_empty() {
                    writeln!(f, "\nRegistered modules:")?;
                    for known in known_paths {
                        writeln!(f, "  - {}", known)?;
                    }
                }
            }
            ImportErrorKind::Cycle { chain } => {
                writeln!(f, "Circular import detected:")?;
                writeln!(f, "{}", chain.join(" -> "))?;
            }
            ImportErrorKind::Directive { message } => {
                writeln!(f, "Invalid entry directive: {}", message)?;
            }
            ImportErrorKind::Store { message } => {
                writeln!(f, "Persistent store error: {}", message)?;
            }
            ImportErrorKind::Io { path, message } => {
                writeln!(f, "IO error reading '{}': {}", path, message)?;
            }
        }

        if !self.dependency_chain.is_empty() {
            writeln!(f, "\nImport chain:")?;
            for (i, path) in self.dependency_chain.iter().enumerate() {
                writeln!(f, "  {}. {}", i + 1, path)?;
            }
        }

        if let Some(ref suggestion) = self.suggestion {
            writeln!(f, "\nSuggestion: {}", suggestion)?;
        }

        Ok(())
    }
}

impl std::error::Error for ImportError {}

pub type ImportResult<T> = Result<T, ImportError>;
