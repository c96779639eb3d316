//! Canonical-path resolution.
//!
//! Every reference discovered during a build is reduced to one canonical
//! string before anything else touches it, so that two spellings of the same
//! file dedup in the loader and the assembler. Resolution never fails:
//! malformed input produces a best-effort join and the fetch is the error
//! channel.

use crate::config::{ImporterConfig, MODULE_URL, SCRIPT_EXTENSION};

/// A suffix this long (or longer) after the final dot is not an extension.
const NO_EXTENSION_THRESHOLD: usize = 5;

/// Resolution inputs that hold for a whole session: the known module names
/// and the domain extracted from an absolute entry URL, if any.
#[derive(Debug, Clone, Default)]
pub struct ResolveContext {
    pub domain: Option<String>,
    pub known_modules: Vec<String>,
}

impl ResolveContext {
    pub fn from_config(config: &ImporterConfig) -> Self {
        Self {
            domain: None,
            known_modules: config.known_modules.clone(),
        }
    }

    pub fn with_domain(mut self, domain: Option<String>) -> Self {
        self.domain = domain;
        self
    }
}

/// Canonicalizes `child_ref` against the parent's canonical path.
///
/// Absolute remote references pass through untouched and known module names
/// map straight to their remote location; everything else is composed
/// segment-wise: leading `../` markers drop trailing parent directories, the
/// child is joined under what remains, and a missing extension gets the
/// default script extension appended.
pub fn resolve(child_ref: &str, parent: &str, ctx: &ResolveContext) -> String {
    let child = child_ref.trim();
    if child.contains("http") {
        return child.to_string();
    }
    if ctx.known_modules.iter().any(|m| m == child) {
        return format!("{}{}", MODULE_URL, child);
    }

    let parent = match ctx.domain.as_deref() {
        Some(domain) => parent.strip_prefix(domain).unwrap_or(parent),
        None => parent,
    };

    let ascents = child.matches("../").count();
    let child = child.replace("../", "");
    let child = child.strip_prefix("./").unwrap_or(&child);

    // Parent segments minus the filename, minus one more per ascent marker.
    let mut segments: Vec<&str> = parent.split('/').filter(|s| !s.is_empty()).collect();
    segments.pop();
    for _ in 0..ascents {
        segments.pop();
    }

    let mut path = String::from("/");
    for segment in segments {
        path.push_str(segment);
        path.push('/');
    }
    path.push_str(child.trim_start_matches('/'));

    if !has_extension(&path) {
        path.push_str(SCRIPT_EXTENSION);
    }

    match ctx.domain.as_deref() {
        Some(domain) => format!("{}{}", domain, path),
        None => path,
    }
}

/// Splits an entry reference into its domain (scheme plus host, when the
/// entry is an absolute URL) and a root-relative path. Child references then
/// resolve against the root-relative form and get re-rooted under the domain.
pub fn split_entry(entry: &str) -> (Option<String>, String) {
    if entry.contains("http") {
        let parts: Vec<&str> = entry.split('/').collect();
        if parts.len() > 3 {
            let domain = parts[..3].join("/");
            let rest = format!("/{}", parts[3..].join("/"));
            return (Some(domain), rest);
        }
    }
    (None, entry.to_string())
}

pub fn has_extension(path: &str) -> bool {
    let last = path.rsplit('/').next().unwrap_or(path);
    match last.rfind('.') {
        Some(dot) if dot + 1 < last.len() => last.len() - dot - 1 < NO_EXTENSION_THRESHOLD,
        _ => false,
    }
}
