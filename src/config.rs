//! Session configuration and entry-directive parsing.
//!
//! A build session is configured by a host-provided directive: a `<script>`
//! tag carrying an `import` attribute plus optional knobs (`npm-modules`,
//! `debug`, `cache-all`, and one attribute per known module holding its
//! version/override settings). The CLI can also synthesize the same
//! directive from flags.

use std::collections::HashMap;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use crate::importer::diagnostics::{ImportError, ImportResult};

/// Reserved binding name for default exports.
pub const DEFAULT_NAME: &str = "_default";

/// Remote location bare module names resolve under.
pub const MODULE_URL: &str = "https://unpkg.com/";

/// Module names recognized without being listed in the directive.
pub const DEFAULT_KNOWN_MODULES: &[&str] = &["vue"];

/// Appended to references that resolve without a recognizable extension.
pub const SCRIPT_EXTENSION: &str = ".js";

/// Per-known-module override, parsed from the directive attribute named
/// after the module. Empty strings mean "unset".
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ModuleConfig {
    #[serde(skip)]
    pub module_name: String,
    pub version: String,
    #[serde(alias = "override", alias = "url")]
    pub override_url: String,
}

impl ModuleConfig {
    /// Parses either the JSON form (`{"version": "...", "override": "..."}`)
    /// or the query form (`version=2.6.14&override=https://...`).
    pub fn parse(module_name: &str, raw: &str) -> ImportResult<Self> {
        let raw = raw.trim();
        if raw.starts_with('{') {
            let mut config: ModuleConfig = serde_json::from_str(raw).map_err(|e| {
                ImportError::directive(format!(
                    "invalid JSON override for module '{}': {}",
                    module_name, e
                ))
            })?;
            config.module_name = module_name.to_string();
            return Ok(config);
        }

        let mut config = ModuleConfig {
            module_name: module_name.to_string(),
            ..Default::default()
        };
        for pair in raw.split('&').filter(|p| !p.trim().is_empty()) {
            let (key, value) = pair.split_once('=').ok_or_else(|| {
                ImportError::directive(format!(
                    "override for module '{}' must be key=value pairs, got '{}'",
                    module_name, pair
                ))
            })?;
            match key.trim() {
                "version" => config.version = value.trim().to_string(),
                "override" | "url" => config.override_url = value.trim().to_string(),
                other => {
                    return Err(ImportError::directive(format!(
                        "unknown override key '{}' for module '{}'",
                        other, module_name
                    )));
                }
            }
        }
        Ok(config)
    }
}

#[derive(Debug, Clone)]
pub struct ImporterConfig {
    pub known_modules: Vec<String>,
    pub module_overrides: HashMap<String, ModuleConfig>,
    pub debug: bool,
    /// Cache every fetched file, not just known modules.
    pub cache_all: bool,
    /// Cache known-module fetches (on by default).
    pub cache_modules: bool,
    pub request_timeout: Duration,
    pub refresh_timeout: Duration,
}

impl Default for ImporterConfig {
    fn default() -> Self {
        Self {
            known_modules: DEFAULT_KNOWN_MODULES.iter().map(|m| m.to_string()).collect(),
            module_overrides: HashMap::new(),
            debug: false,
            cache_all: false,
            cache_modules: true,
            request_timeout: Duration::from_secs(10),
            refresh_timeout: Duration::from_secs(30),
        }
    }
}

impl ImporterConfig {
    pub fn is_known_module(&self, name: &str) -> bool {
        self.known_modules.iter().any(|m| m == name)
    }

    /// The known module name behind a canonical path, if any. Overrides never
    /// change the canonical path, so this is a plain prefix match.
    pub fn known_module_for_path<'a>(&'a self, path: &str) -> Option<&'a str> {
        let name = path.strip_prefix(MODULE_URL)?;
        self.known_modules
            .iter()
            .find(|m| m.as_str() == name)
            .map(String::as_str)
    }

    pub fn is_module_path(&self, path: &str) -> bool {
        self.known_module_for_path(path).is_some()
    }

    pub fn module_config_for_path(&self, path: &str) -> Option<&ModuleConfig> {
        let name = self.known_module_for_path(path)?;
        self.module_overrides.get(name)
    }

    fn add_known_modules(&mut self, extra: impl IntoIterator<Item = String>) {
        for name in extra {
            let name = name.trim().to_string();
            if !name.is_empty() && !self.is_known_module(&name) {
                self.known_modules.push(name);
            }
        }
    }
}

/// The host-provided entry instruction: entry reference plus session config.
#[derive(Debug, Clone)]
pub struct EntryDirective {
    pub entry: String,
    pub config: ImporterConfig,
}

static SCRIPT_TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<script\b([^>]*)>").unwrap());
static ATTR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"([A-Za-z_][A-Za-z0-9_-]*)(?:\s*=\s*(?:"([^"]*)"|'([^']*)'))?"#).unwrap()
});

impl EntryDirective {
    pub fn new(entry: impl Into<String>, config: ImporterConfig) -> Self {
        Self {
            entry: entry.into(),
            config,
        }
    }

    /// Scans a page for the first `<script ... import="...">` tag and reads
    /// the directive out of its attributes. A page without one is an error.
    pub fn from_html(html: &str) -> ImportResult<Self> {
        for tag in SCRIPT_TAG_RE.captures_iter(html) {
            let attrs = parse_attributes(&tag[1]);
            if attrs.contains_key("import") {
                return Self::from_attributes(&attrs);
            }
        }
        Err(ImportError::directive("no import script found"))
    }

    fn from_attributes(attrs: &HashMap<String, Option<String>>) -> ImportResult<Self> {
        let entry = attrs
            .get("import")
            .and_then(|v| v.as_deref())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ImportError::directive("import attribute is empty"))?;

        let mut config = ImporterConfig::default();
        if let Some(Some(list)) = attrs.get("npm-modules") {
            config.add_known_modules(parse_module_list(list)?);
        }
        config.debug = attr_flag(attrs, "debug");
        config.cache_all = attr_flag(attrs, "cache-all");

        for name in config.known_modules.clone() {
            if let Some(Some(raw)) = attrs.get(name.as_str()) {
                let module_config = ModuleConfig::parse(&name, raw)?;
                config.module_overrides.insert(name, module_config);
            }
        }

        Ok(Self::new(entry, config))
    }
}

fn parse_attributes(tag_body: &str) -> HashMap<String, Option<String>> {
    let mut attrs = HashMap::new();
    for caps in ATTR_RE.captures_iter(tag_body) {
        let name = caps[1].to_ascii_lowercase();
        let value = caps
            .get(2)
            .or_else(|| caps.get(3))
            .map(|m| m.as_str().to_string());
        attrs.entry(name).or_insert(value);
    }
    attrs
}

fn attr_flag(attrs: &HashMap<String, Option<String>>, name: &str) -> bool {
    match attrs.get(name) {
        Some(Some(value)) => value != "false",
        Some(None) => true,
        None => false,
    }
}

/// Accepts a JSON array (`["moment", "lodash"]`) or a comma list.
fn parse_module_list(raw: &str) -> ImportResult<Vec<String>> {
    let raw = raw.trim();
    if raw.starts_with('[') {
        return serde_json::from_str(raw)
            .map_err(|e| ImportError::directive(format!("invalid npm-modules list: {}", e)));
    }
    Ok(raw.split(',').map(|m| m.trim().to_string()).collect())
}
