//! The shared module registry and final-script assembly.
//!
//! At execution time every rewritten file talks to one object, `ei`: export
//! rewrites call `ei.export(path, key, value)` and import rewrites call
//! `ei.import(path, key)`. The JS prelude below installs that object in the
//! host; [`ModuleRegistry`] mirrors the same contract on the Rust side for
//! embedding hosts that drive registration themselves.

use std::collections::{HashMap, HashSet};

use serde_json::Value;

use crate::importer::diagnostics::{ImportError, ImportResult};

/// Installed once at the top of every assembled program. A lookup for a path
/// that never registered is a usage error and lists what is known.
pub const REGISTRY_PRELUDE: &str = r#"window.ei = (function () {
    let imports = {};
    return {
        import: importer,
        export: exporter,
        imports: imports
    };
    function exporter(path, key, obj) {
        imports[path] = imports[path] || {};
        imports[path][key] = obj;
    }
    function importer(path, key) {
        if (imports[path] == null) {
            console.error('Unknown module ' + path + '. Registered modules: ' + Object.keys(imports).join(', '));
            throw new Error('Module not registered: ' + path);
        }
        if (key) {
            return imports[path][key];
        }
        return imports[path];
    }
})();
"#;

/// Two-level `(path, key) -> value` table, last write wins.
#[derive(Debug, Default)]
pub struct ModuleRegistry {
    modules: HashMap<String, HashMap<String, Value>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn export(&mut self, path: &str, key: &str, value: Value) {
        self.modules
            .entry(path.to_string())
            .or_default()
            .insert(key.to_string(), value);
    }

    /// Looks up one binding, or the whole per-path bindings object when
    /// `key` is `None`. Missing paths and missing keys are errors, not
    /// silent `undefined`s.
    pub fn import(&self, path: &str, key: Option<&str>) -> ImportResult<Value> {
        let bindings = self
            .modules
            .get(path)
            .ok_or_else(|| ImportError::registry_missing_path(path, self.known_paths()))?;

        match key {
            Some(key) => bindings.get(key).cloned().ok_or_else(|| {
                let mut available: Vec<String> = bindings.keys().cloned().collect();
                available.sort();
                ImportError::registry_missing_key(path, key, available)
            }),
            None => {
                let map = bindings
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                Ok(Value::Object(map))
            }
        }
    }

    pub fn known_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.modules.keys().cloned().collect();
        paths.sort();
        paths
    }
}

/// Accumulates executable units in completion order, one per canonical path.
/// A path that was already appended is never appended twice, which is what
/// makes diamond-shaped graphs assemble each file once.
#[derive(Debug, Default)]
pub struct Assembler {
    parts: Vec<String>,
    added: HashSet<String>,
}

impl Assembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when the path was already assembled.
    pub fn append(&mut self, path: &str, unit: &str) -> bool {
        if !self.added.insert(path.to_string()) {
            return false;
        }
        self.parts.push(unit.to_string());
        true
    }

    pub fn contains(&self, path: &str) -> bool {
        self.added.contains(path)
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// The composed program: registry prelude first, then every unit in the
    /// order it finished registering.
    pub fn final_script(&self) -> String {
        let mut script = String::from(REGISTRY_PRELUDE);
        for part in &self.parts {
            script.push_str(part);
        }
        script
    }
}
