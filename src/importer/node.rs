//! One file's resolved identity and build state.

use serde_json::Value;

use crate::config::DEFAULT_NAME;

/// A name bound by an importing file, and the key it was exported under.
/// Default-style references bind the reserved `_default` key.
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub local_name: String,
    pub exported_name: String,
}

/// One file in the dependency graph. Nodes are created the moment a
/// reference is discovered, own their children, and live for the whole
/// session once the build completes.
#[derive(Debug)]
pub struct ImportNode {
    pub canonical_path: String,
    pub bindings: Vec<Binding>,
    pub dependencies: Vec<ImportNode>,
    pub script: Option<String>,
    pub loaded: bool,
}

impl ImportNode {
    pub fn new(canonical_path: String, bindings: Vec<Binding>) -> Self {
        Self {
            canonical_path,
            bindings,
            dependencies: Vec::new(),
            script: None,
            loaded: false,
        }
    }

    /// The root node: no bindings, nothing imports it.
    pub fn entry(canonical_path: String) -> Self {
        Self::new(canonical_path, Vec::new())
    }

    /// The local declarations that replace this node's import statement in
    /// the parent, one registry lookup per bound name.
    pub fn import_stubs(&self) -> String {
        self.bindings
            .iter()
            .map(|binding| {
                format!(
                    "const {} = ei.import('{}', '{}');",
                    binding.local_name, self.canonical_path, binding.exported_name
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Nested `{path: [children...]}` view of the subtree, for debug output
    /// and introspection after the build.
    pub fn dependency_map(&self) -> Value {
        let children = self
            .dependencies
            .iter()
            .map(ImportNode::dependency_map)
            .collect();
        let mut map = serde_json::Map::new();
        map.insert(self.canonical_path.clone(), Value::Array(children));
        Value::Object(map)
    }

    /// The node's executable unit: the rewritten script wrapped in a
    /// strict-mode IIFE so local bindings cannot leak between files. Files
    /// that were imported with bindings but never call the registry (plain
    /// bundles fetched from a remote location) get a shim that forwards
    /// their exports into it. `None` until rewriting has run.
    pub fn wrapped_script(&self) -> Option<String> {
        let script = self.script.as_deref()?;
        if !self.bindings.is_empty() && !script.contains("ei.export") {
            return Some(self.external_module_unit(script));
        }
        Some(iife(script))
    }

    fn external_module_unit(&self, script: &str) -> String {
        if script.contains("typeof exports") && script.contains("typeof module") {
            // CommonJS/UMD-style bundle: feed it module objects and forward
            // both the default and every named key.
            let top = "let exports = {};\nlet module = {};";
            let bottom = format!(
                "ei.export('{}', '{}', module.exports);",
                self.canonical_path, DEFAULT_NAME
            );
            let forward = format!(
                "Object.keys(module.exports).map((key) => ei.export('{}', key, module.exports[key]));",
                self.canonical_path
            );
            return iife(&format!("{}\n{}\n{}\n{}", top, script, bottom, forward));
        }

        // Bundle that attaches itself to the global object: register the
        // global the first binding asked for.
        let binding = &self.bindings[0];
        iife(&format!(
            "const global = window;\n{}\nei.export('{}', '{}', global.{});",
            script, self.canonical_path, DEFAULT_NAME, binding.local_name
        ))
    }
}

fn iife(content: &str) -> String {
    format!("(function () {{\n\"use strict\";\n{}\n}})();\n", content)
}
