//! Declaration rewriting.
//!
//! Transforms one file's text so it can run inside a shared scope: export
//! declarations become plain local declarations followed by registry
//! registrations, and import declarations become registry lookups. The
//! grammar is deliberately narrow (top-level default and named forms only)
//! and is matched with patterns, not an AST; anything that looks like an
//! import/export but survives both passes is a hard error rather than a
//! silent skip.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::DEFAULT_NAME;
use crate::importer::diagnostics::{ImportError, ImportResult};
use crate::importer::node::{Binding, ImportNode};
use crate::importer::resolver::{self, ResolveContext};

static EXPORT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^[ \t]*export[ \t]+([A-Za-z_$][A-Za-z0-9_$]*)(?:[ \t]+([A-Za-z_$][A-Za-z0-9_$]*))?").unwrap()
});
static EXPORT_DEFAULT_STRIP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^([ \t]*)export[ \t]+default[ \t]+").unwrap());
static EXPORT_STRIP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^([ \t]*)export[ \t]+").unwrap());
static IMPORT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)^[ \t]*import[ \t]+([A-Za-z0-9_$,{}\s]*?)[ \t]*from[ \t]*['"]([^'"]+)['"];?"#)
        .unwrap()
});
static IDENT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z_$][A-Za-z0-9_$]*$").unwrap());
static LEFTOVER_IMPORT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t]*import\b[^\n]*\bfrom\b").unwrap());
static LEFTOVER_EXPORT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^[ \t]*export\b").unwrap());

/// One file's rewrite result: the transformed text and the children it
/// references, in discovery order.
#[derive(Debug)]
pub struct Rewritten {
    pub text: String,
    pub imports: Vec<ImportNode>,
}

pub fn rewrite(canonical_path: &str, text: &str, ctx: &ResolveContext) -> ImportResult<Rewritten> {
    let text = rewrite_exports(canonical_path, text)?;
    let (text, imports) = rewrite_imports(canonical_path, &text, ctx)?;

    if let Some(m) = LEFTOVER_IMPORT_RE
        .find(&text)
        .or_else(|| LEFTOVER_EXPORT_RE.find(&text))
    {
        return Err(ImportError::rewrite(
            canonical_path,
            format!("unrecognized declaration: {}", m.as_str().trim()),
        ));
    }

    Ok(Rewritten { text, imports })
}

/// Strips `export` keywords (renaming a default export to the reserved
/// binding) and appends one registration call per exported name.
fn rewrite_exports(canonical_path: &str, text: &str) -> ImportResult<String> {
    let mut registrations = Vec::new();
    for caps in EXPORT_RE.captures_iter(text) {
        let kind = &caps[1];
        if kind == "default" {
            registrations.push(export_call(canonical_path, DEFAULT_NAME, DEFAULT_NAME));
            continue;
        }
        let name = caps.get(2).map(|m| m.as_str()).ok_or_else(|| {
            ImportError::rewrite(
                canonical_path,
                format!("export declaration '{}' has no name", caps[0].trim()),
            )
        })?;
        registrations.push(export_call(canonical_path, name, name));
    }

    if registrations.is_empty() {
        return Ok(text.to_string());
    }

    let stripped = EXPORT_DEFAULT_STRIP_RE.replace(text, format!("${{1}}const {} = ", DEFAULT_NAME));
    let stripped = EXPORT_STRIP_RE.replace_all(&stripped, "$1");
    Ok(format!("{}\n{}", stripped, registrations.join("\n")))
}

fn export_call(path: &str, key: &str, name: &str) -> String {
    format!("ei.export('{}', '{}', {});", path, key, name)
}

/// Replaces import declarations with registry lookups and returns the child
/// nodes they reference.
fn rewrite_imports(
    canonical_path: &str,
    text: &str,
    ctx: &ResolveContext,
) -> ImportResult<(String, Vec<ImportNode>)> {
    let mut imports = Vec::new();
    for caps in IMPORT_RE.captures_iter(text) {
        let bindings = parse_bindings(canonical_path, &caps[1])?;
        let child_path = resolver::resolve(&caps[2], canonical_path, ctx);
        imports.push(ImportNode::new(child_path, bindings));
    }

    if imports.is_empty() {
        return Ok((text.to_string(), imports));
    }

    let stubs: Vec<String> = imports.iter().map(ImportNode::import_stubs).collect();
    let stripped = IMPORT_RE.replace_all(text, "");
    Ok((format!("{}\n{}", stubs.join("\n"), stripped), imports))
}

/// Extracts bindings from the text between `import` and `from`: either a
/// single default identifier or a brace-wrapped named set (no aliasing).
fn parse_bindings(canonical_path: &str, raw: &str) -> ImportResult<Vec<Binding>> {
    let raw = raw.trim();
    if raw.contains('{') {
        let open = raw.find('{').unwrap();
        let close = raw.rfind('}').ok_or_else(|| {
            ImportError::rewrite(canonical_path, format!("unbalanced braces in '{}'", raw))
        })?;
        if close < open {
            return Err(ImportError::rewrite(
                canonical_path,
                format!("unbalanced braces in '{}'", raw),
            ));
        }
        return raw[open + 1..close]
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(|name| {
                if !IDENT_RE.is_match(name) {
                    return Err(ImportError::rewrite(
                        canonical_path,
                        format!("'{}' is not an importable name", name),
                    ));
                }
                Ok(Binding {
                    local_name: name.to_string(),
                    exported_name: name.to_string(),
                })
            })
            .collect();
    }

    if raw.is_empty() {
        return Err(ImportError::rewrite(
            canonical_path,
            "import declaration has no bindings",
        ));
    }
    if !IDENT_RE.is_match(raw) {
        return Err(ImportError::rewrite(
            canonical_path,
            format!("'{}' is not an importable name", raw),
        ));
    }
    Ok(vec![Binding {
        local_name: raw.to_string(),
        exported_name: DEFAULT_NAME.to_string(),
    }])
}
