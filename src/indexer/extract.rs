//! Extraction collaborator: source text in, typed tuples out.
//!
//! The engine only depends on the [`Extractor`] trait. The bundled
//! [`RegexExtractor`] is a deliberately small line-pattern implementation
//! covering top-level declarations and relative import edges for Rust,
//! TypeScript/JavaScript and Python, so the CLI works end to end without a
//! parser toolchain. Endpoint candidates it emits for files that do not
//! exist are dropped by the engine, which is why it may emit several
//! resolution candidates per import.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::Result;
use crate::store::models::{module_key, EntityKind, RelationType};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclaredSymbol {
    pub name: String,
    pub kind: EntityKind,
    pub signature: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawRelation {
    pub rel_type: RelationType,
    pub src: String,
    pub dst: String,
    pub meta: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub symbols: Vec<DeclaredSymbol>,
    pub relations: Vec<RawRelation>,
}

/// Pure extraction interface: never reflects over live objects, never touches
/// the filesystem.
pub trait Extractor {
    fn extract(&self, rel_path: &str, source: &str) -> Result<Extraction>;
}

// -- default implementation -------------------------------------------------

static RUST_FN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^(?:pub(?:\([^)]*\))?\s+)?(async\s+)?fn\s+([A-Za-z_][A-Za-z0-9_]*)\s*\(([^)]*)")
        .unwrap()
});
static RUST_TYPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^(?:pub(?:\([^)]*\))?\s+)?(?:struct|enum|trait)\s+([A-Za-z_][A-Za-z0-9_]*)")
        .unwrap()
});
static RUST_CONST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^(?:pub(?:\([^)]*\))?\s+)?(?:const|static)\s+([A-Za-z_][A-Za-z0-9_]*)\s*:")
        .unwrap()
});
static RUST_MOD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^(?:pub(?:\([^)]*\))?\s+)?mod\s+([A-Za-z_][A-Za-z0-9_]*)\s*;").unwrap());

static TS_FN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?m)^(?:export\s+)?(?:default\s+)?(async\s+)?function\s*\*?\s*([A-Za-z_$][A-Za-z0-9_$]*)\s*\(([^)]*)",
    )
    .unwrap()
});
static TS_CLASS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^(?:export\s+)?(?:default\s+)?(?:abstract\s+)?class\s+([A-Za-z_$][A-Za-z0-9_$]*)")
        .unwrap()
});
static TS_CONST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^(?:export\s+)?(?:const|let|var)\s+([A-Za-z_$][A-Za-z0-9_$]*)\s*=").unwrap()
});
static TS_IMPORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)^\s*import\s+[^;'"]*?from\s+['"]([^'"]+)['"]|require\(\s*['"]([^'"]+)['"]"#)
        .unwrap()
});

static PY_DEF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^(async\s+)?def\s+([A-Za-z_][A-Za-z0-9_]*)\s*\(([^)]*)").unwrap());
static PY_CLASS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^class\s+([A-Za-z_][A-Za-z0-9_]*)").unwrap());
static PY_CONST: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^([A-Z_][A-Z0-9_]*)\s*=").unwrap());
static PY_IMPORT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^from\s+(\.+[A-Za-z0-9_.]*)\s+import").unwrap());

#[derive(Debug, Default)]
pub struct RegexExtractor;

impl RegexExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl Extractor for RegexExtractor {
    fn extract(&self, rel_path: &str, source: &str) -> Result<Extraction> {
        let ext = rel_path.rsplit('.').next().unwrap_or("");
        let out = match ext {
            "rs" => extract_rust(rel_path, source),
            "ts" | "tsx" | "js" | "jsx" => extract_typescript(rel_path, source),
            "py" => extract_python(rel_path, source),
            _ => Extraction::default(),
        };
        Ok(out)
    }
}

fn function_signature(params: &str, is_async: bool) -> String {
    let count = params
        .split(',')
        .map(str::trim)
        .filter(|p| {
            !p.is_empty()
                && !matches!(*p, "self" | "&self" | "&mut self" | "mut self" | "cls")
        })
        .count();
    format!("params={count};async={is_async}")
}

fn extract_rust(rel_path: &str, source: &str) -> Extraction {
    let mut out = Extraction::default();

    for caps in RUST_FN.captures_iter(source) {
        out.symbols.push(DeclaredSymbol {
            name: caps[2].to_string(),
            kind: EntityKind::Function,
            signature: Some(function_signature(&caps[3], caps.get(1).is_some())),
        });
    }
    for caps in RUST_TYPE.captures_iter(source) {
        out.symbols.push(DeclaredSymbol {
            name: caps[1].to_string(),
            kind: EntityKind::Class,
            signature: None,
        });
    }
    for caps in RUST_CONST.captures_iter(source) {
        out.symbols.push(DeclaredSymbol {
            name: caps[1].to_string(),
            kind: EntityKind::Variable,
            signature: None,
        });
    }

    let src_key = module_key(rel_path);
    let dir = parent_dir(rel_path);
    for caps in RUST_MOD.captures_iter(source) {
        let name = &caps[1];
        // Both layouts are emitted; the engine keeps whichever exists.
        for candidate in [
            join_normalized(&dir, &format!("{name}.rs")),
            join_normalized(&dir, &format!("{name}/mod.rs")),
        ]
        .into_iter()
        .flatten()
        {
            out.relations.push(RawRelation {
                rel_type: RelationType::Imports,
                src: src_key.clone(),
                dst: module_key(&candidate),
                meta: None,
            });
        }
    }
    out
}

fn extract_typescript(rel_path: &str, source: &str) -> Extraction {
    let mut out = Extraction::default();

    for caps in TS_FN.captures_iter(source) {
        out.symbols.push(DeclaredSymbol {
            name: caps[2].to_string(),
            kind: EntityKind::Function,
            signature: Some(function_signature(&caps[3], caps.get(1).is_some())),
        });
    }
    for caps in TS_CLASS.captures_iter(source) {
        out.symbols.push(DeclaredSymbol {
            name: caps[1].to_string(),
            kind: EntityKind::Class,
            signature: None,
        });
    }
    for caps in TS_CONST.captures_iter(source) {
        out.symbols.push(DeclaredSymbol {
            name: caps[1].to_string(),
            kind: EntityKind::Variable,
            signature: None,
        });
    }

    let src_key = module_key(rel_path);
    let dir = parent_dir(rel_path);
    for caps in TS_IMPORT.captures_iter(source) {
        let spec = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str())
            .unwrap_or("");
        if !spec.starts_with("./") && !spec.starts_with("../") {
            continue; // bare specifiers resolve outside the project
        }
        for candidate in import_candidates(&dir, spec) {
            out.relations.push(RawRelation {
                rel_type: RelationType::Imports,
                src: src_key.clone(),
                dst: module_key(&candidate),
                meta: None,
            });
        }
    }
    out
}

fn extract_python(rel_path: &str, source: &str) -> Extraction {
    let mut out = Extraction::default();

    for caps in PY_DEF.captures_iter(source) {
        out.symbols.push(DeclaredSymbol {
            name: caps[2].to_string(),
            kind: EntityKind::Function,
            signature: Some(function_signature(&caps[3], caps.get(1).is_some())),
        });
    }
    for caps in PY_CLASS.captures_iter(source) {
        out.symbols.push(DeclaredSymbol {
            name: caps[1].to_string(),
            kind: EntityKind::Class,
            signature: None,
        });
    }
    for caps in PY_CONST.captures_iter(source) {
        out.symbols.push(DeclaredSymbol {
            name: caps[1].to_string(),
            kind: EntityKind::Variable,
            signature: None,
        });
    }

    let src_key = module_key(rel_path);
    let dir = parent_dir(rel_path);
    for caps in PY_IMPORT.captures_iter(source) {
        let spec = &caps[1];
        let dots = spec.chars().take_while(|c| *c == '.').count();
        let tail = &spec[dots..];
        // One leading dot is the current package; each further dot ascends.
        let mut base = dir.clone();
        for _ in 1..dots {
            match base.rfind('/') {
                Some(idx) => base.truncate(idx),
                None if !base.is_empty() => base.clear(),
                None => return out, // relative import escapes the project
            }
        }
        let stem = tail.replace('.', "/");
        for candidate in [
            join_normalized(&base, &format!("{stem}.py")),
            join_normalized(&base, &format!("{stem}/__init__.py")),
        ]
        .into_iter()
        .flatten()
        {
            out.relations.push(RawRelation {
                rel_type: RelationType::Imports,
                src: src_key.clone(),
                dst: module_key(&candidate),
                meta: None,
            });
        }
    }
    out
}

fn parent_dir(rel_path: &str) -> String {
    match rel_path.rfind('/') {
        Some(idx) => rel_path[..idx].to_string(),
        None => String::new(),
    }
}

/// Joins `spec` onto `base_dir` and normalizes `.`/`..` segments. Returns
/// None if the result would escape the project root.
fn join_normalized(base_dir: &str, spec: &str) -> Option<String> {
    let mut parts: Vec<&str> = if base_dir.is_empty() {
        Vec::new()
    } else {
        base_dir.split('/').collect()
    };
    for segment in spec.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            other => parts.push(other),
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Resolution candidates for a relative JS/TS import specifier.
fn import_candidates(base_dir: &str, spec: &str) -> Vec<String> {
    let Some(resolved) = join_normalized(base_dir, spec) else {
        return Vec::new();
    };
    let has_ext = resolved
        .rsplit('/')
        .next()
        .map(|name| name.contains('.'))
        .unwrap_or(false);
    if has_ext {
        return vec![resolved];
    }
    let mut candidates = Vec::new();
    for ext in ["ts", "tsx", "js", "jsx"] {
        candidates.push(format!("{resolved}.{ext}"));
    }
    for ext in ["ts", "js"] {
        candidates.push(format!("{resolved}/index.{ext}"));
    }
    candidates
}
