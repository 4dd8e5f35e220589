//! Static import sandbox.
//!
//! Plugin source is scanned, never executed, before its factory may
//! run.  Every `use` / `extern crate` declaration is expanded (groups,
//! renames, globs) and each resulting path must clear two fences:
//!
//! 1. **Denylist** — engine/oms/port/broker/runtime internals, process
//!    and network facilities, async runtimes, databases.  A hit names the
//!    symbol and its line.
//! 2. **Allowlist** — core types, strategy/policy surfaces, and a small
//!    set of pure-compute modules.  Anything not explicitly allowed is
//!    rejected as unknown.
//!
//! The scanner is a line-oriented tokenizer, not a full parser: it strips
//! comments, accumulates each declaration up to its terminating `;`, and
//! expands the use-tree.  That is sufficient because `use` items are
//! syntactically flat, and over-rejection (e.g. inside a string literal
//! spanning lines) fails safe.

use std::fmt;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StrategySandboxError {
    /// The import matches a denylist prefix.
    Denylisted { symbol: String, line: usize },
    /// The import matches no allowlist prefix.
    UnknownImport { symbol: String, line: usize },
}

impl StrategySandboxError {
    pub fn symbol(&self) -> &str {
        match self {
            StrategySandboxError::Denylisted { symbol, .. }
            | StrategySandboxError::UnknownImport { symbol, .. } => symbol,
        }
    }

    pub fn line(&self) -> usize {
        match self {
            StrategySandboxError::Denylisted { line, .. }
            | StrategySandboxError::UnknownImport { line, .. } => *line,
        }
    }
}

impl fmt::Display for StrategySandboxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategySandboxError::Denylisted { symbol, line } => {
                write!(f, "denylisted import '{symbol}' at line {line}")
            }
            StrategySandboxError::UnknownImport { symbol, line } => {
                write!(
                    f,
                    "import '{symbol}' at line {line} is not on the allowlist"
                )
            }
        }
    }
}

impl std::error::Error for StrategySandboxError {}

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// Allow/deny prefix lists.  A prefix matches a path when it equals the
/// path or is followed by `::`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SandboxPolicy {
    pub allow_prefixes: Vec<String>,
    pub deny_prefixes: Vec<String>,
}

impl Default for SandboxPolicy {
    fn default() -> Self {
        let allow = [
            // module-local paths
            "self",
            "super",
            "crate",
            // the plugin surface
            "qx_schemas",
            "qx_strategy",
            "qx_policy",
            // pure compute
            "std::borrow",
            "std::cmp",
            "std::collections",
            "std::convert",
            "std::fmt",
            "std::hash",
            "std::iter",
            "std::marker",
            "std::num",
            "std::ops",
            "std::option",
            "std::result",
            "std::slice",
            "std::str",
            "std::string",
            "std::vec",
            "core",
            "alloc",
            "serde",
            "serde_json",
            "chrono",
            "uuid",
        ];
        let deny = [
            // runtime internals a strategy must never reach
            "qx_engine",
            "qx_oms",
            "qx_ports",
            "qx_marketdata",
            "qx_artifacts",
            "qx_broker_paper",
            "qx_runtime",
            "qx_cli",
            // process / machine facilities
            "std::env",
            "std::fs",
            "std::io",
            "std::net",
            "std::os",
            "std::process",
            "std::thread",
            // transports, async runtimes, storage, messaging
            "tokio",
            "async_std",
            "reqwest",
            "hyper",
            "ureq",
            "axum",
            "tonic",
            "sqlx",
            "rusqlite",
            "diesel",
            "redis",
            "rdkafka",
            "lapin",
        ];
        Self {
            allow_prefixes: allow.iter().map(|s| s.to_string()).collect(),
            deny_prefixes: deny.iter().map(|s| s.to_string()).collect(),
        }
    }
}

fn prefix_matches(path: &str, prefix: &str) -> bool {
    path == prefix || path.starts_with(&format!("{prefix}::"))
}

// ---------------------------------------------------------------------------
// Scanner
// ---------------------------------------------------------------------------

/// One expanded import path with the 1-based line of its declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportedSymbol {
    pub path: String,
    pub line: usize,
}

/// Expand every `use` / `extern crate` declaration in `source`.
pub fn scan_imports(source: &str) -> Vec<ImportedSymbol> {
    let mut out = Vec::new();
    let mut in_block_comment = false;

    let mut pending: Option<(usize, String)> = None; // (start line, accumulated text)

    for (idx, raw_line) in source.lines().enumerate() {
        let line_no = idx + 1;
        let cleaned = strip_comments(raw_line, &mut in_block_comment);
        let trimmed = cleaned.trim();

        if let Some((start, acc)) = pending.as_mut() {
            acc.push(' ');
            acc.push_str(trimmed);
            if acc.contains(';') {
                let (start, acc) = (*start, acc.clone());
                pending = None;
                expand_declaration(&acc, start, &mut out);
            }
            continue;
        }

        let is_use = trimmed.starts_with("use ")
            || trimmed.starts_with("pub use ")
            || trimmed.starts_with("pub(crate) use ")
            || trimmed.starts_with("pub(super) use ")
            || trimmed.starts_with("extern crate ");
        if !is_use {
            continue;
        }

        if trimmed.contains(';') {
            expand_declaration(trimmed, line_no, &mut out);
        } else {
            pending = Some((line_no, trimmed.to_string()));
        }
    }

    out
}

/// Check a plugin source against the sandbox policy.
///
/// Denylist hits win over allowlist misses so the error is as specific as
/// possible.
pub fn check_source(
    source: &str,
    policy: &SandboxPolicy,
) -> Result<Vec<ImportedSymbol>, StrategySandboxError> {
    let imports = scan_imports(source);
    for import in &imports {
        if policy
            .deny_prefixes
            .iter()
            .any(|p| prefix_matches(&import.path, p))
        {
            return Err(StrategySandboxError::Denylisted {
                symbol: import.path.clone(),
                line: import.line,
            });
        }
        if !policy
            .allow_prefixes
            .iter()
            .any(|p| prefix_matches(&import.path, p))
        {
            return Err(StrategySandboxError::UnknownImport {
                symbol: import.path.clone(),
                line: import.line,
            });
        }
    }
    Ok(imports)
}

// Strip `//` and `/* */` comment content from one line.
fn strip_comments(line: &str, in_block: &mut bool) -> String {
    let mut out = String::with_capacity(line.len());
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        if *in_block {
            if c == '*' && chars.peek() == Some(&'/') {
                chars.next();
                *in_block = false;
            }
        } else if c == '/' && chars.peek() == Some(&'*') {
            chars.next();
            *in_block = true;
        } else if c == '/' && chars.peek() == Some(&'/') {
            break;
        } else {
            out.push(c);
        }
    }
    out
}

fn expand_declaration(stmt: &str, line: usize, out: &mut Vec<ImportedSymbol>) {
    let stmt = stmt.trim();
    let body = if let Some(rest) = stmt
        .strip_prefix("pub(crate) use ")
        .or_else(|| stmt.strip_prefix("pub(super) use "))
        .or_else(|| stmt.strip_prefix("pub use "))
        .or_else(|| stmt.strip_prefix("use "))
    {
        rest
    } else if let Some(rest) = stmt.strip_prefix("extern crate ") {
        rest
    } else {
        return;
    };

    let body = body.split(';').next().unwrap_or(body).trim();
    let mut paths = Vec::new();
    expand_use_tree("", body, &mut paths);
    for path in paths {
        out.push(ImportedSymbol { path, line });
    }
}

// Recursively expand a use tree ("a::{b, c::d}" etc.) into full paths.
fn expand_use_tree(prefix: &str, tree: &str, out: &mut Vec<String>) {
    let tree = tree.trim();
    if tree.is_empty() {
        return;
    }

    if let Some(inner) = tree.strip_prefix('{').and_then(|t| t.strip_suffix('}')) {
        for item in split_top_level_commas(inner) {
            expand_use_tree(prefix, &item, out);
        }
        return;
    }

    if let Some(brace_start) = tree.find("::{") {
        if tree.ends_with('}') {
            let head = &tree[..brace_start];
            let inner = &tree[brace_start + 3..tree.len() - 1];
            let joined = join_path(prefix, head);
            for item in split_top_level_commas(inner) {
                expand_use_tree(&joined, &item, out);
            }
            return;
        }
    }

    // Leaf: strip a rename, collapse globs onto their parent path.
    let leaf = tree.split_whitespace().next().unwrap_or(tree);
    let leaf = leaf.strip_suffix("::*").unwrap_or(leaf);
    if leaf == "*" {
        if !prefix.is_empty() {
            out.push(prefix.to_string());
        }
        return;
    }
    out.push(join_path(prefix, leaf));
}

fn join_path(prefix: &str, part: &str) -> String {
    if prefix.is_empty() {
        part.to_string()
    } else {
        format!("{prefix}::{part}")
    }
}

fn split_top_level_commas(s: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();
    for c in s.chars() {
        match c {
            '{' => {
                depth += 1;
                current.push(c);
            }
            '}' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            ',' if depth == 0 => {
                parts.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        parts.push(current.trim().to_string());
    }
    parts
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
