// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Package import path matching. A pattern is a literal path in which
//! `...` means "any string"; there is no other special syntax. A
//! trailing `/...` may also match the empty string, so `net/...`
//! matches both `net` and `net/http`.

use anyhow::Result;
use regex::Regex;

/// Compiled set of package patterns. An empty set matches everything.
#[derive(Clone, Debug, Default)]
pub struct PackageFilter {
    patterns: Vec<Regex>,
}

impl PackageFilter {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|p| pattern_to_regex(p.as_ref()))
            .collect::<Result<_>>()?;

        Ok(Self { patterns })
    }

    pub fn matches(&self, import_path: &str) -> bool {
        if self.patterns.is_empty() {
            return true;
        }

        self.patterns.iter().any(|re| re.is_match(import_path))
    }
}

/// One-shot check of a single pattern against a single import path.
pub fn match_simple_pattern(pattern: &str, import_path: &str) -> Result<bool> {
    Ok(pattern_to_regex(pattern)?.is_match(import_path))
}

// Translating to an anchored regex instead of hand-rolling a glob
// matcher keeps matching linear in pattern plus input length.
fn pattern_to_regex(pattern: &str) -> Result<Regex> {
    // NUL never appears in an import path, so a pattern containing one
    // can never match anything.
    if pattern.contains('\0') {
        return Ok(Regex::new(r"[^\s\S]")?);
    }

    let mut expr = regex::escape(pattern);

    // A trailing /... may match nothing at all, so net/... matches
    // net itself; same for a leading .../ and the bare suffix.
    if let Some(prefix) = expr.strip_suffix(r"/\.\.\.") {
        expr = format!("{prefix}(/\\.\\.\\.)?");
    }
    if let Some(suffix) = expr.strip_prefix(r"\.\.\./") {
        expr = format!("(\\.\\.\\./)?{suffix}");
    }
    let expr = expr.replace(r"\.\.\.", ".*");

    Ok(Regex::new(&format!("^{expr}$"))?)
}
