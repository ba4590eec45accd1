//! # Macro Substitution
//!
//! Prototype templates reference row values through low-level discovery
//! macros such as `{#FSNAME}`. Substitution is a pure function of the
//! template, the row and the *context* the template is used in:
//!
//! - `Text`: every macro is replaced verbatim.
//! - `ItemKey`: only macros inside the bracketed parameter list are replaced,
//!   and replaced parameters are quoted when their value would otherwise
//!   break the key syntax.
//! - `SnmpOid`: like `ItemKey` when the OID carries a parameter list,
//!   otherwise like `Text`.
//! - `Formula`: calculated item formulas; the first argument of each
//!   function call is an item key, the other arguments are text.
//!
//! Unknown macros are left in place. The output is raw bytes because row
//! values may not be valid UTF-8.

use crate::row::Row;

/// The kind of field a template renders into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MacroContext {
    Text,
    ItemKey,
    SnmpOid,
    Formula,
}

/// Resolves prototype templates against a discovered row.
pub trait MacroResolver {
    /// Render `template` with the macros of `row`.
    fn substitute(&self, template: &str, row: &Row, context: MacroContext) -> Vec<u8>;
}

/// The default `{#MACRO}` resolver.
#[derive(Debug, Clone, Copy, Default)]
pub struct LldMacros;

impl MacroResolver for LldMacros {
    fn substitute(&self, template: &str, row: &Row, context: MacroContext) -> Vec<u8> {
        let src = template.as_bytes();
        let mut out = Vec::with_capacity(src.len());
        match context {
            MacroContext::Text => substitute_text(src, row, &mut out),
            MacroContext::ItemKey => substitute_key(src, row, &mut out),
            MacroContext::SnmpOid => {
                if src.contains(&b'[') {
                    substitute_key(src, row, &mut out);
                } else {
                    substitute_text(src, row, &mut out);
                }
            }
            MacroContext::Formula => substitute_formula(src, row, &mut out),
        }
        out
    }
}

// =============================================================================
// TEXT
// =============================================================================

/// Length of a well-formed `{#NAME}` macro starting at `pos`, if any.
fn macro_len(src: &[u8], pos: usize) -> Option<usize> {
    let rest = src.get(pos..)?;
    if !rest.starts_with(b"{#") {
        return None;
    }
    let mut len = 2;
    while let Some(&c) = rest.get(len) {
        match c {
            b'}' if len > 2 => return Some(len + 1),
            b'A'..=b'Z' | b'0'..=b'9' | b'_' | b'.' => len += 1,
            _ => return None,
        }
    }
    None
}

/// Replace every known macro in `src`, passing `escape` each value.
fn substitute_with(src: &[u8], row: &Row, out: &mut Vec<u8>, escape: fn(&[u8], &mut Vec<u8>)) {
    let mut pos = 0;
    while pos < src.len() {
        if let Some(len) = macro_len(src, pos) {
            let name = &src[pos..pos + len];
            let value = std::str::from_utf8(name).ok().and_then(|n| row.get(n));
            if let Some(value) = value {
                escape(value, out);
            } else {
                out.extend_from_slice(name);
            }
            pos += len;
        } else {
            out.push(src[pos]);
            pos += 1;
        }
    }
}

fn verbatim(value: &[u8], out: &mut Vec<u8>) {
    out.extend_from_slice(value);
}

fn escape_quotes(value: &[u8], out: &mut Vec<u8>) {
    for &c in value {
        if c == b'"' {
            out.push(b'\\');
        }
        out.push(c);
    }
}

fn substitute_text(src: &[u8], row: &Row, out: &mut Vec<u8>) {
    substitute_with(src, row, out, verbatim);
}

// =============================================================================
// ITEM KEY
// =============================================================================

/// Substitute macros in an item key such as `vfs.fs.size[{#FSNAME},free]`.
///
/// The key name is copied verbatim; parameters are parsed so that quoting is
/// preserved and added where needed.
fn substitute_key(src: &[u8], row: &Row, out: &mut Vec<u8>) {
    let Some(open) = src.iter().position(|&c| c == b'[') else {
        out.extend_from_slice(src);
        return;
    };
    out.extend_from_slice(&src[..=open]);
    let end = substitute_params(src, open + 1, 0, row, out);
    out.extend_from_slice(&src[end..]);
}

/// Whether an unquoted parameter value must be quoted to stay one parameter.
fn needs_quotes(value: &[u8]) -> bool {
    matches!(value.first(), Some(b'"' | b' ' | b'['))
        || value.iter().any(|&c| c == b',' || c == b']')
}

/// Parse a parameter list starting after `[`; returns the position after the
/// closing `]` (or the end of input for malformed keys).
fn substitute_params(src: &[u8], mut pos: usize, level: usize, row: &Row, out: &mut Vec<u8>) -> usize {
    loop {
        while src.get(pos) == Some(&b' ') {
            out.push(b' ');
            pos += 1;
        }
        match src.get(pos) {
            None => return pos,
            Some(b'"') => {
                let end = closing_quote(src, pos + 1);
                out.push(b'"');
                substitute_with(&src[pos + 1..end], row, out, escape_quotes);
                if end < src.len() {
                    out.push(b'"');
                    pos = end + 1;
                } else {
                    pos = end;
                }
            }
            Some(b'[') if level == 0 => {
                out.push(b'[');
                pos = substitute_params(src, pos + 1, level + 1, row, out);
            }
            Some(_) => {
                let end = src[pos..]
                    .iter()
                    .position(|&c| c == b',' || c == b']')
                    .map_or(src.len(), |p| pos + p);
                let raw = &src[pos..end];
                let mut value = Vec::with_capacity(raw.len());
                substitute_text(raw, row, &mut value);
                if value != raw && needs_quotes(&value) {
                    out.push(b'"');
                    escape_quotes(&value, out);
                    out.push(b'"');
                } else {
                    out.extend_from_slice(&value);
                }
                pos = end;
            }
        }
        while src.get(pos) == Some(&b' ') {
            out.push(b' ');
            pos += 1;
        }
        match src.get(pos) {
            None => return pos,
            Some(b',') => {
                out.push(b',');
                pos += 1;
            }
            Some(b']') => {
                out.push(b']');
                return pos + 1;
            }
            Some(_) => {
                out.extend_from_slice(&src[pos..]);
                return src.len();
            }
        }
    }
}

/// Position of the quote closing a quoted parameter that starts at `pos`.
fn closing_quote(src: &[u8], mut pos: usize) -> usize {
    while pos < src.len() {
        match src[pos] {
            b'\\' if src.get(pos + 1) == Some(&b'"') => pos += 2,
            b'"' => return pos,
            _ => pos += 1,
        }
    }
    src.len()
}

// =============================================================================
// FORMULA
// =============================================================================

/// Substitute macros in a calculated item formula, e.g.
/// `last("vfs.fs.size[{#FSNAME},used]")/last(vfs.fs.size[{#FSNAME},total])`.
fn substitute_formula(src: &[u8], row: &Row, out: &mut Vec<u8>) {
    let mut pos = 0;
    while pos < src.len() {
        if let Some(len) = macro_len(src, pos) {
            substitute_text(&src[pos..pos + len], row, out);
            pos += len;
            continue;
        }
        let ident = src[pos..]
            .iter()
            .take_while(|c| c.is_ascii_alphabetic())
            .count();
        if ident > 0 && src.get(pos + ident) == Some(&b'(') {
            out.extend_from_slice(&src[pos..=pos + ident]);
            pos = substitute_call(src, pos + ident + 1, row, out);
        } else if ident > 0 {
            out.extend_from_slice(&src[pos..pos + ident]);
            pos += ident;
        } else {
            out.push(src[pos]);
            pos += 1;
        }
    }
}

/// Substitute the arguments of a function call starting after `(`.
fn substitute_call(src: &[u8], mut pos: usize, row: &Row, out: &mut Vec<u8>) -> usize {
    let mut index = 0;
    loop {
        let end = argument_end(src, pos);
        let arg = &src[pos..end];
        if index == 0 {
            substitute_key_argument(arg, row, out);
        } else {
            substitute_text(arg, row, out);
        }
        match src.get(end) {
            Some(b',') => {
                out.push(b',');
                pos = end + 1;
                index += 1;
            }
            Some(b')') => {
                out.push(b')');
                return end + 1;
            }
            _ => return end,
        }
    }
}

/// End of a function argument: the next top-level `,` or `)`.
fn argument_end(src: &[u8], mut pos: usize) -> usize {
    let mut depth = 0usize;
    while pos < src.len() {
        match src[pos] {
            b'"' => pos = closing_quote(src, pos + 1).saturating_add(1),
            b'[' => {
                depth += 1;
                pos += 1;
            }
            b']' => {
                depth = depth.saturating_sub(1);
                pos += 1;
            }
            b',' | b')' if depth == 0 => return pos,
            _ => pos += 1,
        }
    }
    src.len()
}

/// The item key argument of a formula function, quoted or not.
fn substitute_key_argument(arg: &[u8], row: &Row, out: &mut Vec<u8>) {
    let start = arg.iter().take_while(|&&c| c == b' ').count();
    let body = &arg[start..];
    out.extend_from_slice(&arg[..start]);
    if body.first() != Some(&b'"') {
        substitute_key(body, row, out);
        return;
    }
    let close = closing_quote(body, 1);
    let unquoted = unescape_quotes(&body[1..close]);
    let mut key = Vec::with_capacity(unquoted.len());
    substitute_key(&unquoted, row, &mut key);
    out.push(b'"');
    escape_quotes(&key, out);
    out.push(b'"');
    if close < body.len() {
        out.extend_from_slice(&body[close + 1..]);
    }
}

fn unescape_quotes(src: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(src.len());
    let mut pos = 0;
    while pos < src.len() {
        if src[pos] == b'\\' && src.get(pos + 1) == Some(&b'"') {
            out.push(b'"');
            pos += 2;
        } else {
            out.push(src[pos]);
            pos += 1;
        }
    }
    out
}
