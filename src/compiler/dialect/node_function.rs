//! Parsed native shader functions.

use std::fmt;

use serde::Serialize;

use crate::compiler::error::{BuildError, BuildResult};
use crate::compiler::types::{Dialect, NodeType};

/// Parameter passing mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamQualifier {
    In,
    Out,
    InOut,
}

impl ParamQualifier {
    /// Callers must pass an assignable variable.
    pub fn is_output(self) -> bool {
        !matches!(self, ParamQualifier::In)
    }
}

/// One declared parameter of a native function.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct NodeFunctionInput {
    pub name: String,
    pub ty: NodeType,
    pub qualifier: ParamQualifier,
    pub is_const: bool,
    /// Array length for `float weights[4]` style parameters.
    pub count: Option<u32>,
}

impl NodeFunctionInput {
    /// Type of the value a caller supplies.
    pub fn value_type(&self) -> NodeType {
        match self.count {
            Some(n) => NodeType::Array(Box::new(self.ty.clone()), n),
            None => self.ty.clone(),
        }
    }
}

/// A native function in its source dialect.
pub trait NodeFunction: fmt::Debug + Send + Sync {
    fn dialect(&self) -> Dialect;

    fn name(&self) -> &str;

    fn return_type(&self) -> &NodeType;

    fn inputs(&self) -> &[NodeFunctionInput];

    /// Full declaration in the source dialect, emitted under `name`.
    fn code(&self, name: &str) -> String;
}

/// Turns native source text into a [`NodeFunction`].
pub trait NodeParser: Send + Sync {
    fn parse_function(&self, source: &str) -> BuildResult<Box<dyn NodeFunction>>;
}

/// Strip `//` and `/* */` comments, keeping byte offsets stable by replacing them with spaces.
pub(crate) fn blank_comments(source: &str) -> String {
    let bytes = source.as_bytes();
    let mut out = String::with_capacity(source.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'/' && i + 1 < bytes.len() && bytes[i + 1] == b'/' {
            while i < bytes.len() && bytes[i] != b'\n' {
                out.push(' ');
                i += 1;
            }
            continue;
        }
        if bytes[i] == b'/' && i + 1 < bytes.len() && bytes[i + 1] == b'*' {
            let mut j = i + 2;
            while j + 1 < bytes.len() && !(bytes[j] == b'*' && bytes[j + 1] == b'/') {
                j += 1;
            }
            let end = (j + 2).min(bytes.len());
            for &b in &bytes[i..end] {
                out.push(if b == b'\n' { '\n' } else { ' ' });
            }
            i = end;
            continue;
        }
        // Copy the whole UTF-8 sequence starting here.
        let ch_len = source[i..].chars().next().map_or(1, char::len_utf8);
        out.push_str(&source[i..i + ch_len]);
        i += ch_len;
    }
    out
}

/// Byte index of the bracket matching the one at `open`.
pub(crate) fn matching_close(text: &str, open: usize, open_ch: u8, close_ch: u8) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut depth = 0i32;
    for (i, &b) in bytes.iter().enumerate().skip(open) {
        if b == open_ch {
            depth += 1;
        } else if b == close_ch {
            depth -= 1;
            if depth == 0 {
                return Some(i);
            }
        }
    }
    None
}

/// Split on commas that are not nested inside `<...>` or `(...)`.
pub(crate) fn split_top_level(text: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut current = String::new();
    for ch in text.chars() {
        match ch {
            '<' | '(' => depth += 1,
            '>' | ')' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(current.trim().to_string());
                current.clear();
                continue;
            }
            _ => {}
        }
        current.push(ch);
    }
    if !current.trim().is_empty() {
        parts.push(current.trim().to_string());
    }
    parts
}

/// Locate the `{ ... }` body that follows `from` and return `(open, close)` byte indices.
pub(crate) fn find_body(stripped: &str, from: usize) -> BuildResult<(usize, usize)> {
    let open = stripped[from..]
        .find('{')
        .map(|i| i + from)
        .ok_or_else(|| BuildError::dialect("native function has no body"))?;
    let close = matching_close(stripped, open, b'{', b'}')
        .ok_or_else(|| BuildError::dialect("unbalanced braces in native function body"))?;
    Ok((open, close))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_comments_preserves_offsets() {
        let src = "float f(/* a */ float x) { // tail\n return x; }";
        let out = blank_comments(src);
        assert_eq!(out.len(), src.len());
        assert!(!out.contains("tail"));
        assert_eq!(out.find("float x"), src.find("float x"));
    }

    #[test]
    fn test_split_top_level_respects_generics() {
        let parts = split_top_level("a: array<f32, 4>, b: ptr<function, vec3<f32>>, c: f32");
        assert_eq!(
            parts,
            vec!["a: array<f32, 4>", "b: ptr<function, vec3<f32>>", "c: f32"]
        );
        assert!(split_top_level("  ").is_empty());
    }
}
