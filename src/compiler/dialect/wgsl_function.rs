//! WGSL native function parsing.

use crate::compiler::error::{BuildError, BuildResult};
use crate::compiler::types::{Dialect, NodeType, ScalarKind};

use super::node_function::{
    NodeFunction, NodeFunctionInput, NodeParser, ParamQualifier, blank_comments, find_body,
    matching_close, split_top_level,
};

#[derive(Clone, Debug)]
pub struct WgslNodeFunction {
    name: String,
    return_type: NodeType,
    return_text: Option<String>,
    inputs: Vec<NodeFunctionInput>,
    /// Parameter type spellings as written, re-emitted verbatim.
    input_texts: Vec<String>,
    body: String,
}

impl NodeFunction for WgslNodeFunction {
    fn dialect(&self) -> Dialect {
        Dialect::Wgsl
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn return_type(&self) -> &NodeType {
        &self.return_type
    }

    fn inputs(&self) -> &[NodeFunctionInput] {
        &self.inputs
    }

    fn code(&self, name: &str) -> String {
        let params: Vec<String> = self
            .inputs
            .iter()
            .zip(&self.input_texts)
            .map(|(input, ty)| format!("{}: {ty}", input.name))
            .collect();
        let ret = match &self.return_text {
            Some(ty) => format!(" -> {ty}"),
            None => String::new(),
        };
        format!("fn {name}({}){ret} {}", params.join(", "), self.body)
    }
}

fn scalar_kind(text: &str) -> Option<ScalarKind> {
    match text {
        "f32" => Some(ScalarKind::Float),
        "i32" => Some(ScalarKind::Int),
        "u32" => Some(ScalarKind::Uint),
        "bool" => Some(ScalarKind::Bool),
        _ => None,
    }
}

/// Map a WGSL type spelling onto a node type. Arrays are returned as `Array`.
pub(crate) fn parse_wgsl_type(text: &str) -> Option<NodeType> {
    let t: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    if let Some(inner) = t.strip_prefix("array<").and_then(|r| r.strip_suffix('>')) {
        let parts = split_top_level(inner);
        let elem = parse_wgsl_type(parts.first()?)?;
        let count = parts
            .get(1)?
            .trim_end_matches(['u', 'i'])
            .parse()
            .ok()?;
        return Some(NodeType::Array(Box::new(elem), count));
    }
    for n in 2..=4u32 {
        if let Some(inner) = t
            .strip_prefix(&format!("vec{n}<"))
            .and_then(|r| r.strip_suffix('>'))
        {
            return NodeType::vector(scalar_kind(inner)?, n);
        }
        for m in 2..=4u32 {
            let prefix = format!("mat{n}x{m}");
            if let Some(rest) = t.strip_prefix(&prefix) {
                if n != m || !(rest == "f" || rest == "<f32>") {
                    return None;
                }
                return NodeType::matrix(n);
            }
        }
    }
    if let Some(kind) = scalar_kind(&t) {
        return NodeType::vector(kind, 1);
    }
    match t.as_str() {
        "vec2f" | "vec3f" | "vec4f" | "vec2i" | "vec3i" | "vec4i" | "vec2u" | "vec3u"
        | "vec4u" => NodeType::from_name(&t),
        _ => None,
    }
}

fn strip_attributes(text: &str) -> &str {
    let mut rest = text.trim();
    while let Some(after) = rest.strip_prefix('@') {
        let name_end = after
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(after.len());
        let mut tail = &after[name_end..];
        if tail.trim_start().starts_with('(') {
            let open = tail.find('(').unwrap_or(0);
            let close = matching_close(tail, open, b'(', b')').unwrap_or(tail.len() - 1);
            tail = &tail[close + 1..];
        }
        rest = tail.trim_start();
    }
    rest
}

fn parse_param(text: &str) -> BuildResult<(NodeFunctionInput, String)> {
    let text = strip_attributes(text);
    let (name, ty_text) = text
        .split_once(':')
        .ok_or_else(|| BuildError::dialect(format!("cannot parse WGSL parameter `{text}`")))?;
    let ty_text = ty_text.trim().to_string();
    let compact: String = ty_text.chars().filter(|c| !c.is_whitespace()).collect();

    let (qualifier, value_text) = match compact
        .strip_prefix("ptr<")
        .and_then(|r| r.strip_suffix('>'))
    {
        Some(inner) => {
            let parts = split_top_level(inner);
            let pointee = parts.get(1).cloned().ok_or_else(|| {
                BuildError::dialect(format!("malformed pointer parameter `{ty_text}`"))
            })?;
            (ParamQualifier::InOut, pointee)
        }
        None => (ParamQualifier::In, compact),
    };
    let unsupported =
        || BuildError::dialect(format!("unsupported WGSL type `{ty_text}` in native function"));
    let (ty, count) = match parse_wgsl_type(&value_text).ok_or_else(unsupported)? {
        NodeType::Array(elem, n) => (*elem, Some(n)),
        ty => (ty, None),
    };
    Ok((
        NodeFunctionInput {
            name: name.trim().to_string(),
            ty,
            qualifier,
            // WGSL parameters carry no const marker.
            is_const: false,
            count,
        },
        ty_text,
    ))
}

/// Byte offset of the `fn` keyword that starts the first declaration.
fn find_fn_keyword(stripped: &str) -> Option<usize> {
    let bytes = stripped.as_bytes();
    let mut from = 0;
    while let Some(i) = stripped[from..].find("fn").map(|i| i + from) {
        let before_ok = i == 0 || !(bytes[i - 1].is_ascii_alphanumeric() || bytes[i - 1] == b'_');
        let after_ok = bytes.get(i + 2).is_some_and(|b| b.is_ascii_whitespace());
        if before_ok && after_ok {
            return Some(i);
        }
        from = i + 2;
    }
    None
}

#[derive(Clone, Copy, Debug, Default)]
pub struct WgslNodeParser;

impl NodeParser for WgslNodeParser {
    fn parse_function(&self, source: &str) -> BuildResult<Box<dyn NodeFunction>> {
        let stripped = blank_comments(source);
        let at = find_fn_keyword(&stripped)
            .ok_or_else(|| BuildError::dialect("no WGSL function declaration found"))?;
        let paren = stripped[at..]
            .find('(')
            .map(|i| i + at)
            .ok_or_else(|| BuildError::dialect("WGSL declaration has no parameter list"))?;
        let name = stripped[at + 2..paren].trim().to_string();
        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(BuildError::dialect(format!(
                "invalid WGSL function name `{name}`"
            )));
        }
        let close = matching_close(&stripped, paren, b'(', b')')
            .ok_or_else(|| BuildError::dialect("unbalanced parentheses in WGSL declaration"))?;

        let mut inputs = Vec::new();
        let mut input_texts = Vec::new();
        for part in split_top_level(&stripped[paren + 1..close]) {
            let (input, text) = parse_param(&part)?;
            inputs.push(input);
            input_texts.push(text);
        }

        let (open, end) = find_body(&stripped, close + 1)?;
        let between = stripped[close + 1..open].trim();
        let (return_type, return_text) = match between.strip_prefix("->") {
            Some(ret) => {
                let ret = strip_attributes(ret).trim().to_string();
                let ty = parse_wgsl_type(&ret).ok_or_else(|| {
                    BuildError::dialect(format!("unsupported WGSL return type `{ret}`"))
                })?;
                (ty, Some(ret))
            }
            None if between.is_empty() => (NodeType::Void, None),
            None => {
                return Err(BuildError::dialect(format!(
                    "unexpected `{between}` after WGSL parameter list"
                )));
            }
        };

        Ok(Box::new(WgslNodeFunction {
            name,
            return_type,
            return_text,
            inputs,
            input_texts,
            body: source[open..=end].to_string(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_wgsl_types() {
        assert_eq!(parse_wgsl_type("vec3<f32>"), Some(NodeType::Vec3));
        assert_eq!(parse_wgsl_type("vec2i"), Some(NodeType::IVec2));
        assert_eq!(parse_wgsl_type("mat4x4<f32>"), Some(NodeType::Mat4));
        assert_eq!(parse_wgsl_type("mat3x2f"), None);
        assert_eq!(
            parse_wgsl_type("array<f32, 4>"),
            Some(NodeType::Array(Box::new(NodeType::Float), 4))
        );
        assert_eq!(parse_wgsl_type("u32"), Some(NodeType::Uint));
    }

    #[test]
    fn test_pointer_params_are_inout() {
        let src = "fn accumulate(acc: ptr<function, vec3<f32>>, v: vec3<f32>) {\n    *acc = *acc + v;\n}";
        let f = WgslNodeParser.parse_function(src).unwrap();
        assert_eq!(f.name(), "accumulate");
        assert_eq!(f.return_type(), &NodeType::Void);
        assert_eq!(f.inputs()[0].qualifier, ParamQualifier::InOut);
        assert_eq!(f.inputs()[0].ty, NodeType::Vec3);
        assert_eq!(f.inputs()[1].qualifier, ParamQualifier::In);
        assert!(!f.inputs()[1].is_const);
        assert!(f.code("accumulate_1").starts_with(
            "fn accumulate_1(acc: ptr<function, vec3<f32>>, v: vec3<f32>) {"
        ));
    }

    #[test]
    fn test_return_type_and_rename() {
        let src = "// gamma\nfn to_srgb(c: vec3f, gamma: f32) -> vec3f { return pow(c, vec3f(1.0 / gamma)); }";
        let f = WgslNodeParser.parse_function(src).unwrap();
        assert_eq!(f.return_type(), &NodeType::Vec3);
        assert_eq!(
            f.code("srgb"),
            "fn srgb(c: vec3f, gamma: f32) -> vec3f { return pow(c, vec3f(1.0 / gamma)); }"
        );
    }

    #[test]
    fn test_malformed_wgsl_is_dialect_error() {
        assert!(WgslNodeParser.parse_function("let x = 1.0;").unwrap_err().is_dialect());
        assert!(
            WgslNodeParser
                .parse_function("fn f(x) -> f32 { return 1.0; }")
                .unwrap_err()
                .is_dialect()
        );
    }
}
