//! GLSL native function parsing.

use crate::compiler::error::{BuildError, BuildResult};
use crate::compiler::types::{Dialect, NodeType};

use super::node_function::{
    NodeFunction, NodeFunctionInput, NodeParser, ParamQualifier, blank_comments, find_body,
    matching_close,
};

const PRECISION: [&str; 3] = ["highp", "mediump", "lowp"];

#[derive(Clone, Debug)]
pub struct GlslNodeFunction {
    name: String,
    return_type: NodeType,
    inputs: Vec<NodeFunctionInput>,
    /// Anything ahead of the declaration (`#define`s, helper comments).
    preamble: String,
    /// Body including the enclosing braces.
    body: String,
}

impl NodeFunction for GlslNodeFunction {
    fn dialect(&self) -> Dialect {
        Dialect::Glsl
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
        let params: Vec<String> = self.inputs.iter().map(glsl_param).collect();
        let mut out = String::new();
        if !self.preamble.is_empty() {
            out.push_str(&self.preamble);
            out.push('\n');
        }
        out.push_str(&format!(
            "{} {name}({}) {}",
            self.return_type.name(),
            params.join(", "),
            self.body
        ));
        out
    }
}

fn glsl_param(input: &NodeFunctionInput) -> String {
    let mut s = String::new();
    if input.is_const {
        s.push_str("const ");
    }
    match input.qualifier {
        ParamQualifier::In => {}
        ParamQualifier::Out => s.push_str("out "),
        ParamQualifier::InOut => s.push_str("inout "),
    }
    s.push_str(&format!("{} {}", input.ty.name(), input.name));
    if let Some(n) = input.count {
        s.push_str(&format!("[{n}]"));
    }
    s
}

fn glsl_type(name: &str) -> BuildResult<NodeType> {
    match NodeType::from_name(name) {
        Some(NodeType::Texture2D) | None => Err(BuildError::dialect(format!(
            "unsupported GLSL type `{name}` in native function"
        ))),
        Some(ty) => Ok(ty),
    }
}

/// Split `name[4]` into `("name", Some(4))`.
fn array_suffix(token: &str) -> BuildResult<(&str, Option<u32>)> {
    let Some(open) = token.find('[') else {
        return Ok((token, None));
    };
    let count = token[open + 1..]
        .trim_end_matches(']')
        .trim()
        .parse::<u32>()
        .map_err(|_| BuildError::dialect(format!("unsized or invalid array parameter `{token}`")))?;
    Ok((&token[..open], Some(count)))
}

fn parse_param(text: &str) -> BuildResult<NodeFunctionInput> {
    // `float w [4]` is legal GLSL; glue the suffix back onto the name.
    let normalized = text.replace(" [", "[").replace("[ ", "[");
    let mut qualifier = ParamQualifier::In;
    let mut is_const = false;
    let mut rest = Vec::new();
    for token in normalized.split_whitespace() {
        match token {
            "const" => is_const = true,
            "in" => qualifier = ParamQualifier::In,
            "out" => qualifier = ParamQualifier::Out,
            "inout" => qualifier = ParamQualifier::InOut,
            t if PRECISION.contains(&t) => {}
            t => rest.push(t),
        }
    }
    let [ty_token, name_token] = rest[..] else {
        return Err(BuildError::dialect(format!(
            "cannot parse GLSL parameter `{}`",
            text.trim()
        )));
    };
    let (ty_name, ty_count) = array_suffix(ty_token)?;
    let (name, name_count) = array_suffix(name_token)?;
    Ok(NodeFunctionInput {
        name: name.to_string(),
        ty: glsl_type(ty_name)?,
        qualifier,
        is_const,
        count: name_count.or(ty_count),
    })
}

fn is_ident(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[derive(Clone, Copy, Debug, Default)]
pub struct GlslNodeParser;

impl NodeParser for GlslNodeParser {
    fn parse_function(&self, source: &str) -> BuildResult<Box<dyn NodeFunction>> {
        let stripped = blank_comments(source);
        let paren = stripped
            .find('(')
            .ok_or_else(|| BuildError::dialect("no GLSL function declaration found"))?;

        // Last tokens before `(` are `[precision] <return type> <name>`.
        let header = &stripped[..paren];
        let mut tokens: Vec<(usize, &str)> = Vec::new();
        let mut start = None;
        for (i, ch) in header.char_indices() {
            match (ch.is_whitespace(), start) {
                (false, None) => start = Some(i),
                (true, Some(s)) => {
                    tokens.push((s, &header[s..i]));
                    start = None;
                }
                _ => {}
            }
        }
        if let Some(s) = start {
            tokens.push((s, &header[s..]));
        }
        let [.., (ret_at, ret), (_, name)] = tokens[..] else {
            return Err(BuildError::dialect(
                "GLSL function declaration needs a return type and a name",
            ));
        };
        if !is_ident(name) {
            return Err(BuildError::dialect(format!(
                "invalid GLSL function name `{name}`"
            )));
        }
        let decl_at = match tokens.len() {
            n if n >= 3 && PRECISION.contains(&tokens[n - 3].1) => tokens[n - 3].0,
            _ => ret_at,
        };
        let return_type = glsl_type(ret)?;

        let close = matching_close(&stripped, paren, b'(', b')')
            .ok_or_else(|| BuildError::dialect("unbalanced parentheses in GLSL declaration"))?;
        let params_text = stripped[paren + 1..close].trim();
        let inputs = if params_text.is_empty() || params_text == "void" {
            Vec::new()
        } else {
            params_text
                .split(',')
                .map(parse_param)
                .collect::<BuildResult<Vec<_>>>()?
        };

        let (open, end) = find_body(&stripped, close + 1)?;
        Ok(Box::new(GlslNodeFunction {
            name: name.to_string(),
            return_type,
            inputs,
            preamble: source[..decl_at].trim().to_string(),
            body: source[open..=end].to_string(),
        }))
    }
}
