//! Lower GLSL native functions into WGSL declarations through naga.

use tracing::debug;

use crate::compiler::error::{BuildError, BuildResult};
use crate::compiler::types::{NodeType, ScalarKind, ShaderStage};
use crate::compiler::validation::glsl_to_wgsl;

use super::node_function::{NodeFunction, matching_close};

/// A GLSL function translated to WGSL.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TranslatedFunction {
    /// Name naga gave the function (it may append `_` to avoid collisions).
    pub name: String,
    pub code: String,
}

fn entry_io_type(ty: &NodeType) -> BuildResult<(String, bool)> {
    if !ty.is_numeric_vector_or_scalar() {
        return Err(BuildError::dialect(format!(
            "GLSL functions taking or returning `{ty}` cannot be lowered to WGSL"
        )));
    }
    // Bool stage IO is not allowed; carry it as int.
    let io = match ty.scalar_kind() {
        Some(ScalarKind::Bool) => ty.with_scalar_kind(ScalarKind::Int).unwrap_or(NodeType::Int),
        _ => ty.clone(),
    };
    let integer = matches!(io.scalar_kind(), Some(ScalarKind::Int | ScalarKind::Uint));
    Ok((io.name(), integer))
}

/// Translate `function` (declared under `name`) into WGSL.
///
/// `includes` are GLSL declarations the function depends on; they are compiled along with
/// it but only the requested function is extracted.
pub fn translate_glsl_function(
    function: &dyn NodeFunction,
    name: &str,
    includes: &[String],
) -> BuildResult<TranslatedFunction> {
    let mut entry_inputs = Vec::new();
    let mut args = Vec::new();
    for (i, input) in function.inputs().iter().enumerate() {
        if input.qualifier.is_output() || input.count.is_some() {
            return Err(BuildError::dialect(format!(
                "parameter `{}` of `{name}` cannot be lowered to WGSL (out/inout or array)",
                input.name
            )));
        }
        let (io_ty, integer) = entry_io_type(&input.ty)?;
        let flat = if integer { "flat " } else { "" };
        entry_inputs.push(format!(
            "layout(location = {i}) {flat}in {io_ty} {}_in;",
            input.name
        ));
        args.push(if input.ty.scalar_kind() == Some(ScalarKind::Bool) {
            format!("{}({}_in != 0)", input.ty.name(), input.name)
        } else {
            format!("{}_in", input.name)
        });
    }

    let call = format!("{name}({})", args.join(", "));
    let (entry_output, entry_body) = match function.return_type() {
        NodeType::Void => (String::new(), format!("{call};")),
        ret => {
            let (io_ty, _) = entry_io_type(ret)?;
            let value = if ret.scalar_kind() == Some(ScalarKind::Bool) {
                format!("{io_ty}({call})")
            } else {
                call
            };
            (
                format!("layout(location = 0) out {io_ty} _sn_out;\n"),
                format!("_sn_out = {value};"),
            )
        }
    };

    let glsl = format!(
        "#version 450\n\n{includes}{decl}\n\n{inputs}\n{entry_output}void main() {{\n    {entry_body}\n}}\n",
        includes = includes
            .iter()
            .map(|c| format!("{c}\n\n"))
            .collect::<String>(),
        decl = function.code(name),
        inputs = entry_inputs.join("\n"),
    );

    let wgsl = glsl_to_wgsl(&glsl, ShaderStage::Fragment)
        .or_else(|_| glsl_to_wgsl(&glsl, ShaderStage::Vertex))
        .map_err(|e| BuildError::dialect(format!("GLSL->WGSL failed: {e:#}\nGLSL:\n{glsl}")))?;
    debug!(function = name, "lowered GLSL function to WGSL");

    let found = extract_wgsl_fn_decl(&wgsl, name)
        .map(|code| (name.to_string(), code))
        .or_else(|| {
            let alt = format!("{name}_");
            extract_wgsl_fn_decl(&wgsl, &alt).map(|code| (alt, code))
        });
    match found {
        Some((name, code)) => Ok(TranslatedFunction { name, code }),
        None => Err(BuildError::dialect(format!(
            "failed to find generated WGSL function `{name}` in naga output\nWGSL:\n{wgsl}"
        ))),
    }
}

/// Slice the full `fn name(...) ... { ... }` declaration out of a WGSL module.
pub fn extract_wgsl_fn_decl(source: &str, fn_name: &str) -> Option<String> {
    let needle = format!("fn {fn_name}(");
    let start = source.find(&needle)?;
    let open = source[start..].find('{')? + start;
    let close = matching_close(source, open, b'{', b'}')?;
    Some(source[start..=close].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::dialect::{GlslNodeParser, NodeParser};

    #[test]
    fn test_extract_decl() {
        let src = "fn helper(x: f32) -> f32 {\n    if x > 0.0 { return x; }\n    return 0.0;\n}\n\nfn main() {}\n";
        let decl = extract_wgsl_fn_decl(src, "helper").unwrap();
        assert!(decl.ends_with("return 0.0;\n}"));
        assert!(extract_wgsl_fn_decl(src, "missing").is_none());
    }

    #[test]
    fn test_translate_simple_function() {
        let f = GlslNodeParser
            .parse_function("float luma(vec3 c) { return dot(c, vec3(0.299, 0.587, 0.114)); }")
            .unwrap();
        let out = translate_glsl_function(f.as_ref(), "luma", &[]).unwrap();
        assert!(out.name.starts_with("luma"));
        assert!(out.code.starts_with(&format!("fn {}(", out.name)));
        assert!(out.code.contains("-> f32"));
    }

    #[test]
    fn test_out_params_are_rejected() {
        let f = GlslNodeParser
            .parse_function("void split(vec2 v, out float x) { x = v.x; }")
            .unwrap();
        let err = translate_glsl_function(f.as_ref(), "split", &[]).unwrap_err();
        assert!(err.is_dialect());
    }
}
