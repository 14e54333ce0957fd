//! WGSL backend.

use crate::compiler::error::{BuildError, BuildResult};
use crate::compiler::graph::{BuiltinValue, MathMethod};
use crate::compiler::types::{Dialect, Interpolation, NodeType, ScalarKind, ShaderStage};
use crate::compiler::utils::{fmt_float, indent_lines};

use super::wgsl_function::WgslNodeParser;
use super::{
    LocationDecl, NodeParser, ShaderDialect, StageProgram, VarKind, common_math_name,
    interpolation_name, sampling_name,
};

const RESERVED: &[&str] = &[
    "main", "output", "VertexOutput", "fn", "let", "var", "const", "return", "if", "else",
    "for", "while", "loop", "break", "continue", "switch", "case", "default", "struct",
    "true", "false", "discard", "enable", "alias", "override", "diagnostic", "requires",
    "array", "ptr", "sampler", "texture", "uniform", "storage", "function", "private",
    "workgroup", "bitcast", "f32", "i32", "u32", "f16", "bool", "vec2", "vec3", "vec4",
    "mat2x2", "mat3x3", "mat4x4", "mod", "self", "type", "target", "move", "new", "null",
    "static", "union", "using", "where", "with", "yield", "layout", "attribute", "varying",
    "smooth", "sample", "input", "select", "vertexIndex", "instanceIndex", "fragCoord",
    "frontFacing", "globalId", "localId", "workgroupId",
];

fn scalar_name(kind: ScalarKind) -> &'static str {
    match kind {
        ScalarKind::Bool => "bool",
        ScalarKind::Int => "i32",
        ScalarKind::Uint => "u32",
        ScalarKind::Float => "f32",
    }
}

fn builtin_param(builtin: BuiltinValue) -> (&'static str, &'static str, &'static str) {
    match builtin {
        BuiltinValue::VertexIndex => ("vertex_index", "vertexIndex", "u32"),
        BuiltinValue::InstanceIndex => ("instance_index", "instanceIndex", "u32"),
        BuiltinValue::FragCoord => ("position", "fragCoord", "vec4<f32>"),
        BuiltinValue::FrontFacing => ("front_facing", "frontFacing", "bool"),
        BuiltinValue::GlobalInvocationId => ("global_invocation_id", "globalId", "vec3<u32>"),
        BuiltinValue::LocalInvocationId => ("local_invocation_id", "localId", "vec3<u32>"),
        BuiltinValue::WorkgroupId => ("workgroup_id", "workgroupId", "vec3<u32>"),
    }
}

fn interpolate_attr(decl: &LocationDecl) -> String {
    match (decl.interpolation, decl.sampling) {
        (Interpolation::Perspective, None) => String::new(),
        (Interpolation::Flat, _) => " @interpolate(flat)".to_string(),
        (i, None) => format!(" @interpolate({})", interpolation_name(i)),
        (i, Some(s)) => format!(
            " @interpolate({}, {})",
            interpolation_name(i),
            sampling_name(s)
        ),
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct WgslDialect;

impl ShaderDialect for WgslDialect {
    fn dialect(&self) -> Dialect {
        Dialect::Wgsl
    }

    fn reserved_words(&self) -> &'static [&'static str] {
        RESERVED
    }

    fn parser(&self) -> &'static dyn NodeParser {
        &WgslNodeParser
    }

    fn type_name(&self, ty: &NodeType) -> BuildResult<String> {
        let name = match ty {
            NodeType::Void => {
                return Err(BuildError::type_resolution("void has no WGSL spelling"));
            }
            NodeType::Mat2 => "mat2x2<f32>".to_string(),
            NodeType::Mat3 => "mat3x3<f32>".to_string(),
            NodeType::Mat4 => "mat4x4<f32>".to_string(),
            NodeType::Texture2D => "texture_2d<f32>".to_string(),
            NodeType::Struct(name) => name.clone(),
            NodeType::Array(elem, 0) => format!("array<{}>", self.type_name(elem)?),
            NodeType::Array(elem, n) => format!("array<{}, {n}>", self.type_name(elem)?),
            other => {
                let kind = other.scalar_kind().ok_or_else(|| {
                    BuildError::type_resolution(format!("type `{other}` has no WGSL spelling"))
                })?;
                match other.components() {
                    1 => scalar_name(kind).to_string(),
                    n => format!("vec{n}<{}>", scalar_name(kind)),
                }
            }
        };
        Ok(name)
    }

    fn scalar_literal(&self, kind: ScalarKind, value: f64) -> String {
        match kind {
            ScalarKind::Bool => (value != 0.0).to_string(),
            ScalarKind::Int => format!("{}", value as i64),
            ScalarKind::Uint => format!("{}u", value.max(0.0) as u64),
            ScalarKind::Float => fmt_float(value),
        }
    }

    fn var_decl(&self, name: &str, type_name: &str, init: Option<&str>, kind: VarKind) -> String {
        match (kind, init) {
            (VarKind::Mutable, Some(init)) => format!("var {name}: {type_name} = {init};"),
            (_, None) => format!("var {name}: {type_name};"),
            (VarKind::Immutable | VarKind::Constant, Some(init)) => {
                format!("let {name}: {type_name} = {init};")
            }
        }
    }

    fn uniform_ref(&self, instance: &str, member: &str) -> String {
        format!("{instance}.{member}")
    }

    fn math_call(&self, method: MathMethod, args: &[String]) -> String {
        format!("{}({})", common_math_name(method), args.join(", "))
    }

    fn float_remainder(&self, a: &str, b: &str) -> String {
        format!("({a} % {b})")
    }

    fn select(&self, cond: &str, if_true: &str, if_false: &str) -> String {
        format!("select({if_false}, {if_true}, {cond})")
    }

    fn for_header(
        &self,
        var: &str,
        type_name: &str,
        start: &str,
        condition: &str,
        update: &str,
    ) -> String {
        format!("for (var {var}: {type_name} = {start}; {condition}; {update}) {{")
    }

    fn texture_sample(&self, texture: &str, sampler: &str, uv: &str, level: Option<&str>) -> String {
        match level {
            Some(level) => format!("textureSampleLevel({texture}, {sampler}, {uv}, {level})"),
            None => format!("textureSample({texture}, {sampler}, {uv})"),
        }
    }

    fn builtin_ref(&self, builtin: BuiltinValue) -> String {
        builtin_param(builtin).1.to_string()
    }

    fn varying_ref(&self, stage: ShaderStage, name: &str) -> String {
        match stage {
            ShaderStage::Vertex => format!("output.{name}"),
            _ => name.to_string(),
        }
    }

    fn address_of(&self, lvalue: &str) -> String {
        format!("&{lvalue}")
    }

    fn swizzle_assignment(&self) -> bool {
        false
    }

    fn assemble(&self, p: &StageProgram) -> String {
        let mut sections: Vec<String> = Vec::new();

        for s in &p.structs {
            let members: Vec<String> = s
                .members
                .iter()
                .map(|(name, ty)| format!("    {name}: {ty},"))
                .collect();
            sections.push(format!("struct {} {{\n{}\n}}", s.name, members.join("\n")));
        }

        for u in &p.uniforms {
            let members: Vec<String> = u
                .members
                .iter()
                .map(|(name, ty)| format!("    {name}: {ty},"))
                .collect();
            sections.push(format!(
                "struct {block} {{\n{members}\n}}\n@group(0) @binding({binding}) var<uniform> {instance}: {block};",
                block = u.block,
                members = members.join("\n"),
                binding = u.binding,
                instance = u.instance,
            ));
        }

        let mut resources = Vec::new();
        for t in &p.textures {
            resources.push(format!(
                "@group(0) @binding({}) var {}: texture_2d<f32>;",
                t.texture_binding, t.name
            ));
            resources.push(format!(
                "@group(0) @binding({}) var {}: sampler;",
                t.sampler_binding, t.sampler
            ));
        }
        for s in &p.storage {
            let access = if s.read_only { "read" } else { "read_write" };
            let ty = match s.count {
                Some(n) => format!("array<{}, {n}>", s.element),
                None => format!("array<{}>", s.element),
            };
            resources.push(format!(
                "@group(0) @binding({}) var<storage, {access}> {}: {ty};",
                s.binding, s.name
            ));
        }
        if !resources.is_empty() {
            sections.push(resources.join("\n"));
        }

        sections.extend(p.functions.iter().cloned());

        let mut params: Vec<String> = Vec::new();
        let mut body: Vec<String> = Vec::new();
        match p.stage {
            ShaderStage::Vertex => {
                let mut fields = vec!["    @builtin(position) position: vec4<f32>,".to_string()];
                for v in &p.varyings {
                    fields.push(format!(
                        "    @location({}){} {}: {},",
                        v.location,
                        interpolate_attr(v),
                        v.name,
                        v.ty
                    ));
                }
                sections.push(format!("struct VertexOutput {{\n{}\n}}", fields.join("\n")));
                for a in &p.attributes {
                    params.push(format!("@location({}) {}: {}", a.location, a.name, a.ty));
                }
                body.push("var output: VertexOutput;".to_string());
            }
            ShaderStage::Fragment => {
                for v in &p.varyings {
                    params.push(format!(
                        "@location({}){} {}: {}",
                        v.location,
                        interpolate_attr(v),
                        v.name,
                        v.ty
                    ));
                }
            }
            ShaderStage::Compute => {}
        }
        for b in &p.builtins {
            let (attr, name, ty) = builtin_param(*b);
            params.push(format!("@builtin({attr}) {name}: {ty}"));
        }

        body.extend(p.locals.iter().cloned());
        body.extend(p.body.iter().cloned());

        let (attr, ret) = match p.stage {
            ShaderStage::Vertex => {
                body.push(format!(
                    "output.position = {};",
                    p.output.as_deref().unwrap_or("vec4<f32>(0.0, 0.0, 0.0, 1.0)")
                ));
                body.push("return output;".to_string());
                ("@vertex".to_string(), " -> VertexOutput")
            }
            ShaderStage::Fragment => {
                body.push(format!(
                    "return {};",
                    p.output.as_deref().unwrap_or("vec4<f32>(0.0, 0.0, 0.0, 1.0)")
                ));
                ("@fragment".to_string(), " -> @location(0) vec4<f32>")
            }
            ShaderStage::Compute => {
                let [x, y, z] = p.workgroup_size;
                (format!("@compute @workgroup_size({x}, {y}, {z})"), "")
            }
        };

        sections.push(format!(
            "{attr}\nfn main({}){ret} {{\n{}\n}}",
            params.join(", "),
            indent_lines(&body, 1).join("\n")
        ));

        let mut out = sections.join("\n\n");
        out.push('\n');
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::dialect::UniformBlockDecl;

    #[test]
    fn test_type_names() {
        let d = WgslDialect;
        assert_eq!(d.type_name(&NodeType::Vec3).unwrap(), "vec3<f32>");
        assert_eq!(d.type_name(&NodeType::UVec2).unwrap(), "vec2<u32>");
        assert_eq!(d.type_name(&NodeType::Mat3).unwrap(), "mat3x3<f32>");
        assert_eq!(
            d.type_name(&NodeType::Array(Box::new(NodeType::Float), 3)).unwrap(),
            "array<f32, 3>"
        );
        assert!(d.type_name(&NodeType::Void).unwrap_err().is_type_resolution());
    }

    #[test]
    fn test_declarations() {
        let d = WgslDialect;
        assert_eq!(
            d.var_decl("s", "f32", Some("sin(t)"), VarKind::Mutable),
            "var s: f32 = sin(t);"
        );
        assert_eq!(
            d.var_decl("nodeVar0", "vec3<f32>", Some("a"), VarKind::Immutable),
            "let nodeVar0: vec3<f32> = a;"
        );
        assert_eq!(d.var_decl("r", "f32", None, VarKind::Immutable), "var r: f32;");
        assert_eq!(d.select("c", "a", "b"), "select(b, a, c)");
    }

    #[test]
    fn test_fragment_program_parses() {
        let mut p = StageProgram::new(ShaderStage::Fragment);
        p.uniforms.push(UniformBlockDecl {
            block: "ObjectUniforms".to_string(),
            instance: "objectUniforms".to_string(),
            binding: 0,
            members: vec![("time".to_string(), "f32".to_string())],
        });
        p.body.push("var s: f32 = sin(objectUniforms.time);".to_string());
        p.output = Some("vec4<f32>(s, s, 0.0, 1.0)".to_string());
        let src = WgslDialect.assemble(&p);
        assert!(src.contains("@group(0) @binding(0) var<uniform> objectUniforms: ObjectUniforms;"));
        naga::front::wgsl::parse_str(&src).unwrap();
    }
}
