//! GLSL 450 backend (Vulkan-style resource layout).

use crate::compiler::error::{BuildError, BuildResult};
use crate::compiler::graph::{BuiltinValue, MathMethod};
use crate::compiler::types::{Dialect, Interpolation, NodeType, Sampling, ScalarKind, ShaderStage};
use crate::compiler::utils::{fmt_float, indent_lines};

use super::glsl_function::GlslNodeParser;
use super::{LocationDecl, NodeParser, ShaderDialect, StageProgram, VarKind, common_math_name};

const RESERVED: &[&str] = &[
    "main", "fragColor", "attribute", "const", "uniform", "varying", "buffer", "shared",
    "layout", "centroid", "flat", "smooth", "noperspective", "patch", "sample", "break",
    "continue", "do", "for", "while", "switch", "case", "default", "if", "else", "in", "out",
    "inout", "true", "false", "discard", "return", "struct", "void", "bool", "int", "uint",
    "float", "double", "vec2", "vec3", "vec4", "ivec2", "ivec3", "ivec4", "uvec2", "uvec3",
    "uvec4", "bvec2", "bvec3", "bvec4", "mat2", "mat3", "mat4", "sampler", "texture",
    "texture2D", "sampler2D", "input", "output", "filter", "common", "partition", "active",
    "mod", "highp", "mediump", "lowp", "precision", "invariant", "precise", "coherent",
    "volatile", "restrict", "readonly", "writeonly", "subroutine", "union", "enum", "class",
    "using", "namespace", "static", "extern", "external", "interface", "long", "short",
    "half", "fixed", "unsigned", "superp", "inline", "noinline", "public", "template",
    "this", "goto", "typedef", "cast", "sizeof", "asm",
];

#[derive(Clone, Copy, Debug, Default)]
pub struct GlslDialect;

fn interpolation_prefix(decl: &LocationDecl) -> String {
    let mut s = String::new();
    match decl.interpolation {
        Interpolation::Perspective => {}
        Interpolation::Linear => s.push_str("noperspective "),
        Interpolation::Flat => s.push_str("flat "),
    }
    match decl.sampling {
        Some(Sampling::Centroid) => s.push_str("centroid "),
        Some(Sampling::Sample) => s.push_str("sample "),
        Some(Sampling::Center) | None => {}
    }
    s
}

impl ShaderDialect for GlslDialect {
    fn dialect(&self) -> Dialect {
        Dialect::Glsl
    }

    fn reserved_words(&self) -> &'static [&'static str] {
        RESERVED
    }

    fn parser(&self) -> &'static dyn NodeParser {
        &GlslNodeParser
    }

    fn type_name(&self, ty: &NodeType) -> BuildResult<String> {
        match ty {
            NodeType::Texture2D => Ok("texture2D".to_string()),
            NodeType::Array(_, 0) => Err(BuildError::type_resolution(
                "runtime-sized arrays only exist as storage buffers",
            )),
            NodeType::Array(elem, n) => Ok(format!("{}[{n}]", self.type_name(elem)?)),
            other => Ok(other.name()),
        }
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
            (VarKind::Constant, Some(init)) => format!("const {type_name} {name} = {init};"),
            (_, Some(init)) => format!("{type_name} {name} = {init};"),
            (_, None) => format!("{type_name} {name};"),
        }
    }

    fn uniform_ref(&self, _instance: &str, member: &str) -> String {
        // Uniform blocks are declared without an instance name.
        member.to_string()
    }

    fn math_call(&self, method: MathMethod, args: &[String]) -> String {
        let joined = args.join(", ");
        match method {
            MathMethod::InverseSqrt => format!("inversesqrt({joined})"),
            MathMethod::Atan2 => format!("atan({joined})"),
            MathMethod::Dfdx => format!("dFdx({joined})"),
            MathMethod::Dfdy => format!("dFdy({joined})"),
            MathMethod::Saturate => format!("clamp({joined}, 0.0, 1.0)"),
            other => format!("{}({joined})", common_math_name(other)),
        }
    }

    fn float_remainder(&self, a: &str, b: &str) -> String {
        format!("mod({a}, {b})")
    }

    fn select(&self, cond: &str, if_true: &str, if_false: &str) -> String {
        format!("({cond} ? {if_true} : {if_false})")
    }

    fn for_header(
        &self,
        var: &str,
        type_name: &str,
        start: &str,
        condition: &str,
        update: &str,
    ) -> String {
        format!("for ({type_name} {var} = {start}; {condition}; {update}) {{")
    }

    fn texture_sample(&self, texture: &str, sampler: &str, uv: &str, level: Option<&str>) -> String {
        match level {
            Some(level) => format!("textureLod(sampler2D({texture}, {sampler}), {uv}, {level})"),
            None => format!("texture(sampler2D({texture}, {sampler}), {uv})"),
        }
    }

    fn builtin_ref(&self, builtin: BuiltinValue) -> String {
        match builtin {
            BuiltinValue::VertexIndex => "uint(gl_VertexIndex)",
            BuiltinValue::InstanceIndex => "uint(gl_InstanceIndex)",
            BuiltinValue::FragCoord => "gl_FragCoord",
            BuiltinValue::FrontFacing => "gl_FrontFacing",
            BuiltinValue::GlobalInvocationId => "gl_GlobalInvocationID",
            BuiltinValue::LocalInvocationId => "gl_LocalInvocationID",
            BuiltinValue::WorkgroupId => "gl_WorkGroupID",
        }
        .to_string()
    }

    fn varying_ref(&self, _stage: ShaderStage, name: &str) -> String {
        name.to_string()
    }

    fn address_of(&self, lvalue: &str) -> String {
        lvalue.to_string()
    }

    fn swizzle_assignment(&self) -> bool {
        true
    }

    fn assemble(&self, p: &StageProgram) -> String {
        let mut sections: Vec<String> = vec!["#version 450".to_string()];

        if p.stage == ShaderStage::Compute {
            let [x, y, z] = p.workgroup_size;
            sections.push(format!(
                "layout(local_size_x = {x}, local_size_y = {y}, local_size_z = {z}) in;"
            ));
        }

        for s in &p.structs {
            let members: Vec<String> = s
                .members
                .iter()
                .map(|(name, ty)| format!("    {ty} {name};"))
                .collect();
            sections.push(format!("struct {} {{\n{}\n}};", s.name, members.join("\n")));
        }

        for u in &p.uniforms {
            let members: Vec<String> = u
                .members
                .iter()
                .map(|(name, ty)| format!("    {ty} {name};"))
                .collect();
            sections.push(format!(
                "layout(set = 0, binding = {}, std140) uniform {} {{\n{}\n}};",
                u.binding,
                u.block,
                members.join("\n")
            ));
        }

        let mut resources = Vec::new();
        for t in &p.textures {
            resources.push(format!(
                "layout(set = 0, binding = {}) uniform texture2D {};",
                t.texture_binding, t.name
            ));
            resources.push(format!(
                "layout(set = 0, binding = {}) uniform sampler {};",
                t.sampler_binding, t.sampler
            ));
        }
        if !resources.is_empty() {
            sections.push(resources.join("\n"));
        }
        for s in &p.storage {
            let access = if s.read_only { "readonly " } else { "" };
            let len = s.count.map(|n| n.to_string()).unwrap_or_default();
            sections.push(format!(
                "layout(set = 0, binding = {}, std430) {access}buffer {} {{\n    {} {}[{len}];\n}};",
                s.binding, s.block, s.element, s.name
            ));
        }

        let mut io = Vec::new();
        for a in &p.attributes {
            io.push(format!("layout(location = {}) in {} {};", a.location, a.ty, a.name));
        }
        let direction = if p.stage == ShaderStage::Vertex { "out" } else { "in" };
        for v in &p.varyings {
            io.push(format!(
                "layout(location = {}) {}{direction} {} {};",
                v.location,
                interpolation_prefix(v),
                v.ty,
                v.name
            ));
        }
        if p.stage == ShaderStage::Fragment {
            io.push("layout(location = 0) out vec4 fragColor;".to_string());
        }
        if !io.is_empty() {
            sections.push(io.join("\n"));
        }

        sections.extend(p.functions.iter().cloned());

        let mut body: Vec<String> = p.locals.clone();
        body.extend(p.body.iter().cloned());
        match p.stage {
            ShaderStage::Vertex => body.push(format!(
                "gl_Position = {};",
                p.output.as_deref().unwrap_or("vec4(0.0, 0.0, 0.0, 1.0)")
            )),
            ShaderStage::Fragment => body.push(format!(
                "fragColor = {};",
                p.output.as_deref().unwrap_or("vec4(0.0, 0.0, 0.0, 1.0)")
            )),
            ShaderStage::Compute => {}
        }
        sections.push(format!(
            "void main() {{\n{}\n}}",
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
    use crate::compiler::dialect::{StorageDecl, TextureDecl};

    #[test]
    fn test_spellings() {
        let d = GlslDialect;
        assert_eq!(d.type_name(&NodeType::IVec3).unwrap(), "ivec3");
        assert_eq!(
            d.type_name(&NodeType::Array(Box::new(NodeType::Vec2), 4)).unwrap(),
            "vec2[4]"
        );
        assert_eq!(
            d.var_decl("s", "float", Some("sin(time)"), VarKind::Mutable),
            "float s = sin(time);"
        );
        assert_eq!(
            d.var_decl("k", "float", Some("2.0"), VarKind::Constant),
            "const float k = 2.0;"
        );
        assert_eq!(d.math_call(MathMethod::Saturate, &["x".to_string()]), "clamp(x, 0.0, 1.0)");
        assert_eq!(d.float_remainder("a", "b"), "mod(a, b)");
        assert_eq!(
            d.for_header("i", "int", "0", "i < 10", "i++"),
            "for (int i = 0; i < 10; i++) {"
        );
    }

    #[test]
    fn test_assemble_resources() {
        let mut p = StageProgram::new(ShaderStage::Compute);
        p.textures.push(TextureDecl {
            name: "map".to_string(),
            sampler: "map_sampler".to_string(),
            texture_binding: 1,
            sampler_binding: 2,
        });
        p.storage.push(StorageDecl {
            name: "particles".to_string(),
            block: "ParticlesBuffer".to_string(),
            binding: 3,
            element: "vec4".to_string(),
            count: None,
            read_only: true,
        });
        let src = GlslDialect.assemble(&p);
        assert!(src.starts_with("#version 450\n\nlayout(local_size_x = 64, local_size_y = 1, local_size_z = 1) in;"));
        assert!(src.contains("layout(set = 0, binding = 1) uniform texture2D map;"));
        assert!(src.contains("layout(set = 0, binding = 3, std430) readonly buffer ParticlesBuffer {\n    vec4 particles[];\n};"));
        assert!(src.trim_end().ends_with("void main() {\n\n}"));
    }
}
