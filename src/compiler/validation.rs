//! Shader validation using the naga library.

use anyhow::{Context, Result, anyhow};

use super::types::ShaderStage;

fn naga_stage(stage: ShaderStage) -> naga::ShaderStage {
    match stage {
        ShaderStage::Vertex => naga::ShaderStage::Vertex,
        ShaderStage::Fragment => naga::ShaderStage::Fragment,
        ShaderStage::Compute => naga::ShaderStage::Compute,
    }
}

fn validator() -> naga::valid::Validator {
    naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    )
}

/// Parse WGSL source code.
///
/// # Returns
/// The parsed naga Module on success, or an error carrying the numbered source on failure.
pub fn validate_wgsl(source: &str) -> Result<naga::Module> {
    naga::front::wgsl::parse_str(source)
        .map_err(|e| anyhow!("WGSL validation failed:\n{}", format_naga_error(source, &e)))
}

/// Parse WGSL and name what produced it in the error chain.
pub fn validate_wgsl_with_context(source: &str, context: &str) -> Result<naga::Module> {
    validate_wgsl(source).with_context(|| format!("{context} generated invalid WGSL"))
}

/// Parse and run the full naga validator (types, uniformity, layouts).
pub fn validate_wgsl_module(source: &str) -> Result<naga::Module> {
    let module = validate_wgsl(source)?;
    validator()
        .validate(&module)
        .map_err(|e| anyhow!("WGSL module validation failed: {e:?}"))?;
    Ok(module)
}

fn parse_glsl(source: &str, stage: ShaderStage) -> Result<naga::Module> {
    let mut parser = naga::front::glsl::Frontend::default();
    let options = naga::front::glsl::Options {
        stage: naga_stage(stage),
        defines: Default::default(),
    };
    parser
        .parse(&options, source)
        .map_err(|e| anyhow!("GLSL parse failed: {e:?}"))
}

/// Parse and validate a GLSL stage.
pub fn validate_glsl(source: &str, stage: ShaderStage) -> Result<naga::Module> {
    let module = parse_glsl(source, stage)?;
    validator()
        .validate(&module)
        .map_err(|e| anyhow!("GLSL validation failed: {e:?}"))?;
    Ok(module)
}

pub fn glsl_to_wgsl(source: &str, stage: ShaderStage) -> Result<String> {
    let module = parse_glsl(source, stage)?;
    let info = validator()
        .validate(&module)
        .map_err(|e| anyhow!("GLSL validation failed: {e:?}"))?;

    naga::back::wgsl::write_string(
        &module,
        &info,
        naga::back::wgsl::WriterFlags::EXPLICIT_TYPES,
    )
    .map_err(|e| anyhow!("WGSL writer failed: {e:?}"))
}

/// Format a naga parse error with numbered source lines.
fn format_naga_error(source: &str, error: &naga::front::wgsl::ParseError) -> String {
    let mut output = format!("  {error}\n\nGenerated WGSL:\n---\n");
    for (line_num, line) in source.lines().enumerate() {
        output.push_str(&format!("{:4} | {}\n", line_num + 1, line));
    }
    output.push_str("---\n");
    output
}
