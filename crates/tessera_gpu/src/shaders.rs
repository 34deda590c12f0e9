//! Built-in WGSL programs
//!
//! Conventions shared with the wgpu backend:
//!
//! - Entry points are `vs_main` and `fs_main`
//! - Non-sampler uniforms live in one block at `@group(0) @binding(0)`, in
//!   declaration order, named `u`
//! - The n-th declared sampler is the texture at `@group(1) @binding(2n)` and
//!   its sampler at `@binding(2n + 1)`

use std::fmt::Write;

use tessera_core::DataType;

use crate::shader::{Program, ProgramBuilder, UniformType};

pub const PROJECTION: &str = "projectionMatrix";

/// Uniforms every filter program declares, filled by the filter system
pub const FILTER_GLOBALS: [(&str, UniformType); 5] = [
    ("outputFrame", UniformType::Vec4),
    ("inputSize", UniformType::Vec4),
    ("inputPixel", UniformType::Vec4),
    ("inputClamp", UniformType::Vec4),
    ("resolution", UniformType::Float),
];

fn wgsl_type(ty: UniformType) -> &'static str {
    match ty {
        UniformType::Float => "f32",
        UniformType::Vec2 => "vec2<f32>",
        UniformType::Vec3 => "vec3<f32>",
        UniformType::Vec4 => "vec4<f32>",
        UniformType::Int | UniformType::Sampler => "i32",
        UniformType::IVec2 => "vec2<i32>",
        UniformType::IVec3 => "vec3<i32>",
        UniformType::IVec4 => "vec4<i32>",
        UniformType::UInt | UniformType::Bool => "u32",
        UniformType::Mat3 => "mat3x3<f32>",
        UniformType::Mat4 => "mat4x4<f32>",
    }
}

/// Uniform block declaration for `fields`
fn uniform_block(fields: &[(&str, UniformType)]) -> String {
    let mut out = String::from("struct Uniforms {\n");
    for (name, ty) in fields {
        let _ = writeln!(out, "    {}: {},", name, wgsl_type(*ty));
    }
    out.push_str("};\n@group(0) @binding(0) var<uniform> u: Uniforms;\n");
    out
}

fn texture_bindings(samplers: &[&str]) -> String {
    let mut out = String::new();
    for (i, name) in samplers.iter().enumerate() {
        let _ = writeln!(
            out,
            "@group(1) @binding({}) var {name}: texture_2d<f32>;\n@group(1) @binding({}) var {name}_sampler: sampler;",
            i * 2,
            i * 2 + 1
        );
    }
    out
}

// ─────────────────────────────────────────────────────────────────────────────
// Batch
// ─────────────────────────────────────────────────────────────────────────────

pub const A_POSITION: &str = "aVertexPosition";
pub const A_UV: &str = "aTextureCoord";
pub const A_COLOR: &str = "aColor";
pub const A_TEXTURE_ID: &str = "aTextureId";

/// Sampler name of batch slot `slot`
pub fn batch_sampler(slot: u32) -> String {
    format!("uSamplers_{}", slot)
}

const BATCH_VERTEX: &str = r#"
struct VertexInput {
    @location(0) aVertexPosition: vec3<f32>,
    @location(1) aTextureCoord: vec2<f32>,
    @location(2) aColor: vec4<f32>,
    @location(3) aTextureId: f32,
};

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) vTextureCoord: vec2<f32>,
    @location(1) vColor: vec4<f32>,
    @location(2) @interpolate(flat) vTextureId: f32,
};

@vertex
fn vs_main(in: VertexInput) -> VertexOutput {
    var out: VertexOutput;
    let p = u.projectionMatrix * vec3<f32>(in.aVertexPosition.xy, 1.0);
    out.position = vec4<f32>(p.xy, in.aVertexPosition.z, 1.0);
    out.vTextureCoord = in.aTextureCoord;
    out.vColor = in.aColor;
    out.vTextureId = in.aTextureId;
    return out;
}
"#;

/// Multi-texture batch program sampling from `max_textures` slots
///
/// Slot selection happens per fragment; gradients are taken up front so the
/// branches may sample outside uniform control flow.
pub fn batch_program(max_textures: u32) -> ProgramBuilder {
    let max_textures = max_textures.max(1);
    let samplers: Vec<String> = (0..max_textures).map(batch_sampler).collect();
    let sampler_refs: Vec<&str> = samplers.iter().map(String::as_str).collect();

    let mut source = uniform_block(&[(PROJECTION, UniformType::Mat3)]);
    source.push_str(&texture_bindings(&sampler_refs));
    source.push_str(BATCH_VERTEX);

    source.push_str(
        "\n@fragment\nfn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {\n    \
         let dx = dpdx(in.vTextureCoord);\n    \
         let dy = dpdy(in.vTextureCoord);\n    \
         var color = vec4<f32>(0.0);\n",
    );
    for (i, name) in samplers.iter().enumerate() {
        let branch = if i == 0 { "if" } else { "else if" };
        let _ = writeln!(
            source,
            "    {branch} (in.vTextureId < {}.5) {{\n        color = textureSampleGrad({name}, {name}_sampler, in.vTextureCoord, dx, dy);\n    }}",
            i
        );
    }
    source.push_str("    return color * in.vColor;\n}\n");

    let mut builder = Program::builder("batch", source)
        .attribute(A_POSITION, 0, 3, DataType::F32)
        .attribute(A_UV, 1, 2, DataType::F32)
        .attribute(A_COLOR, 2, 4, DataType::U8)
        .attribute(A_TEXTURE_ID, 3, 1, DataType::F32)
        .uniform(PROJECTION, UniformType::Mat3);
    for name in &samplers {
        builder = builder.sampler(name);
    }
    builder
}

// ─────────────────────────────────────────────────────────────────────────────
// Filters
// ─────────────────────────────────────────────────────────────────────────────

const FILTER_VERTEX: &str = r#"
struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) vTextureCoord: vec2<f32>,
};

@vertex
fn vs_main(@location(0) aVertexPosition: vec2<f32>) -> VertexOutput {
    var out: VertexOutput;
    let position = aVertexPosition * max(u.outputFrame.zw, vec2<f32>(0.0)) + u.outputFrame.xy;
    out.position = vec4<f32>((u.projectionMatrix * vec3<f32>(position, 1.0)).xy, 0.0, 1.0);
    out.vTextureCoord = aVertexPosition * (u.outputFrame.zw * u.inputSize.zw);
    return out;
}
"#;

/// A filter program around `fragment`
///
/// `uniforms` and `samplers` are the filter's own, declared after the
/// projection and filter globals. The input texture is always the first
/// sampler, `uSampler`. `fragment` must define `fs_main`.
pub fn filter_program(
    name: &str,
    uniforms: &[(&str, UniformType)],
    samplers: &[&str],
    fragment: &str,
) -> ProgramBuilder {
    let mut fields = vec![(PROJECTION, UniformType::Mat3)];
    fields.extend_from_slice(&FILTER_GLOBALS);
    fields.extend_from_slice(uniforms);

    let mut all_samplers = vec!["uSampler"];
    all_samplers.extend_from_slice(samplers);

    let mut source = uniform_block(&fields);
    source.push_str(&texture_bindings(&all_samplers));
    source.push_str(FILTER_VERTEX);
    source.push_str(fragment);

    let mut builder =
        Program::builder(name, source).attribute("aVertexPosition", 0, 2, DataType::F32);
    for (name, ty) in fields {
        builder = builder.uniform(name, ty);
    }
    for name in all_samplers {
        builder = builder.sampler(name);
    }
    builder
}

const PASS_THROUGH_FRAGMENT: &str = r#"
@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    return textureSample(uSampler, uSampler_sampler, in.vTextureCoord);
}
"#;

/// Copies the input unchanged
pub fn pass_through_program() -> ProgramBuilder {
    filter_program("pass-through", &[], &[], PASS_THROUGH_FRAGMENT)
}

const ALPHA_FRAGMENT: &str = r#"
@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    return textureSample(uSampler, uSampler_sampler, in.vTextureCoord) * u.uAlpha;
}
"#;

/// Multiplies the input by `uAlpha`
pub fn alpha_program() -> ProgramBuilder {
    filter_program("alpha", &[("uAlpha", UniformType::Float)], &[], ALPHA_FRAGMENT)
}

const SPRITE_MASK_FRAGMENT: &str = r#"
@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let maskCoord = (u.otherMatrix * vec3<f32>(in.vTextureCoord, 1.0)).xy;
    let c = u.maskClamp;
    let clip = step(3.5,
        step(c.x, maskCoord.x) +
        step(c.y, maskCoord.y) +
        step(maskCoord.x, c.z) +
        step(maskCoord.y, c.w));
    let original = textureSample(uSampler, uSampler_sampler, in.vTextureCoord);
    let masky = textureSample(uMask, uMask_sampler, maskCoord);
    let alphaMul = 1.0 - u.npmAlpha * (1.0 - masky.a);
    return original * (alphaMul * masky.r * u.alpha * clip);
}
"#;

pub const SPRITE_MASK_UNIFORMS: [(&str, UniformType); 4] = [
    ("otherMatrix", UniformType::Mat3),
    ("maskClamp", UniformType::Vec4),
    ("alpha", UniformType::Float),
    ("npmAlpha", UniformType::Float),
];

/// Multiplies the input by the red channel of a mask sprite
pub fn sprite_mask_program() -> ProgramBuilder {
    filter_program(
        "sprite-mask",
        &SPRITE_MASK_UNIFORMS,
        &["uMask"],
        SPRITE_MASK_FRAGMENT,
    )
}
