//! Mapping renderer enums onto wgpu

use tessera_core::{
    BlendEquation, BlendFactor, BlendState, DataType, DrawMode, IndexFormat, PixelFormat,
    PixelType, ScaleMode, WrapMode,
};

use crate::backend::{SamplerDesc, StencilOp, VertexFormat};

pub(super) fn blend_factor(factor: BlendFactor) -> wgpu::BlendFactor {
    match factor {
        BlendFactor::Zero => wgpu::BlendFactor::Zero,
        BlendFactor::One => wgpu::BlendFactor::One,
        BlendFactor::Src => wgpu::BlendFactor::Src,
        BlendFactor::OneMinusSrc => wgpu::BlendFactor::OneMinusSrc,
        BlendFactor::SrcAlpha => wgpu::BlendFactor::SrcAlpha,
        BlendFactor::OneMinusSrcAlpha => wgpu::BlendFactor::OneMinusSrcAlpha,
        BlendFactor::DstColor => wgpu::BlendFactor::Dst,
        BlendFactor::OneMinusDst => wgpu::BlendFactor::OneMinusDst,
        BlendFactor::DstAlpha => wgpu::BlendFactor::DstAlpha,
        BlendFactor::OneMinusDstAlpha => wgpu::BlendFactor::OneMinusDstAlpha,
    }
}

fn blend_operation(equation: BlendEquation) -> wgpu::BlendOperation {
    match equation {
        BlendEquation::Add => wgpu::BlendOperation::Add,
        BlendEquation::Subtract => wgpu::BlendOperation::Subtract,
        BlendEquation::ReverseSubtract => wgpu::BlendOperation::ReverseSubtract,
    }
}

pub(super) fn blend_state(blend: &BlendState) -> wgpu::BlendState {
    wgpu::BlendState {
        color: wgpu::BlendComponent {
            src_factor: blend_factor(blend.src_rgb),
            dst_factor: blend_factor(blend.dst_rgb),
            operation: blend_operation(blend.equation_rgb),
        },
        alpha: wgpu::BlendComponent {
            src_factor: blend_factor(blend.src_alpha),
            dst_factor: blend_factor(blend.dst_alpha),
            operation: blend_operation(blend.equation_alpha),
        },
    }
}

pub(super) fn topology(mode: DrawMode) -> wgpu::PrimitiveTopology {
    match mode {
        DrawMode::Points => wgpu::PrimitiveTopology::PointList,
        DrawMode::Lines => wgpu::PrimitiveTopology::LineList,
        DrawMode::LineStrip => wgpu::PrimitiveTopology::LineStrip,
        DrawMode::Triangles => wgpu::PrimitiveTopology::TriangleList,
        DrawMode::TriangleStrip => wgpu::PrimitiveTopology::TriangleStrip,
    }
}

pub(super) fn is_strip(mode: DrawMode) -> bool {
    matches!(mode, DrawMode::LineStrip | DrawMode::TriangleStrip)
}

pub(super) fn index_format(format: IndexFormat) -> wgpu::IndexFormat {
    match format {
        IndexFormat::U16 => wgpu::IndexFormat::Uint16,
        IndexFormat::U32 => wgpu::IndexFormat::Uint32,
    }
}

pub(super) fn stencil_face(op: Option<StencilOp>) -> wgpu::StencilFaceState {
    let Some(op) = op else {
        return wgpu::StencilFaceState::IGNORE;
    };
    let pass_op = match op {
        StencilOp::Keep => wgpu::StencilOperation::Keep,
        StencilOp::Increment => wgpu::StencilOperation::IncrementClamp,
        StencilOp::Decrement => wgpu::StencilOperation::DecrementClamp,
    };
    wgpu::StencilFaceState {
        compare: wgpu::CompareFunction::Equal,
        fail_op: wgpu::StencilOperation::Keep,
        depth_fail_op: wgpu::StencilOperation::Keep,
        pass_op,
    }
}

/// Vertex format for an attribute, `None` when wgpu has no equivalent
pub(super) fn vertex_format(format: &VertexFormat) -> Option<wgpu::VertexFormat> {
    use wgpu::VertexFormat as F;

    let VertexFormat {
        data_type,
        size,
        normalized,
    } = *format;
    let out = match (data_type, size, normalized) {
        (DataType::F32, 1, _) => F::Float32,
        (DataType::F32, 2, _) => F::Float32x2,
        (DataType::F32, 3, _) => F::Float32x3,
        (DataType::F32, 4, _) => F::Float32x4,
        (DataType::U8, 2, true) => F::Unorm8x2,
        (DataType::U8, 4, true) => F::Unorm8x4,
        (DataType::U8, 2, false) => F::Uint8x2,
        (DataType::U8, 4, false) => F::Uint8x4,
        (DataType::I8, 2, true) => F::Snorm8x2,
        (DataType::I8, 4, true) => F::Snorm8x4,
        (DataType::I8, 2, false) => F::Sint8x2,
        (DataType::I8, 4, false) => F::Sint8x4,
        (DataType::U16, 2, true) => F::Unorm16x2,
        (DataType::U16, 4, true) => F::Unorm16x4,
        (DataType::U16, 2, false) => F::Uint16x2,
        (DataType::U16, 4, false) => F::Uint16x4,
        (DataType::I16, 2, true) => F::Snorm16x2,
        (DataType::I16, 4, true) => F::Snorm16x4,
        (DataType::I16, 2, false) => F::Sint16x2,
        (DataType::I16, 4, false) => F::Sint16x4,
        (DataType::U32, 1, _) => F::Uint32,
        (DataType::U32, 2, _) => F::Uint32x2,
        (DataType::U32, 3, _) => F::Uint32x3,
        (DataType::U32, 4, _) => F::Uint32x4,
        (DataType::I32, 1, _) => F::Sint32,
        (DataType::I32, 2, _) => F::Sint32x2,
        (DataType::I32, 3, _) => F::Sint32x3,
        (DataType::I32, 4, _) => F::Sint32x4,
        _ => return None,
    };
    Some(out)
}

/// Storage format for uploaded pixels
///
/// Three-channel data is widened to four on upload.
pub(super) fn texture_format(format: PixelFormat, pixel_type: PixelType) -> Option<wgpu::TextureFormat> {
    use wgpu::TextureFormat as T;

    let out = match (format, pixel_type) {
        (PixelFormat::Rgba | PixelFormat::Rgb, PixelType::UnsignedByte) => T::Rgba8Unorm,
        (PixelFormat::Rg, PixelType::UnsignedByte) => T::Rg8Unorm,
        (PixelFormat::Red | PixelFormat::Alpha, PixelType::UnsignedByte) => T::R8Unorm,
        (PixelFormat::Rgba | PixelFormat::Rgb, PixelType::HalfFloat) => T::Rgba16Float,
        (PixelFormat::Rg, PixelType::HalfFloat) => T::Rg16Float,
        (PixelFormat::Red | PixelFormat::Alpha, PixelType::HalfFloat) => T::R16Float,
        _ => return None,
    };
    Some(out)
}

fn address_mode(wrap: WrapMode) -> wgpu::AddressMode {
    match wrap {
        WrapMode::Clamp => wgpu::AddressMode::ClampToEdge,
        WrapMode::Repeat => wgpu::AddressMode::Repeat,
        WrapMode::MirroredRepeat => wgpu::AddressMode::MirrorRepeat,
    }
}

fn filter_mode(scale: ScaleMode) -> wgpu::FilterMode {
    match scale {
        ScaleMode::Nearest => wgpu::FilterMode::Nearest,
        ScaleMode::Linear => wgpu::FilterMode::Linear,
    }
}

pub(super) fn sampler_descriptor(desc: &SamplerDesc) -> wgpu::SamplerDescriptor<'static> {
    let address = address_mode(desc.wrap_mode);
    let filter = filter_mode(desc.scale_mode);
    let mipmap_filter = if desc.mipmap {
        filter
    } else {
        wgpu::FilterMode::Nearest
    };
    // anisotropy requires linear filtering everywhere
    let anisotropy_clamp = if desc.scale_mode == ScaleMode::Linear && desc.mipmap {
        desc.anisotropy.clamp(1, 16) as u16
    } else {
        1
    };

    wgpu::SamplerDescriptor {
        label: Some("tessera sampler"),
        address_mode_u: address,
        address_mode_v: address,
        address_mode_w: address,
        mag_filter: filter,
        min_filter: filter,
        mipmap_filter,
        anisotropy_clamp,
        ..Default::default()
    }
}

/// Widen and premultiply pixels into what the storage format expects
///
/// Returns `None` when `data` can be written as is.
pub(super) fn prepare_pixels(
    data: &[u8],
    format: PixelFormat,
    pixel_type: PixelType,
    premultiply: bool,
) -> Option<Vec<u8>> {
    if pixel_type != PixelType::UnsignedByte {
        return None;
    }

    let widened = match format {
        PixelFormat::Rgb => Some(
            data.chunks_exact(3)
                .flat_map(|p| [p[0], p[1], p[2], 255])
                .collect::<Vec<u8>>(),
        ),
        _ => None,
    };

    if !premultiply || format != PixelFormat::Rgba {
        return widened;
    }

    let mut out = widened.unwrap_or_else(|| data.to_vec());
    for pixel in out.chunks_exact_mut(4) {
        let alpha = pixel[3] as u32;
        for channel in &mut pixel[..3] {
            *channel = ((*channel as u32 * alpha + 127) / 255) as u8;
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_vertex_formats_are_supported() {
        let color = VertexFormat {
            data_type: DataType::U8,
            size: 4,
            normalized: true,
        };
        let position = VertexFormat {
            data_type: DataType::F32,
            size: 3,
            normalized: false,
        };

        assert_eq!(vertex_format(&color), Some(wgpu::VertexFormat::Unorm8x4));
        assert_eq!(vertex_format(&position), Some(wgpu::VertexFormat::Float32x3));
        assert_eq!(
            vertex_format(&VertexFormat {
                data_type: DataType::U8,
                size: 3,
                normalized: true
            }),
            None
        );
    }

    #[test]
    fn rgb_pixels_are_widened() {
        let out = prepare_pixels(&[1, 2, 3, 4, 5, 6], PixelFormat::Rgb, PixelType::UnsignedByte, false);

        assert_eq!(out, Some(vec![1, 2, 3, 255, 4, 5, 6, 255]));
    }

    #[test]
    fn premultiply_scales_color_by_alpha() {
        let out = prepare_pixels(&[255, 128, 0, 128], PixelFormat::Rgba, PixelType::UnsignedByte, true);

        assert_eq!(out, Some(vec![128, 64, 0, 128]));
    }

    #[test]
    fn straight_rgba_is_written_as_is() {
        assert_eq!(
            prepare_pixels(&[1, 2, 3, 4], PixelFormat::Rgba, PixelType::UnsignedByte, false),
            None
        );
    }

    #[test]
    fn stencil_ops_clamp() {
        let face = stencil_face(Some(StencilOp::Decrement));

        assert_eq!(face.compare, wgpu::CompareFunction::Equal);
        assert_eq!(face.pass_op, wgpu::StencilOperation::DecrementClamp);
        assert_eq!(stencil_face(None), wgpu::StencilFaceState::IGNORE);
    }
}
