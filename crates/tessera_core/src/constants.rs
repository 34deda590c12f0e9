//! Texture, blend and draw enums shared between the logical and GPU layers

/// Blend modes understood by the renderer
///
/// The `*Npm` variants are the non-premultiplied counterparts of `Normal`,
/// `Add` and `Screen`; [`premultiply_blend_mode`] converts between them based
/// on the texture alpha mode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum BlendMode {
    #[default]
    Normal,
    Add,
    Multiply,
    Screen,
    NormalNpm,
    AddNpm,
    ScreenNpm,
    /// Blending disabled
    None,
    SrcIn,
    SrcOut,
    SrcAtop,
    DstOver,
    DstIn,
    DstOut,
    DstAtop,
    Xor,
    Subtract,
}

impl BlendMode {
    /// Erasing is destination-out
    pub const ERASE: BlendMode = BlendMode::DstOut;

    /// Fixed-function factors for this mode
    pub fn state(self) -> BlendState {
        use BlendFactor::*;

        match self {
            BlendMode::Normal => BlendState::simple(One, OneMinusSrcAlpha),
            BlendMode::Add => BlendState::simple(One, One),
            BlendMode::Multiply => {
                BlendState::separate(DstColor, OneMinusSrcAlpha, One, OneMinusSrcAlpha)
            }
            BlendMode::Screen => BlendState::separate(One, OneMinusSrc, One, OneMinusSrcAlpha),
            BlendMode::NormalNpm => {
                BlendState::separate(SrcAlpha, OneMinusSrcAlpha, One, OneMinusSrcAlpha)
            }
            BlendMode::AddNpm => BlendState::separate(SrcAlpha, One, One, One),
            BlendMode::ScreenNpm => {
                BlendState::separate(SrcAlpha, OneMinusSrc, One, OneMinusSrcAlpha)
            }
            BlendMode::None => BlendState::simple(Zero, Zero),
            BlendMode::SrcIn => BlendState::simple(DstAlpha, Zero),
            BlendMode::SrcOut => BlendState::simple(OneMinusDstAlpha, Zero),
            BlendMode::SrcAtop => BlendState::simple(DstAlpha, OneMinusSrcAlpha),
            BlendMode::DstOver => BlendState::simple(OneMinusDstAlpha, One),
            BlendMode::DstIn => BlendState::simple(Zero, SrcAlpha),
            BlendMode::DstOut => BlendState::simple(Zero, OneMinusSrcAlpha),
            BlendMode::DstAtop => BlendState::simple(OneMinusDstAlpha, SrcAlpha),
            BlendMode::Xor => BlendState::simple(OneMinusDstAlpha, OneMinusSrcAlpha),
            BlendMode::Subtract => BlendState {
                equation_rgb: BlendEquation::ReverseSubtract,
                ..BlendState::simple(One, One)
            },
        }
    }
}

/// Map a blend mode to the variant matching the texture's alpha handling
///
/// Premultiplied textures use `Normal/Add/Screen`, straight-alpha textures
/// use the `*Npm` variants. Every other mode is returned unchanged.
pub fn premultiply_blend_mode(premultiplied: bool, mode: BlendMode) -> BlendMode {
    match (premultiplied, mode) {
        (true, BlendMode::NormalNpm) => BlendMode::Normal,
        (true, BlendMode::AddNpm) => BlendMode::Add,
        (true, BlendMode::ScreenNpm) => BlendMode::Screen,
        (false, BlendMode::Normal) => BlendMode::NormalNpm,
        (false, BlendMode::Add) => BlendMode::AddNpm,
        (false, BlendMode::Screen) => BlendMode::ScreenNpm,
        (_, mode) => mode,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    Zero,
    One,
    Src,
    OneMinusSrc,
    SrcAlpha,
    OneMinusSrcAlpha,
    DstColor,
    OneMinusDst,
    DstAlpha,
    OneMinusDstAlpha,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum BlendEquation {
    #[default]
    Add,
    Subtract,
    ReverseSubtract,
}

/// Source/destination factors for color and alpha
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BlendState {
    pub src_rgb: BlendFactor,
    pub dst_rgb: BlendFactor,
    pub src_alpha: BlendFactor,
    pub dst_alpha: BlendFactor,
    pub equation_rgb: BlendEquation,
    pub equation_alpha: BlendEquation,
}

impl BlendState {
    pub const fn simple(src: BlendFactor, dst: BlendFactor) -> Self {
        Self::separate(src, dst, src, dst)
    }

    pub const fn separate(
        src_rgb: BlendFactor,
        dst_rgb: BlendFactor,
        src_alpha: BlendFactor,
        dst_alpha: BlendFactor,
    ) -> Self {
        Self {
            src_rgb,
            dst_rgb,
            src_alpha,
            dst_alpha,
            equation_rgb: BlendEquation::Add,
            equation_alpha: BlendEquation::Add,
        }
    }
}

/// How the alpha channel of a texture relates to its color channels
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum AlphaMode {
    /// Straight alpha, uploaded as is
    NoPremultipliedAlpha,
    /// Straight alpha, premultiplied during upload
    #[default]
    Unpack,
    /// Source is already premultiplied
    PremultipliedAlpha,
}

impl AlphaMode {
    /// Whether sampled colors are premultiplied once on the GPU
    pub fn is_premultiplied(self) -> bool {
        !matches!(self, AlphaMode::NoPremultipliedAlpha)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ScaleMode {
    Nearest,
    #[default]
    Linear,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum WrapMode {
    #[default]
    Clamp,
    Repeat,
    MirroredRepeat,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum MipmapMode {
    Off,
    /// Only for power-of-two textures
    #[default]
    Pow2,
    On,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    #[default]
    Rgba,
    Rgb,
    Rg,
    Red,
    Alpha,
    DepthStencil,
}

impl PixelFormat {
    pub fn channels(self) -> usize {
        match self {
            PixelFormat::Rgba => 4,
            PixelFormat::Rgb => 3,
            PixelFormat::Rg => 2,
            PixelFormat::Red | PixelFormat::Alpha => 1,
            PixelFormat::DepthStencil => 1,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum PixelType {
    #[default]
    UnsignedByte,
    HalfFloat,
    Float,
    UnsignedInt248,
}

impl PixelType {
    /// Bytes per channel
    pub fn size(self) -> usize {
        match self {
            PixelType::UnsignedByte => 1,
            PixelType::HalfFloat => 2,
            PixelType::Float | PixelType::UnsignedInt248 => 4,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum TextureTarget {
    #[default]
    Texture2D,
    Texture2DArray,
    TextureCube,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum DrawMode {
    Points,
    Lines,
    LineStrip,
    #[default]
    Triangles,
    TriangleStrip,
}

/// Mask implementation chosen for a mask stack entry
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum MaskType {
    #[default]
    None,
    Scissor,
    Stencil,
    Sprite,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn premultiplied_mapping_roundtrips() {
        for mode in [BlendMode::Normal, BlendMode::Add, BlendMode::Screen] {
            let npm = premultiply_blend_mode(false, mode);
            assert_ne!(npm, mode);
            assert_eq!(premultiply_blend_mode(true, npm), mode);
        }
    }

    #[test]
    fn other_modes_are_untouched() {
        assert_eq!(
            premultiply_blend_mode(false, BlendMode::Multiply),
            BlendMode::Multiply
        );
        assert_eq!(premultiply_blend_mode(true, BlendMode::Xor), BlendMode::Xor);
    }

    #[test]
    fn subtract_uses_reverse_equation() {
        let s = BlendMode::Subtract.state();
        assert_eq!(s.equation_rgb, BlendEquation::ReverseSubtract);
        assert_eq!(s.equation_alpha, BlendEquation::Add);
    }

    #[test]
    fn default_alpha_mode_premultiplies() {
        assert!(AlphaMode::default().is_premultiplied());
        assert!(!AlphaMode::NoPremultipliedAlpha.is_premultiplied());
    }
}
