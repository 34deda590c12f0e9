//! Tint colors and packed vertex colors

/// RGBA color with f32 components (0.0 to 1.0)
#[derive(Clone, Copy, Debug, PartialEq)]
#[repr(C)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Default for Color {
    fn default() -> Self {
        Self::WHITE
    }
}

impl Color {
    pub const WHITE: Color = Color {
        r: 1.0,
        g: 1.0,
        b: 1.0,
        a: 1.0,
    };
    pub const BLACK: Color = Color {
        r: 0.0,
        g: 0.0,
        b: 0.0,
        a: 1.0,
    };
    pub const TRANSPARENT: Color = Color {
        r: 0.0,
        g: 0.0,
        b: 0.0,
        a: 0.0,
    };

    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    pub const fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b, a: 1.0 }
    }

    /// Create from a 0xRRGGBB value, fully opaque
    pub fn from_hex(hex: u32) -> Self {
        Self::rgb(
            ((hex >> 16) & 0xFF) as f32 / 255.0,
            ((hex >> 8) & 0xFF) as f32 / 255.0,
            (hex & 0xFF) as f32 / 255.0,
        )
    }

    pub fn with_alpha(self, a: f32) -> Self {
        Self { a, ..self }
    }

    pub fn to_array(self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }

    /// Color multiplied by its own alpha
    pub fn premultiplied(self) -> [f32; 4] {
        [self.r * self.a, self.g * self.a, self.b * self.a, self.a]
    }

    /// Pack into a vertex color: bytes R, G, B, A in memory order
    ///
    /// When `premultiply` is set the color channels are scaled by alpha, which
    /// is what premultiplied textures expect.
    pub fn pack(self, premultiply: bool) -> u32 {
        let a = self.a.clamp(0.0, 1.0);
        if premultiply && a <= 0.0 {
            return 0;
        }

        let scale = if premultiply { a } else { 1.0 };
        let channel = |v: f32| (v.clamp(0.0, 1.0) * scale * 255.0).round() as u8;

        u32::from_le_bytes([
            channel(self.r),
            channel(self.g),
            channel(self.b),
            (a * 255.0).round() as u8,
        ])
    }
}
