//! Mapping from a sprite's local UV space into its texture's frame

use crate::math::Matrix;
use crate::texture::Texture;

/// UV transform and clamp rectangle for sampling one texture frame
///
/// Shaders that sample a texture with their own coordinates (masks, tiling)
/// multiply by `map_coord` and clamp to `clamp_frame` so neighbouring atlas
/// frames never bleed in.
#[derive(Clone, Debug)]
pub struct TextureMatrix {
    texture: Texture,
    /// Local `[0, 1]` coordinates to base texture UVs
    pub map_coord: Matrix,
    /// `[left, top, right, bottom]` in base texture UVs
    pub clamp_frame: [f32; 4],
    pub clamp_offset: [f32; 2],
    /// Inset, in pixels, applied to the clamp frame
    pub clamp_margin: f32,
    /// Extra shift, in pixels, applied to the clamp frame
    pub offset: f32,
    /// Frame covers the whole base texture without rotation
    pub is_simple: bool,
    texture_update_id: Option<u32>,
    update_id: u32,
}

impl TextureMatrix {
    pub fn new(texture: Texture) -> Self {
        Self::with_margin(texture, 0.5)
    }

    pub fn with_margin(texture: Texture, clamp_margin: f32) -> Self {
        Self {
            texture,
            map_coord: Matrix::IDENTITY,
            clamp_frame: [0.0; 4],
            clamp_offset: [0.0; 2],
            clamp_margin,
            offset: 0.0,
            is_simple: false,
            texture_update_id: None,
            update_id: 0,
        }
    }

    pub fn texture(&self) -> &Texture {
        &self.texture
    }

    pub fn set_texture(&mut self, texture: Texture) {
        if self.texture != texture {
            self.texture = texture;
            self.texture_update_id = None;
        }
    }

    /// Incremented every time the matrix is recomputed
    pub fn update_id(&self) -> u32 {
        self.update_id
    }

    /// Recompute if the texture's UVs changed (or `force`); returns whether it did
    pub fn update(&mut self, force: bool) -> bool {
        let tex = &self.texture;
        if !tex.valid() {
            return false;
        }
        let tex_update = tex.update_id();
        if !force && self.texture_update_id == Some(tex_update) {
            return false;
        }
        self.texture_update_id = Some(tex_update);
        self.update_id = self.update_id.wrapping_add(1);

        let uvs = tex.uvs();
        self.map_coord = Matrix::new(
            uvs.x1 - uvs.x0,
            uvs.y1 - uvs.y0,
            uvs.x3 - uvs.x0,
            uvs.y3 - uvs.y0,
            uvs.x0,
            uvs.y0,
        );

        let orig = tex.orig();
        if let Some(trim) = tex.trim() {
            let untrim = Matrix::new(
                orig.width / trim.width,
                0.0,
                0.0,
                orig.height / trim.height,
                -trim.x / trim.width,
                -trim.y / trim.height,
            );
            self.map_coord.append(&untrim);
        }

        let base = tex.base_texture();
        let frame = tex.frame();
        let margin = self.clamp_margin / base.resolution();
        let offset = self.offset;
        let (bw, bh) = (base.width(), base.height());

        self.clamp_frame = [
            (frame.x + margin + offset) / bw,
            (frame.y + margin + offset) / bh,
            (frame.x + frame.width - margin + offset) / bw,
            (frame.y + frame.height - margin + offset) / bh,
        ];
        self.clamp_offset = [
            offset / base.real_width().max(1) as f32,
            offset / base.real_height().max(1) as f32,
        ];
        self.is_simple = frame.width == bw && frame.height == bh && tex.rotate() == 0;
        true
    }

    /// Map pairs of local UVs through `map_coord`
    pub fn multiply_uvs(&self, uvs: &[f32], out: &mut [f32]) {
        let m = &self.map_coord;
        for (src, dst) in uvs.chunks_exact(2).zip(out.chunks_exact_mut(2)) {
            let (x, y) = (src[0], src[1]);
            dst[0] = x * m.a + y * m.c + m.tx;
            dst[1] = x * m.b + y * m.d + m.ty;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base_texture::BaseTexture;
    use crate::math::Rectangle;

    fn base(w: u32, h: u32) -> BaseTexture {
        BaseTexture::from_buffer(vec![0; (w * h * 4) as usize], w, h, Default::default()).unwrap()
    }

    #[test]
    fn maps_unit_square_onto_frame() {
        let texture = Texture::with_frame(base(100, 100), Rectangle::new(50.0, 0.0, 50.0, 25.0))
            .unwrap();
        let mut matrix = TextureMatrix::with_margin(texture, 0.0);
        assert!(matrix.update(false));

        let mut out = [0.0; 4];
        matrix.multiply_uvs(&[0.0, 0.0, 1.0, 1.0], &mut out);
        assert_eq!(out, [0.5, 0.0, 1.0, 0.25]);
        assert!(!matrix.is_simple);
        assert_eq!(matrix.clamp_frame, [0.5, 0.0, 1.0, 0.25]);
    }

    #[test]
    fn recomputes_only_when_texture_changes() {
        let texture = Texture::from_base(base(16, 16));
        let mut matrix = TextureMatrix::new(texture.clone());
        assert!(matrix.update(false));
        assert!(!matrix.update(false));
        assert!(matrix.is_simple);

        texture.update_uvs();
        assert!(matrix.update(false));
        assert!(matrix.update(true));
        assert_eq!(matrix.update_id(), 3);
    }

    #[test]
    fn invalid_texture_is_skipped() {
        let empty = BaseTexture::new(None, Default::default()).unwrap();
        let mut matrix = TextureMatrix::new(Texture::from_base(empty));
        assert!(!matrix.update(true));
    }
}
