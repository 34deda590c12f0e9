//! Renderable data handed to the GPU layer
//!
//! The renderer never walks a scene graph. Callers flatten their scene into
//! items that expose world-space vertices, UVs, indices, tint and a texture
//! through [`Batchable`].

use std::fmt;

use crate::color::Color;
use crate::constants::BlendMode;
use crate::math::{Matrix, Point, Rectangle};
use crate::signal::next_uid;
use crate::texture::Texture;

/// Index pattern of a two-triangle quad
pub const QUAD_INDICES: [u16; 6] = [0, 1, 2, 0, 2, 3];

/// Anything the batch renderer can pack
pub trait Batchable {
    /// World-space positions as `x, y` pairs
    fn vertex_data(&self) -> &[f32];

    /// Texture coordinates as `u, v` pairs, parallel to `vertex_data`
    fn uvs(&self) -> &[f32];

    /// Triangle list indices into this item's own vertices
    fn indices(&self) -> &[u16];

    /// Tint with the world alpha folded into `a`
    fn tint(&self) -> Color;

    fn blend_mode(&self) -> BlendMode;

    fn texture(&self) -> &Texture;

    fn depth(&self) -> f32 {
        0.0
    }

    fn vertex_count(&self) -> usize {
        self.vertex_data().len() / 2
    }
}

/// Something that can be used as a mask
pub trait MaskObject: Batchable {
    fn world_transform(&self) -> Matrix;

    /// Axis-aligned world bounds
    fn bounds(&self) -> Rectangle;

    /// A single rectangle, eligible for scissor masking when axis-aligned
    fn is_fast_rect(&self) -> bool {
        false
    }

    fn as_sprite(&self) -> Option<&Sprite> {
        None
    }
}

fn vertex_bounds(vertex_data: &[f32]) -> Rectangle {
    if vertex_data.len() < 2 {
        return Rectangle::EMPTY;
    }
    let (mut min_x, mut min_y) = (f32::INFINITY, f32::INFINITY);
    let (mut max_x, mut max_y) = (f32::NEG_INFINITY, f32::NEG_INFINITY);
    for p in vertex_data.chunks_exact(2) {
        min_x = min_x.min(p[0]);
        max_x = max_x.max(p[0]);
        min_y = min_y.min(p[1]);
        max_y = max_y.max(p[1]);
    }
    Rectangle::new(min_x, min_y, max_x - min_x, max_y - min_y)
}

// ─────────────────────────────────────────────────────────────────────────────
// BatchElement
// ─────────────────────────────────────────────────────────────────────────────

/// Pre-transformed triangles with a texture
///
/// Covers meshes, graphics fills and text quads produced by collaborators.
#[derive(Clone)]
pub struct BatchElement {
    uid: u64,
    pub vertex_data: Vec<f32>,
    pub uvs: Vec<f32>,
    pub indices: Vec<u16>,
    pub tint: Color,
    pub blend_mode: BlendMode,
    pub texture: Texture,
    pub depth: f32,
    pub world_transform: Matrix,
    /// Local rectangle when the element is a plain rectangle
    fast_rect: Option<Rectangle>,
}

impl fmt::Debug for BatchElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchElement")
            .field("uid", &self.uid)
            .field("vertices", &(self.vertex_data.len() / 2))
            .field("indices", &self.indices.len())
            .field("blend_mode", &self.blend_mode)
            .finish()
    }
}

impl BatchElement {
    pub fn new(texture: Texture, vertex_data: Vec<f32>, uvs: Vec<f32>, indices: Vec<u16>) -> Self {
        Self {
            uid: next_uid(),
            vertex_data,
            uvs,
            indices,
            tint: Color::WHITE,
            blend_mode: BlendMode::Normal,
            texture,
            depth: 0.0,
            world_transform: Matrix::IDENTITY,
            fast_rect: None,
        }
    }

    /// Quad over the texture's full UV frame
    pub fn quad(texture: Texture, vertex_data: [f32; 8]) -> Self {
        let uvs = texture.uvs().to_array().to_vec();
        Self::new(texture, vertex_data.to_vec(), uvs, QUAD_INDICES.to_vec())
    }

    /// Solid rectangle in local space, placed by `transform`
    pub fn rectangle(texture: Texture, rect: Rectangle, transform: Matrix) -> Self {
        let corners = [
            Point::new(rect.left(), rect.top()),
            Point::new(rect.right(), rect.top()),
            Point::new(rect.right(), rect.bottom()),
            Point::new(rect.left(), rect.bottom()),
        ];
        let mut vertex_data = [0.0; 8];
        for (i, corner) in corners.into_iter().enumerate() {
            let p = transform.apply(corner);
            vertex_data[i * 2] = p.x;
            vertex_data[i * 2 + 1] = p.y;
        }
        let mut element = Self::quad(texture, vertex_data);
        element.world_transform = transform;
        element.fast_rect = Some(rect);
        element
    }

    pub fn uid(&self) -> u64 {
        self.uid
    }

    pub fn with_tint(mut self, tint: Color) -> Self {
        self.tint = tint;
        self
    }

    pub fn with_blend_mode(mut self, blend_mode: BlendMode) -> Self {
        self.blend_mode = blend_mode;
        self
    }

    pub fn with_depth(mut self, depth: f32) -> Self {
        self.depth = depth;
        self
    }
}

impl Batchable for BatchElement {
    fn vertex_data(&self) -> &[f32] {
        &self.vertex_data
    }

    fn uvs(&self) -> &[f32] {
        &self.uvs
    }

    fn indices(&self) -> &[u16] {
        &self.indices
    }

    fn tint(&self) -> Color {
        self.tint
    }

    fn blend_mode(&self) -> BlendMode {
        self.blend_mode
    }

    fn texture(&self) -> &Texture {
        &self.texture
    }

    fn depth(&self) -> f32 {
        self.depth
    }
}

impl MaskObject for BatchElement {
    fn world_transform(&self) -> Matrix {
        self.world_transform
    }

    fn bounds(&self) -> Rectangle {
        match &self.fast_rect {
            Some(rect) => rect.transformed(&self.world_transform),
            None => vertex_bounds(&self.vertex_data),
        }
    }

    fn is_fast_rect(&self) -> bool {
        self.fast_rect.is_some()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sprite
// ─────────────────────────────────────────────────────────────────────────────

/// Textured quad with an anchor and a world transform
///
/// Vertices are cached. Setters recompute them; call [`Sprite::calculate_vertices`]
/// after changing the texture's frame from outside.
#[derive(Clone)]
pub struct Sprite {
    uid: u64,
    texture: Texture,
    anchor: Point,
    world_transform: Matrix,
    pub tint: Color,
    pub alpha: f32,
    pub blend_mode: BlendMode,
    pub depth: f32,
    vertex_data: [f32; 8],
    uvs: [f32; 8],
    texture_id: Option<u32>,
}

impl fmt::Debug for Sprite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sprite")
            .field("uid", &self.uid)
            .field("texture", &self.texture)
            .field("anchor", &self.anchor)
            .field("world_transform", &self.world_transform)
            .finish()
    }
}

impl Sprite {
    pub fn new(texture: Texture) -> Self {
        let anchor = texture.default_anchor();
        let mut sprite = Self {
            uid: next_uid(),
            texture,
            anchor,
            world_transform: Matrix::IDENTITY,
            tint: Color::WHITE,
            alpha: 1.0,
            blend_mode: BlendMode::Normal,
            depth: 0.0,
            vertex_data: [0.0; 8],
            uvs: [0.0; 8],
            texture_id: None,
        };
        sprite.refresh();
        sprite
    }

    pub fn uid(&self) -> u64 {
        self.uid
    }

    pub fn texture(&self) -> &Texture {
        &self.texture
    }

    pub fn set_texture(&mut self, texture: Texture) {
        if self.texture != texture {
            self.texture = texture;
            self.refresh();
        }
    }

    pub fn anchor(&self) -> Point {
        self.anchor
    }

    pub fn set_anchor(&mut self, anchor: Point) {
        self.anchor = anchor;
        self.refresh();
    }

    pub fn world_transform(&self) -> Matrix {
        self.world_transform
    }

    pub fn set_world_transform(&mut self, transform: Matrix) {
        self.world_transform = transform;
        self.refresh();
    }

    /// Visual size, from the texture's untrimmed frame
    pub fn size(&self) -> (f32, f32) {
        (self.texture.width(), self.texture.height())
    }

    /// Recompute vertices if the texture's UVs moved since the last call
    pub fn calculate_vertices(&mut self) {
        if self.texture_id != Some(self.texture.update_id()) {
            self.refresh();
        }
    }

    fn refresh(&mut self) {
        self.texture_id = Some(self.texture.update_id());
        self.uvs = self.texture.uvs().to_array();

        let orig = self.texture.orig();
        let (w0, w1, h0, h1) = match self.texture.trim() {
            Some(trim) => {
                let w1 = trim.x - self.anchor.x * orig.width;
                let h1 = trim.y - self.anchor.y * orig.height;
                (w1 + trim.width, w1, h1 + trim.height, h1)
            }
            None => {
                let w1 = -self.anchor.x * orig.width;
                let h1 = -self.anchor.y * orig.height;
                (w1 + orig.width, w1, h1 + orig.height, h1)
            }
        };

        let m = &self.world_transform;
        self.vertex_data = [
            m.a * w1 + m.c * h1 + m.tx,
            m.d * h1 + m.b * w1 + m.ty,
            m.a * w0 + m.c * h1 + m.tx,
            m.d * h1 + m.b * w0 + m.ty,
            m.a * w0 + m.c * h0 + m.tx,
            m.d * h0 + m.b * w0 + m.ty,
            m.a * w1 + m.c * h0 + m.tx,
            m.d * h0 + m.b * w1 + m.ty,
        ];
    }

    /// Bounds of the untrimmed frame in local space
    pub fn local_bounds(&self) -> Rectangle {
        let orig = self.texture.orig();
        Rectangle::new(
            -self.anchor.x * orig.width,
            -self.anchor.y * orig.height,
            orig.width,
            orig.height,
        )
    }
}

impl Batchable for Sprite {
    fn vertex_data(&self) -> &[f32] {
        &self.vertex_data
    }

    fn uvs(&self) -> &[f32] {
        &self.uvs
    }

    fn indices(&self) -> &[u16] {
        &QUAD_INDICES
    }

    fn tint(&self) -> Color {
        self.tint.with_alpha(self.tint.a * self.alpha)
    }

    fn blend_mode(&self) -> BlendMode {
        self.blend_mode
    }

    fn texture(&self) -> &Texture {
        &self.texture
    }

    fn depth(&self) -> f32 {
        self.depth
    }
}

impl MaskObject for Sprite {
    fn world_transform(&self) -> Matrix {
        self.world_transform
    }

    fn bounds(&self) -> Rectangle {
        vertex_bounds(&self.vertex_data)
    }

    fn as_sprite(&self) -> Option<&Sprite> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base_texture::BaseTexture;
    use crate::texture::TextureOptions;

    fn texture(w: u32, h: u32) -> Texture {
        let base =
            BaseTexture::from_buffer(vec![255; (w * h * 4) as usize], w, h, Default::default())
                .unwrap();
        Texture::from_base(base)
    }

    #[test]
    fn sprite_vertices_follow_anchor_and_transform() {
        let mut sprite = Sprite::new(texture(10, 20));
        assert_eq!(
            sprite.vertex_data(),
            &[0.0, 0.0, 10.0, 0.0, 10.0, 20.0, 0.0, 20.0]
        );

        sprite.set_anchor(Point::new(0.5, 0.5));
        sprite.set_world_transform(Matrix::translation(100.0, 50.0));
        assert_eq!(
            sprite.vertex_data(),
            &[95.0, 40.0, 105.0, 40.0, 105.0, 60.0, 95.0, 60.0]
        );
        assert_eq!(sprite.bounds(), Rectangle::new(95.0, 40.0, 10.0, 20.0));
        assert_eq!(sprite.indices(), &QUAD_INDICES);
    }

    #[test]
    fn trimmed_sprite_places_packed_pixels() {
        let base = BaseTexture::from_buffer(vec![0; 16 * 16 * 4], 16, 16, Default::default())
            .unwrap();
        let tex = Texture::new(
            base,
            TextureOptions {
                frame: Some(Rectangle::new(0.0, 0.0, 8.0, 8.0)),
                orig: Some(Rectangle::new(0.0, 0.0, 12.0, 12.0)),
                trim: Some(Rectangle::new(2.0, 2.0, 8.0, 8.0)),
                ..Default::default()
            },
        )
        .unwrap();

        let sprite = Sprite::new(tex);
        assert_eq!(sprite.size(), (12.0, 12.0));
        assert_eq!(
            sprite.vertex_data(),
            &[2.0, 2.0, 10.0, 2.0, 10.0, 10.0, 2.0, 10.0]
        );
        assert_eq!(sprite.local_bounds(), Rectangle::new(0.0, 0.0, 12.0, 12.0));
    }

    #[test]
    fn calculate_vertices_tracks_texture_changes() {
        let tex = texture(32, 32);
        let mut sprite = Sprite::new(tex.clone());
        tex.set_frame(Rectangle::new(0.0, 0.0, 16.0, 8.0)).unwrap();
        assert_eq!(sprite.vertex_data()[2], 32.0);

        sprite.calculate_vertices();
        assert_eq!(sprite.vertex_data()[2], 16.0);
        assert_eq!(sprite.uvs()[2], 0.5);
    }

    #[test]
    fn tint_folds_alpha() {
        let mut sprite = Sprite::new(texture(1, 1));
        sprite.tint = Color::new(1.0, 0.0, 0.0, 0.5);
        sprite.alpha = 0.5;
        assert_eq!(sprite.tint().a, 0.25);
    }

    #[test]
    fn rectangle_elements_are_fast_rects() {
        let element = BatchElement::rectangle(
            texture(1, 1),
            Rectangle::new(0.0, 0.0, 4.0, 2.0),
            Matrix::translation(1.0, 1.0),
        );
        assert!(element.is_fast_rect());
        assert!(element.as_sprite().is_none());
        assert_eq!(element.bounds(), Rectangle::new(1.0, 1.0, 4.0, 2.0));
        assert_eq!(element.vertex_count(), 4);
    }
}
