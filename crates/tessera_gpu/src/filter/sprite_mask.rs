use std::cell::RefCell;

use tessera_core::{Batchable, Sprite, TextureMatrix};

use super::{ClearMode, Filter, FilterSettings};
use crate::backend::Backend;
use crate::error::Result;
use crate::render_texture::RenderTexture;
use crate::renderer::Systems;
use crate::shader::{Shader, UniformGroup};
use crate::shaders;

/// Multiplies filtered content by the red channel of a sprite
///
/// The sprite is sampled through its own texture frame and clamped to it, so
/// atlas neighbours never leak into the mask.
#[derive(Debug)]
pub struct SpriteMaskFilter {
    shader: Shader,
    settings: FilterSettings,
    sprite: RefCell<Option<Sprite>>,
    texture_matrix: RefCell<Option<TextureMatrix>>,
}

impl SpriteMaskFilter {
    pub fn new(systems: &mut Systems) -> Self {
        let program = systems.shaders.program(shaders::sprite_mask_program());
        Self {
            shader: Shader::new(program, UniformGroup::new(false)),
            settings: FilterSettings::default(),
            sprite: RefCell::new(None),
            texture_matrix: RefCell::new(None),
        }
    }

    pub fn sprite(&self) -> Option<Sprite> {
        self.sprite.borrow().clone()
    }

    /// Mask with `sprite` until [`SpriteMaskFilter::release`]
    pub fn set_sprite(&self, sprite: Sprite) {
        let mut matrix = self.texture_matrix.borrow_mut();
        match matrix.as_mut() {
            Some(m) => m.set_texture(sprite.texture().clone()),
            None => *matrix = Some(TextureMatrix::with_margin(sprite.texture().clone(), 0.0)),
        }
        *self.sprite.borrow_mut() = Some(sprite);
    }

    pub fn release(&self) {
        self.sprite.borrow_mut().take();
    }

    pub fn uniforms(&self) -> &UniformGroup {
        &self.shader.uniforms
    }
}

impl Filter for SpriteMaskFilter {
    fn settings(&self) -> FilterSettings {
        self.settings
    }

    fn shader(&self) -> &Shader {
        &self.shader
    }

    fn apply(
        &self,
        systems: &mut Systems,
        backend: &mut dyn Backend,
        input: &RenderTexture,
        output: Option<&RenderTexture>,
        clear: ClearMode,
    ) -> Result<()> {
        let Some(sprite) = self.sprite() else {
            return Ok(());
        };
        let texture = sprite.texture();
        if !texture.valid() {
            return Ok(());
        }

        let (map_coord, clamp_frame) = {
            let mut matrix = self.texture_matrix.borrow_mut();
            let matrix =
                matrix.get_or_insert_with(|| TextureMatrix::with_margin(texture.clone(), 0.0));
            matrix.update(false);
            (matrix.map_coord, matrix.clamp_frame)
        };

        let premultiplied = texture.base_texture().alpha_mode().is_premultiplied();
        let mut other_matrix = systems.filter.calculate_sprite_matrix(&sprite);
        other_matrix.prepend(&map_coord);

        let uniforms = &self.shader.uniforms;
        uniforms.set("npmAlpha", if premultiplied { 0.0f32 } else { 1.0 });
        uniforms.set("uMask", texture);
        uniforms.set("otherMatrix", other_matrix);
        uniforms.set("alpha", Batchable::tint(&sprite).a);
        uniforms.set("maskClamp", clamp_frame);

        systems.apply_filter(backend, &self.shader, self.state(), input, output, clear)
    }
}
