use tessera_core::{Batchable, BlendMode, Color, MaskObject, Texture};

use super::MaskData;
use crate::backend::{Backend, StencilOp, StencilState};
use crate::error::Result;
use crate::renderer::Systems;

/// Batches a mask object's shape
struct MaskShape<'a>(&'a dyn MaskObject);

impl Batchable for MaskShape<'_> {
    fn vertex_data(&self) -> &[f32] {
        self.0.vertex_data()
    }

    fn uvs(&self) -> &[f32] {
        self.0.uvs()
    }

    fn indices(&self) -> &[u16] {
        self.0.indices()
    }

    fn tint(&self) -> Color {
        self.0.tint()
    }

    fn blend_mode(&self) -> BlendMode {
        self.0.blend_mode()
    }

    fn texture(&self) -> &Texture {
        self.0.texture()
    }

    fn depth(&self) -> f32 {
        self.0.depth()
    }
}

impl Systems {
    /// Stencil depth of the bound target
    fn stencil_depth(&self) -> u32 {
        self.current_mask().map_or(0, |m| m.stencil_counter)
    }

    /// Draw the top mask's shape with `op` applied where the stencil equals `reference`
    fn draw_stencil_shape(
        &mut self,
        backend: &mut dyn Backend,
        data: &MaskData,
        reference: u32,
        op: StencilOp,
    ) -> Result<()> {
        let color_mask = self.current_mask().map_or(true, |m| m.color_mask);
        if color_mask {
            if let Some(top) = self.current_mask_mut() {
                top.color_mask = false;
            }
            backend.set_color_mask(false);
        }

        backend.set_stencil(Some(StencilState {
            reference,
            pass_op: op,
        }));
        let object = data.object.clone();
        let drawn = self
            .batch_render(backend, &MaskShape(&*object))
            .and_then(|()| self.flush(backend));

        if color_mask {
            if let Some(top) = self.current_mask_mut() {
                top.color_mask = true;
            }
            backend.set_color_mask(true);
        }
        drawn
    }

    pub(super) fn push_stencil(&mut self, backend: &mut dyn Backend) -> Result<()> {
        let Some(top) = self.current_mask_mut() else {
            return Ok(());
        };
        let previous = top.stencil_counter;
        top.stencil_counter += 1;
        let data = top.clone();

        if previous == 0 {
            self.framebuffers.force_stencil(backend, &mut self.textures);
            self.framebuffers.clear(backend, None, false, true);
        }

        self.draw_stencil_shape(backend, &data, previous, StencilOp::Increment)?;
        self.use_current_stencil(backend);
        Ok(())
    }

    /// Erase `data`'s shape; it is already off the stack
    pub(super) fn pop_stencil(&mut self, backend: &mut dyn Backend, data: &MaskData) -> Result<()> {
        if self.stencil_depth() == 0 {
            backend.set_stencil(None);
            self.mask.applied_stencil = 0;
            return Ok(());
        }

        self.draw_stencil_shape(backend, data, data.stencil_counter, StencilOp::Decrement)?;
        self.use_current_stencil(backend);
        Ok(())
    }

    fn use_current_stencil(&mut self, backend: &mut dyn Backend) {
        let depth = self.stencil_depth();
        backend.set_stencil(Some(StencilState::test(depth)));
        self.mask.applied_stencil = depth;
    }

    /// Enable or disable the stencil test when the bound target's depth differs
    pub(super) fn sync_stencil(&mut self, backend: &mut dyn Backend) {
        let depth = self.stencil_depth();
        if depth == self.mask.applied_stencil {
            return;
        }
        if depth == 0 {
            backend.set_stencil(None);
            self.mask.applied_stencil = 0;
        } else {
            self.use_current_stencil(backend);
        }
    }
}
