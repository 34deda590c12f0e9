//! Binding the screen or a render texture as the draw destination

use tessera_core::Rectangle;

use crate::backend::{Backend, ViewRect};
use crate::error::Result;
use crate::render_texture::RenderTexture;
use crate::renderer::Systems;

/// Attachments a clear touches
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClearBits {
    pub color: bool,
    pub depth: bool,
    pub stencil: bool,
}

impl ClearBits {
    pub const COLOR: ClearBits = ClearBits {
        color: true,
        depth: false,
        stencil: false,
    };
    pub const COLOR_DEPTH: ClearBits = ClearBits {
        color: true,
        depth: true,
        stencil: false,
    };
    pub const ALL: ClearBits = ClearBits {
        color: true,
        depth: true,
        stencil: true,
    };
}

/// Current destination and the frames it was bound with
#[derive(Debug, Clone)]
pub struct RenderTargetSystem {
    current: Option<RenderTexture>,
    source_frame: Rectangle,
    destination_frame: Rectangle,
    /// Destination in target pixels, after the root flip
    viewport_frame: Rectangle,
    /// Used when clearing the screen without an explicit color
    pub clear_color: [f32; 4],
}

impl Default for RenderTargetSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderTargetSystem {
    pub fn new() -> Self {
        Self {
            current: None,
            source_frame: Rectangle::EMPTY,
            destination_frame: Rectangle::EMPTY,
            viewport_frame: Rectangle::EMPTY,
            clear_color: [0.0, 0.0, 0.0, 1.0],
        }
    }

    /// `None` while the screen is bound
    pub fn current(&self) -> Option<&RenderTexture> {
        self.current.as_ref()
    }

    pub fn source_frame(&self) -> Rectangle {
        self.source_frame
    }

    pub fn destination_frame(&self) -> Rectangle {
        self.destination_frame
    }

    pub fn viewport_frame(&self) -> Rectangle {
        self.viewport_frame
    }

    /// Key of the bound target's mask stack
    pub(crate) fn target_key(&self) -> Option<u64> {
        self.current.as_ref().map(|t| t.base_texture().uid())
    }
}

impl Systems {
    /// Height of the screen in device pixels
    pub fn view_height(&self) -> f32 {
        (self.screen.height * self.resolution).round()
    }

    /// Make `target` (or the screen) the destination of subsequent draws
    ///
    /// `source` is the world rectangle to show, `destination` where it lands
    /// inside the target, both in logical units.
    pub fn bind_render_target(
        &mut self,
        backend: &mut dyn Backend,
        target: Option<&RenderTexture>,
        source: Option<Rectangle>,
        destination: Option<Rectangle>,
    ) -> Result<()> {
        self.flush(backend)?;

        let (resolution, flip_y) = match target {
            Some(t) => (t.resolution(), self.capabilities.offscreen_y_down),
            None => (self.resolution, true),
        };

        let source = source.unwrap_or_else(|| match target {
            Some(t) => {
                let frame = t.texture().frame();
                Rectangle::new(0.0, 0.0, frame.width, frame.height)
            }
            None => Rectangle::new(0.0, 0.0, self.screen.width, self.screen.height),
        });
        let destination = destination.unwrap_or_else(|| match target {
            Some(t) => {
                let frame = t.texture().frame();
                Rectangle::new(frame.x, frame.y, source.width, source.height)
            }
            None => Rectangle::new(0.0, 0.0, source.width, source.height),
        });

        let mut viewport = Rectangle::new(
            destination.x * resolution,
            destination.y * resolution,
            destination.width * resolution,
            destination.height * resolution,
        );
        if target.is_none() {
            viewport.y = self.view_height() - (viewport.y + viewport.height);
        }
        viewport.ceil(1.0, 1e-3);

        self.framebuffers.bind(
            backend,
            &mut self.textures,
            target.map(RenderTexture::framebuffer),
            Some(ViewRect::from_rect(&viewport)),
        );
        self.projection
            .update(self.shaders.globals(), Some(destination), Some(source), flip_y);
        self.shaders.sync_globals(backend, &mut self.textures);

        let rt = &mut self.render_target;
        rt.current = target.cloned();
        rt.source_frame = source;
        rt.destination_frame = destination;
        rt.viewport_frame = viewport;

        self.apply_mask_stack(backend);
        Ok(())
    }

    /// Clear the bound target, limited to the bound destination frame
    pub fn clear_render_target(
        &mut self,
        backend: &mut dyn Backend,
        color: Option<[f32; 4]>,
        bits: ClearBits,
    ) {
        let (clear_color, base_width, base_height) = match &self.render_target.current {
            Some(t) => (t.base_render().clear_color(), t.width(), t.height()),
            None => (
                self.render_target.clear_color,
                self.screen.width,
                self.screen.height,
            ),
        };
        let color = color.unwrap_or(clear_color);

        let destination = self.render_target.destination_frame;
        let partial = destination.width != base_width || destination.height != base_height;
        if partial {
            backend.set_scissor(Some(ViewRect::from_rect(&self.render_target.viewport_frame)));
        }
        self.framebuffers
            .clear(backend, bits.color.then_some(color), bits.depth, bits.stencil);
        if partial {
            self.restore_scissor(backend);
        }
    }

    /// Rebind the current target with its current frames
    pub fn reset_render_target(&mut self, backend: &mut dyn Backend) -> Result<()> {
        let current = self.render_target.current.clone();
        let source = self.render_target.source_frame;
        let destination = self.render_target.destination_frame;
        self.bind_render_target(backend, current.as_ref(), Some(source), Some(destination))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Capabilities, Command, RecordingBackend};
    use crate::config::RendererConfig;

    fn systems(caps: Capabilities) -> Systems {
        Systems::new(RendererConfig::default().with_size(100.0, 50.0), caps)
    }

    fn last_viewport(backend: &RecordingBackend) -> Option<ViewRect> {
        backend.commands().iter().rev().find_map(|c| match c {
            Command::Viewport(v) => Some(*v),
            _ => None,
        })
    }

    #[test]
    fn screen_viewport_is_flipped() {
        let mut backend = RecordingBackend::default();
        let mut systems = systems(Capabilities::default());

        systems
            .bind_render_target(
                &mut backend,
                None,
                Some(Rectangle::new(0.0, 0.0, 100.0, 50.0)),
                Some(Rectangle::new(10.0, 5.0, 20.0, 10.0)),
            )
            .unwrap();

        assert_eq!(last_viewport(&backend), Some(ViewRect::new(10, 35, 20, 10)));
        assert!(systems.projection.projection_matrix().d < 0.0);
    }

    #[test]
    fn render_texture_viewport_uses_resolution() {
        let mut backend = RecordingBackend::default();
        let mut systems = systems(Capabilities::default());
        let target = RenderTexture::create(16.0, 8.0, 2.0);

        systems
            .bind_render_target(&mut backend, Some(&target), None, None)
            .unwrap();

        assert_eq!(last_viewport(&backend), Some(ViewRect::new(0, 0, 32, 16)));
        assert_eq!(systems.render_target.current(), Some(&target));
        assert!(systems.projection.projection_matrix().d > 0.0);
    }

    #[test]
    fn offscreen_flip_follows_capabilities() {
        let mut backend = RecordingBackend::default();
        let mut systems = systems(Capabilities {
            offscreen_y_down: true,
            ..Capabilities::default()
        });
        let target = RenderTexture::create(16.0, 16.0, 1.0);

        systems
            .bind_render_target(&mut backend, Some(&target), None, None)
            .unwrap();

        assert!(systems.projection.projection_matrix().d < 0.0);
    }

    #[test]
    fn partial_clear_is_scissored() {
        let mut backend = RecordingBackend::default();
        let mut systems = systems(Capabilities::default());
        let target = RenderTexture::create(32.0, 32.0, 1.0);
        systems
            .bind_render_target(
                &mut backend,
                Some(&target),
                Some(Rectangle::new(0.0, 0.0, 8.0, 8.0)),
                Some(Rectangle::new(0.0, 0.0, 8.0, 8.0)),
            )
            .unwrap();
        backend.clear_commands();

        systems.clear_render_target(&mut backend, None, ClearBits::COLOR);

        let commands = backend.take_commands();
        assert_eq!(commands[0], Command::Scissor(Some(ViewRect::new(0, 0, 8, 8))));
        assert!(matches!(commands[1], Command::Clear { color: Some(_), .. }));
        assert_eq!(commands[2], Command::Scissor(None));
    }

    #[test]
    fn full_clear_uses_target_clear_color() {
        let mut backend = RecordingBackend::default();
        let mut systems = systems(Capabilities::default());
        let target = RenderTexture::create(4.0, 4.0, 1.0);
        target.base_render().set_clear_color([1.0, 0.0, 0.0, 1.0]);
        systems
            .bind_render_target(&mut backend, Some(&target), None, None)
            .unwrap();
        backend.clear_commands();

        systems.clear_render_target(&mut backend, None, ClearBits::COLOR);

        assert_eq!(
            backend.commands(),
            &[Command::Clear {
                color: Some([1.0, 0.0, 0.0, 1.0]),
                depth: None,
                stencil: None
            }]
        );
    }
}
