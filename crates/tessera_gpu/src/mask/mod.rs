//! Mask stack
//!
//! Each render target owns its own stack, so binding another target swaps the
//! active stencil and scissor state. Masks come in three kinds:
//!
//! - **Scissor**: an axis-aligned rectangle, tested by the backend scissor
//! - **Stencil**: any shape, drawn into the stencil buffer; nested masks
//!   increment the stored value and test for equality with the depth
//! - **Sprite**: the masked content is rendered into a texture and multiplied
//!   by the sprite's red channel through a one-filter chain

mod scissor;
mod stencil;

use std::fmt;
use std::rc::Rc;

use rustc_hash::FxHashMap;
use tessera_core::{MaskObject, MaskType, Rectangle};

use crate::backend::{Backend, ViewRect};
use crate::error::Result;
use crate::filter::{Filter, SpriteMaskFilter};
use crate::renderer::Systems;

/// One entry of a mask stack
#[derive(Clone)]
pub struct MaskData {
    object: Rc<dyn MaskObject>,
    pub mask_type: MaskType,
    /// Pick the cheapest kind that can express the mask on push
    pub auto_detect: bool,
    /// Disabled masks keep their place on the stack but do nothing
    pub enabled: bool,
    target: u64,
    stencil_counter: u32,
    scissor_counter: u32,
    /// Scissor in effect for this entry, in target pixels
    scissor_rect: Option<Rectangle>,
    /// This mask's own rectangle in target pixels
    scissor_rect_local: Option<Rectangle>,
    color_mask: bool,
    filter: Option<Rc<SpriteMaskFilter>>,
}

impl fmt::Debug for MaskData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MaskData")
            .field("mask_type", &self.mask_type)
            .field("target", &self.target)
            .field("stencil_counter", &self.stencil_counter)
            .field("scissor_counter", &self.scissor_counter)
            .field("enabled", &self.enabled)
            .finish()
    }
}

impl MaskData {
    pub fn new(object: Rc<dyn MaskObject>) -> Self {
        Self {
            object,
            mask_type: MaskType::None,
            auto_detect: true,
            enabled: true,
            target: 0,
            stencil_counter: 0,
            scissor_counter: 0,
            scissor_rect: None,
            scissor_rect_local: None,
            color_mask: true,
            filter: None,
        }
    }

    /// Force a kind instead of detecting one
    pub fn with_type(mut self, mask_type: MaskType) -> Self {
        self.mask_type = mask_type;
        self.auto_detect = false;
        self
    }

    pub fn object(&self) -> &Rc<dyn MaskObject> {
        &self.object
    }

    /// Id of the masked object this entry was pushed for
    pub fn target(&self) -> u64 {
        self.target
    }

    /// Stencil depth once this mask is applied
    pub fn stencil_counter(&self) -> u32 {
        self.stencil_counter
    }

    /// Scissor depth once this mask is applied
    pub fn scissor_counter(&self) -> u32 {
        self.scissor_counter
    }

    pub fn scissor_rect(&self) -> Option<Rectangle> {
        self.scissor_rect
    }

    fn copy_counters_or_reset(&mut self, below: Option<&MaskData>) {
        match below {
            Some(below) => {
                self.stencil_counter = below.stencil_counter;
                self.scissor_counter = below.scissor_counter;
                self.scissor_rect = below.scissor_rect;
            }
            None => {
                self.stencil_counter = 0;
                self.scissor_counter = 0;
                self.scissor_rect = None;
            }
        }
    }
}

/// Per-target mask stacks and the state last applied to the backend
#[derive(Default)]
pub struct MaskSystem {
    stacks: FxHashMap<Option<u64>, Vec<MaskData>>,
    /// Allow rectangle masks to become scissor masks
    pub enable_scissor: bool,
    sprite_filters: Vec<Rc<SpriteMaskFilter>>,
    sprite_index: usize,
    applied_stencil: u32,
    applied_scissor: Option<ViewRect>,
}

impl fmt::Debug for MaskSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MaskSystem")
            .field("stacks", &self.stacks)
            .field("enable_scissor", &self.enable_scissor)
            .field("sprite_filters", &self.sprite_filters.len())
            .finish()
    }
}

impl MaskSystem {
    pub fn new(enable_scissor: bool) -> Self {
        Self {
            enable_scissor,
            ..Self::default()
        }
    }

    /// Stack of the target keyed by `key` (`None` is the screen)
    pub fn stack(&self, key: Option<u64>) -> &[MaskData] {
        self.stacks.get(&key).map_or(&[], Vec::as_slice)
    }

    fn top(&self, key: Option<u64>) -> Option<&MaskData> {
        self.stacks.get(&key).and_then(|s| s.last())
    }

    fn top_mut(&mut self, key: Option<u64>) -> Option<&mut MaskData> {
        self.stacks.get_mut(&key).and_then(|s| s.last_mut())
    }

    /// No target has a mask pushed
    pub fn is_empty(&self) -> bool {
        self.stacks.is_empty()
    }

    /// Drop every stack, releasing the sprites held by sprite masks
    ///
    /// Backend state is left alone; the next target bind syncs it.
    pub fn reset(&mut self) {
        for data in self.stacks.drain().flat_map(|(_, stack)| stack) {
            if let Some(filter) = &data.filter {
                filter.release();
            }
        }
        self.sprite_index = 0;
    }

    /// Forget what the backend holds; stacks are logical and survive
    pub fn context_change(&mut self) {
        self.applied_stencil = 0;
        self.applied_scissor = None;
    }
}

impl Systems {
    /// Masks on the bound target's stack
    pub fn mask_depth(&self) -> usize {
        self.mask.stack(self.render_target.target_key()).len()
    }

    /// Owner of the top mask on the bound target's stack
    pub fn current_mask_target(&self) -> Option<u64> {
        self.current_mask().map(|m| m.target)
    }

    fn current_mask(&self) -> Option<&MaskData> {
        self.mask.top(self.render_target.target_key())
    }

    fn current_mask_mut(&mut self) -> Option<&mut MaskData> {
        let key = self.render_target.target_key();
        self.mask.top_mut(key)
    }

    fn detect_mask(&self, data: &mut MaskData) {
        data.mask_type = if data.object.as_sprite().is_some() {
            MaskType::Sprite
        } else if self.mask.enable_scissor && self.test_scissor(data) {
            MaskType::Scissor
        } else {
            MaskType::Stencil
        };
    }

    /// Apply `data` for the object identified by `target`
    pub fn push_mask(
        &mut self,
        backend: &mut dyn Backend,
        target: u64,
        mut data: MaskData,
    ) -> Result<()> {
        self.flush(backend)?;

        if data.auto_detect {
            self.detect_mask(&mut data);
        }
        let key = self.render_target.target_key();
        let below = self.mask.top(key);
        data.color_mask = below.map_or(true, |m| m.color_mask);
        data.copy_counters_or_reset(below);
        data.target = target;

        let is_sprite = data.mask_type == MaskType::Sprite;
        let enabled = data.enabled;
        tracing::trace!(owner = target, mask_type = ?data.mask_type, "push mask");

        if !is_sprite {
            self.mask.stacks.entry(key).or_default().push(data);
            if enabled {
                match self.current_mask().map(|m| m.mask_type) {
                    Some(MaskType::Scissor) => self.push_scissor(backend),
                    Some(MaskType::Stencil) => self.push_stencil(backend)?,
                    _ => {}
                }
            }
            return Ok(());
        }

        if enabled {
            data.copy_counters_or_reset(None);
            self.push_sprite_mask(backend, &mut data)?;
        }
        // the filter bound a new target; the entry belongs to its stack
        let key = self.render_target.target_key();
        self.mask.stacks.entry(key).or_default().push(data);
        Ok(())
    }

    /// Undo the mask pushed for `target`
    ///
    /// A pop that does not match the top of the stack is ignored.
    pub fn pop_mask(&mut self, backend: &mut dyn Backend, target: u64) -> Result<()> {
        self.flush(backend)?;

        let key = self.render_target.target_key();
        let Some(stack) = self.mask.stacks.get_mut(&key) else {
            tracing::warn!(owner = target, "mask pop with an empty mask stack");
            return Ok(());
        };
        match stack.last() {
            Some(top) if top.target == target => {}
            Some(top) => {
                tracing::warn!(
                    owner = target,
                    expected = top.target,
                    "mask pop does not match the pushed target, ignoring"
                );
                return Ok(());
            }
            None => return Ok(()),
        }
        let Some(data) = stack.pop() else {
            return Ok(());
        };
        if stack.is_empty() {
            self.mask.stacks.remove(&key);
        }

        if data.enabled {
            match data.mask_type {
                MaskType::Scissor => self.pop_scissor(backend),
                MaskType::Stencil => self.pop_stencil(backend, &data)?,
                MaskType::Sprite => self.pop_sprite_mask(backend, &data)?,
                MaskType::None => {}
            }
        }
        Ok(())
    }

    fn push_sprite_mask(&mut self, backend: &mut dyn Backend, data: &mut MaskData) -> Result<()> {
        let Some(sprite) = data.object.as_sprite().cloned() else {
            return Ok(());
        };

        let filter = match self.mask.sprite_filters.get(self.mask.sprite_index) {
            Some(filter) => filter.clone(),
            None => {
                let filter = Rc::new(SpriteMaskFilter::new(self));
                self.mask.sprite_filters.push(filter.clone());
                filter
            }
        };
        filter.set_sprite(sprite);
        data.filter = Some(filter.clone());

        let filters: [Rc<dyn Filter>; 1] = [filter];
        self.push_filters(backend, data.target, data.object.bounds(), &filters)?;
        self.mask.sprite_index += 1;
        Ok(())
    }

    fn pop_sprite_mask(&mut self, backend: &mut dyn Backend, data: &MaskData) -> Result<()> {
        let result = self.pop_filters(backend);
        self.mask.sprite_index = self.mask.sprite_index.saturating_sub(1);
        if let Some(filter) = &data.filter {
            filter.release();
        }
        result
    }

    /// Bring backend stencil and scissor state in line with the bound target
    pub(crate) fn apply_mask_stack(&mut self, backend: &mut dyn Backend) {
        self.sync_stencil(backend);
        self.sync_scissor(backend);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Capabilities, Command, RecordingBackend, StencilOp, StencilState};
    use crate::config::RendererConfig;
    use tessera_core::{BaseTexture, BatchElement, Matrix, Sprite, Texture};

    fn setup() -> (RecordingBackend, Systems) {
        let caps = Capabilities::default();
        let mut backend = RecordingBackend::new(caps);
        let mut systems = Systems::new(RendererConfig::default().with_size(100.0, 50.0), caps);
        systems.bind_render_target(&mut backend, None, None, None).unwrap();
        backend.clear_commands();
        (backend, systems)
    }

    fn texture() -> Texture {
        let base = BaseTexture::from_buffer(vec![255; 16], 2, 2, Default::default()).unwrap();
        Texture::from_base(base)
    }

    fn rect_mask(rect: Rectangle, transform: Matrix) -> MaskData {
        MaskData::new(Rc::new(BatchElement::rectangle(texture(), rect, transform)))
    }

    fn shape_mask() -> MaskData {
        let element = BatchElement::new(
            texture(),
            vec![0.0, 0.0, 10.0, 0.0, 5.0, 10.0],
            vec![0.0, 0.0, 1.0, 0.0, 0.5, 1.0],
            vec![0, 1, 2],
        );
        MaskData::new(Rc::new(element))
    }

    fn stencil_states(backend: &RecordingBackend) -> Vec<Option<StencilState>> {
        backend
            .commands()
            .iter()
            .filter_map(|c| match c {
                Command::Stencil(s) => Some(*s),
                _ => None,
            })
            .collect()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Detection
    // ─────────────────────────────────────────────────────────────────────────

    #[test]
    fn axis_aligned_rectangles_use_scissor() {
        let (mut backend, mut systems) = setup();
        let mut transform = Matrix::rotation(std::f32::consts::FRAC_PI_2);
        transform.translate(40.0, 0.0);

        systems
            .push_mask(&mut backend, 1, rect_mask(Rectangle::new(0.0, 0.0, 10.0, 10.0), transform))
            .unwrap();

        assert_eq!(systems.mask.stack(None)[0].mask_type, MaskType::Scissor);
    }

    #[test]
    fn rotated_rectangles_fall_back_to_stencil() {
        let (mut backend, mut systems) = setup();
        let transform = Matrix::rotation(0.3);

        systems
            .push_mask(&mut backend, 1, rect_mask(Rectangle::new(0.0, 0.0, 10.0, 10.0), transform))
            .unwrap();

        assert_eq!(systems.mask.stack(None)[0].mask_type, MaskType::Stencil);
    }

    #[test]
    fn scissor_can_be_disabled() {
        let (mut backend, mut systems) = setup();
        systems.mask.enable_scissor = false;

        systems
            .push_mask(
                &mut backend,
                1,
                rect_mask(Rectangle::new(0.0, 0.0, 10.0, 10.0), Matrix::IDENTITY),
            )
            .unwrap();

        assert_eq!(systems.mask.stack(None)[0].mask_type, MaskType::Stencil);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Stack protocol
    // ─────────────────────────────────────────────────────────────────────────

    #[test]
    fn mismatched_pop_is_ignored() {
        let (mut backend, mut systems) = setup();
        systems.push_mask(&mut backend, 1, shape_mask()).unwrap();
        backend.clear_commands();

        systems.pop_mask(&mut backend, 2).unwrap();

        assert_eq!(systems.mask_depth(), 1);
        assert!(backend.commands().is_empty());

        systems.pop_mask(&mut backend, 1).unwrap();
        assert_eq!(systems.mask_depth(), 0);
    }

    #[test]
    fn counters_are_copied_from_the_mask_below() {
        let (mut backend, mut systems) = setup();
        systems.push_mask(&mut backend, 1, shape_mask()).unwrap();
        systems
            .push_mask(
                &mut backend,
                2,
                rect_mask(Rectangle::new(0.0, 0.0, 10.0, 10.0), Matrix::IDENTITY),
            )
            .unwrap();

        let stack = systems.mask.stack(None);
        assert_eq!(stack[1].stencil_counter(), 1);
        assert_eq!(stack[1].scissor_counter(), 1);
    }

    #[test]
    fn disabled_masks_hold_their_place() {
        let (mut backend, mut systems) = setup();
        let mut data = shape_mask();
        data.enabled = false;

        systems.push_mask(&mut backend, 1, data).unwrap();

        assert_eq!(systems.mask_depth(), 1);
        assert!(stencil_states(&backend).is_empty());
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Stencil
    // ─────────────────────────────────────────────────────────────────────────

    #[test]
    fn stencil_push_clears_draws_and_tests() {
        let (mut backend, mut systems) = setup();

        systems.push_mask(&mut backend, 1, shape_mask()).unwrap();

        let commands = backend.commands();
        assert!(commands.contains(&Command::Clear {
            color: None,
            depth: None,
            stencil: Some(0)
        }));
        assert_eq!(
            stencil_states(&backend),
            vec![
                Some(StencilState {
                    reference: 0,
                    pass_op: StencilOp::Increment
                }),
                Some(StencilState::test(1)),
            ]
        );
        assert_eq!(backend.count(|c| *c == Command::ColorMask(false)), 1);
        assert_eq!(backend.count(|c| *c == Command::ColorMask(true)), 1);
        assert_eq!(backend.draws().len(), 1);
    }

    #[test]
    fn nested_stencils_count_up_and_down() {
        let (mut backend, mut systems) = setup();
        systems.push_mask(&mut backend, 1, shape_mask()).unwrap();
        systems.push_mask(&mut backend, 2, shape_mask()).unwrap();
        backend.clear_commands();

        systems.pop_mask(&mut backend, 2).unwrap();
        assert_eq!(
            stencil_states(&backend),
            vec![
                Some(StencilState {
                    reference: 2,
                    pass_op: StencilOp::Decrement
                }),
                Some(StencilState::test(1)),
            ]
        );
        assert_eq!(backend.draws().len(), 1);
        backend.clear_commands();

        systems.pop_mask(&mut backend, 1).unwrap();
        assert_eq!(stencil_states(&backend), vec![None]);
        assert!(backend.draws().is_empty());
    }

    #[test]
    fn only_the_first_stencil_clears() {
        let (mut backend, mut systems) = setup();
        systems.push_mask(&mut backend, 1, shape_mask()).unwrap();
        backend.clear_commands();

        systems.push_mask(&mut backend, 2, shape_mask()).unwrap();

        assert_eq!(backend.count(|c| matches!(c, Command::Clear { .. })), 0);
        assert_eq!(stencil_states(&backend).last(), Some(&Some(StencilState::test(2))));
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Scissor
    // ─────────────────────────────────────────────────────────────────────────

    #[test]
    fn screen_scissor_is_flipped() {
        let (mut backend, mut systems) = setup();

        systems
            .push_mask(
                &mut backend,
                1,
                rect_mask(Rectangle::new(10.0, 10.0, 20.0, 20.0), Matrix::IDENTITY),
            )
            .unwrap();

        assert_eq!(
            backend.commands().last(),
            Some(&Command::Scissor(Some(ViewRect::new(10, 20, 20, 20))))
        );
    }

    #[test]
    fn nested_scissors_intersect() {
        let (mut backend, mut systems) = setup();
        systems
            .push_mask(
                &mut backend,
                1,
                rect_mask(Rectangle::new(0.0, 0.0, 30.0, 30.0), Matrix::IDENTITY),
            )
            .unwrap();
        systems
            .push_mask(
                &mut backend,
                2,
                rect_mask(Rectangle::new(20.0, 20.0, 30.0, 30.0), Matrix::IDENTITY),
            )
            .unwrap();

        assert_eq!(
            systems.mask.stack(None)[1].scissor_rect(),
            Some(Rectangle::new(20.0, 20.0, 10.0, 10.0))
        );
        backend.clear_commands();

        systems.pop_mask(&mut backend, 2).unwrap();
        assert_eq!(
            backend.commands(),
            &[Command::Scissor(Some(ViewRect::new(0, 20, 30, 30)))]
        );
        backend.clear_commands();

        systems.pop_mask(&mut backend, 1).unwrap();
        assert_eq!(backend.commands(), &[Command::Scissor(None)]);
    }

    #[test]
    fn binding_another_target_swaps_mask_state() {
        let (mut backend, mut systems) = setup();
        systems.push_mask(&mut backend, 1, shape_mask()).unwrap();
        systems
            .push_mask(
                &mut backend,
                2,
                rect_mask(Rectangle::new(0.0, 0.0, 10.0, 10.0), Matrix::IDENTITY),
            )
            .unwrap();
        let target = crate::render_texture::RenderTexture::create(8.0, 8.0, 1.0);
        backend.clear_commands();

        systems
            .bind_render_target(&mut backend, Some(&target), None, None)
            .unwrap();
        assert_eq!(stencil_states(&backend), vec![None]);
        assert!(backend.commands().contains(&Command::Scissor(None)));
        backend.clear_commands();

        systems.bind_render_target(&mut backend, None, None, None).unwrap();
        assert_eq!(stencil_states(&backend), vec![Some(StencilState::test(1))]);
        assert!(backend
            .commands()
            .contains(&Command::Scissor(Some(ViewRect::new(0, 40, 10, 10)))));
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Sprite
    // ─────────────────────────────────────────────────────────────────────────

    #[test]
    fn sprite_masks_render_through_a_filter() {
        let (mut backend, mut systems) = setup();
        let mut sprite = Sprite::new(texture());
        sprite.set_world_transform(Matrix::translation(4.0, 4.0));
        let data = MaskData::new(Rc::new(sprite));

        systems.push_mask(&mut backend, 1, data).unwrap();

        let filter_target = systems.render_target.current().cloned();
        assert!(filter_target.is_some());
        assert_eq!(systems.filter.depth(), 1);
        assert_eq!(systems.mask_depth(), 1);
        assert_eq!(systems.mask.stack(None).len(), 0);
        backend.clear_commands();

        systems.pop_mask(&mut backend, 1).unwrap();

        assert!(systems.render_target.current().is_none());
        assert_eq!(systems.filter.depth(), 0);
        assert_eq!(backend.draws().len(), 1);
        assert!(systems.mask.sprite_filters[0].sprite().is_none());
    }
}
