//! Fixed-function render state
//!
//! [`State`] packs the toggles into a bit set. [`StateSystem`] remembers what
//! the backend currently has and only forwards the bits that differ.

use tessera_core::BlendMode;

use crate::backend::Backend;

const BLEND: u8 = 0;
const OFFSET: u8 = 1;
const CULLING: u8 = 2;
const DEPTH_TEST: u8 = 3;
const WINDING: u8 = 4;
const DEPTH_MASK: u8 = 5;

const ALL_BITS: [u8; 6] = [BLEND, OFFSET, CULLING, DEPTH_TEST, WINDING, DEPTH_MASK];

/// Render state a draw needs
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct State {
    data: u8,
    blend_mode: BlendMode,
}

impl Default for State {
    fn default() -> Self {
        Self {
            data: 0,
            blend_mode: BlendMode::Normal,
        }
    }
}

impl State {
    /// Blending on, everything else off
    pub fn for_2d() -> Self {
        let mut state = Self::default();
        state.set_blend(true);
        state
    }

    fn bit(&self, bit: u8) -> bool {
        self.data & (1 << bit) != 0
    }

    fn set_bit(&mut self, bit: u8, value: bool) {
        if value {
            self.data |= 1 << bit;
        } else {
            self.data &= !(1 << bit);
        }
    }

    pub fn blend(&self) -> bool {
        self.bit(BLEND)
    }

    pub fn set_blend(&mut self, value: bool) {
        self.set_bit(BLEND, value);
    }

    pub fn offsets(&self) -> bool {
        self.bit(OFFSET)
    }

    pub fn set_offsets(&mut self, value: bool) {
        self.set_bit(OFFSET, value);
    }

    pub fn culling(&self) -> bool {
        self.bit(CULLING)
    }

    pub fn set_culling(&mut self, value: bool) {
        self.set_bit(CULLING, value);
    }

    pub fn depth_test(&self) -> bool {
        self.bit(DEPTH_TEST)
    }

    pub fn set_depth_test(&mut self, value: bool) {
        self.set_bit(DEPTH_TEST, value);
    }

    pub fn depth_mask(&self) -> bool {
        self.bit(DEPTH_MASK)
    }

    pub fn set_depth_mask(&mut self, value: bool) {
        self.set_bit(DEPTH_MASK, value);
    }

    /// Front faces wind clockwise
    pub fn clockwise_front_face(&self) -> bool {
        self.bit(WINDING)
    }

    pub fn set_clockwise_front_face(&mut self, value: bool) {
        self.set_bit(WINDING, value);
    }

    pub fn blend_mode(&self) -> BlendMode {
        self.blend_mode
    }

    /// `BlendMode::None` also turns blending off
    pub fn set_blend_mode(&mut self, mode: BlendMode) {
        self.set_blend(mode != BlendMode::None);
        self.blend_mode = mode;
    }

    pub fn with_blend_mode(mut self, mode: BlendMode) -> Self {
        self.set_blend_mode(mode);
        self
    }
}

/// Mirror of the backend's fixed-function state
#[derive(Debug, Default)]
pub struct StateSystem {
    /// `None` until the first state is applied
    current: Option<State>,
}

impl StateSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<State> {
        self.current
    }

    /// Apply `state`, forwarding only what changed
    pub fn set(&mut self, backend: &mut dyn Backend, state: State) {
        let previous = self.current;
        let diff = match previous {
            Some(prev) => prev.data ^ state.data,
            None => u8::MAX,
        };

        for bit in ALL_BITS {
            if diff & (1 << bit) == 0 || bit == BLEND {
                continue;
            }
            let on = state.bit(bit);
            match bit {
                OFFSET => backend.set_polygon_offset(on),
                CULLING => backend.set_cull_face(on),
                DEPTH_TEST => backend.set_depth_test(on),
                WINDING => backend.set_front_face(on),
                DEPTH_MASK => backend.set_depth_mask(on),
                _ => {}
            }
        }

        let blend_changed = match previous {
            Some(prev) => {
                prev.blend() != state.blend()
                    || (state.blend() && prev.blend_mode != state.blend_mode)
            }
            None => true,
        };
        if blend_changed {
            backend.set_blend(state.blend().then(|| state.blend_mode.state()));
        }

        self.current = Some(state);
    }

    /// Change only the blend mode of the current state
    pub fn set_blend_mode(&mut self, backend: &mut dyn Backend, mode: BlendMode) {
        let mut state = self.current.unwrap_or_else(State::for_2d);
        state.set_blend_mode(mode);
        self.set(backend, state);
    }

    /// Forget the mirror so the next `set` reapplies everything
    pub fn reset(&mut self) {
        self.current = None;
    }

    pub fn context_change(&mut self) {
        self.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Command, RecordingBackend};

    #[test]
    fn first_set_applies_everything() {
        let mut backend = RecordingBackend::default();
        let mut system = StateSystem::new();

        system.set(&mut backend, State::for_2d());

        assert_eq!(backend.commands().len(), 6);
        assert!(backend
            .commands()
            .contains(&Command::Blend(Some(BlendMode::Normal.state()))));
    }

    #[test]
    fn only_differences_reach_the_backend() {
        let mut backend = RecordingBackend::default();
        let mut system = StateSystem::new();
        system.set(&mut backend, State::for_2d());
        backend.clear_commands();

        system.set(&mut backend, State::for_2d());
        assert!(backend.commands().is_empty());

        system.set_blend_mode(&mut backend, BlendMode::Add);
        assert_eq!(
            backend.commands(),
            &[Command::Blend(Some(BlendMode::Add.state()))]
        );
    }

    #[test]
    fn blend_none_disables_blending() {
        let mut backend = RecordingBackend::default();
        let mut system = StateSystem::new();
        system.set(&mut backend, State::for_2d());
        backend.clear_commands();

        system.set_blend_mode(&mut backend, BlendMode::None);
        assert_eq!(backend.commands(), &[Command::Blend(None)]);
    }
}
