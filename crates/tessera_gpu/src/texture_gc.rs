//! Releases GPU storage of textures that stopped being drawn

use crate::backend::Backend;
use crate::texture_system::TextureSystem;

/// When idle textures are collected
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum GcMode {
    /// Every `check_interval` frames rendered to the screen
    #[default]
    Auto,
    /// Only when [`TextureGc::run`] is called
    Manual,
}

/// Frame-counting texture garbage collector
#[derive(Debug)]
pub struct TextureGc {
    pub mode: GcMode,
    /// Frames a texture may stay unbound before it is unloaded
    pub max_idle: u64,
    pub check_interval: u64,
    count: u64,
    check_count: u64,
}

impl TextureGc {
    pub fn new(mode: GcMode, max_idle: u64, check_interval: u64) -> Self {
        Self {
            mode,
            max_idle,
            check_interval,
            count: 0,
            check_count: 0,
        }
    }

    /// Frames counted so far
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Advance the clock after a frame; only screen frames count
    pub fn postrender(
        &mut self,
        textures: &mut TextureSystem,
        backend: &mut dyn Backend,
        rendering_to_screen: bool,
    ) {
        if !rendering_to_screen {
            return;
        }
        self.count += 1;
        textures.set_clock(self.count);

        if self.mode == GcMode::Manual {
            return;
        }
        self.check_count += 1;
        if self.check_count > self.check_interval {
            self.check_count = 0;
            self.run(textures, backend);
        }
    }

    /// Unload every texture idle for longer than `max_idle` frames
    pub fn run(&mut self, textures: &mut TextureSystem, backend: &mut dyn Backend) -> usize {
        let released = textures.unload_idle(backend, self.max_idle);
        if released > 0 {
            tracing::debug!("texture gc released {} textures", released);
        }
        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RecordingBackend;
    use tessera_core::BaseTexture;

    #[test]
    fn auto_mode_collects_after_interval() {
        let mut backend = RecordingBackend::default();
        let mut textures = TextureSystem::new(4, 16);
        let mut gc = TextureGc::new(GcMode::Auto, 2, 3);
        let base = BaseTexture::from_buffer(vec![0; 16], 2, 2, Default::default()).unwrap();
        textures.bind(&mut backend, Some(&base), 0);

        for _ in 0..3 {
            gc.postrender(&mut textures, &mut backend, true);
        }
        assert_eq!(textures.managed_count(), 1);

        gc.postrender(&mut textures, &mut backend, true);
        assert_eq!(textures.managed_count(), 0);
    }

    #[test]
    fn offscreen_frames_do_not_count() {
        let mut backend = RecordingBackend::default();
        let mut textures = TextureSystem::new(4, 16);
        let mut gc = TextureGc::new(GcMode::Auto, 0, 0);

        gc.postrender(&mut textures, &mut backend, false);
        assert_eq!(gc.count(), 0);
    }

    #[test]
    fn manual_mode_waits_for_run() {
        let mut backend = RecordingBackend::default();
        let mut textures = TextureSystem::new(4, 16);
        let mut gc = TextureGc::new(GcMode::Manual, 1, 1);
        let base = BaseTexture::from_buffer(vec![0; 16], 2, 2, Default::default()).unwrap();
        textures.bind(&mut backend, Some(&base), 0);

        for _ in 0..5 {
            gc.postrender(&mut textures, &mut backend, true);
        }
        assert_eq!(textures.managed_count(), 1);
        assert_eq!(gc.run(&mut textures, &mut backend), 1);
    }
}
