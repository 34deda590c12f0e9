use std::cell::Cell;
use std::fmt;
use std::rc::{Rc, Weak};

use super::{upload_pixels, LoadState, Resource, ResourceCore};
use crate::base_texture::BaseTexture;
use crate::signal::ListenerId;
use crate::ticker::{Tick, Ticker};
use crate::upload::{GlTexture, TextureUploader};

/// A decoder or capture device that produces frames
///
/// Decoding is outside this crate; implementors expose the most recent frame
/// as tightly packed RGBA8 rows.
pub trait VideoSource {
    /// Frame size, `(0, 0)` until metadata is known
    fn dimensions(&self) -> (u32, u32);

    fn is_playing(&self) -> bool;

    fn playback_rate(&self) -> f64 {
        1.0
    }

    /// Borrow the current frame
    fn read_frame(&self, f: &mut dyn FnMut(&[u8], u32, u32)) -> bool;
}

/// A resource refreshed from a [`VideoSource`] while it plays
///
/// While playing (and with auto update on) the resource sits in the ticker's
/// update list and announces a new frame every tick, or every
/// `1000 / update_fps` milliseconds when a sampling rate is set.
pub struct VideoResource {
    core: ResourceCore,
    this: Weak<VideoResource>,
    source: Box<dyn VideoSource>,
    ticker: Ticker,
    tick_id: ListenerId,
    auto_update: Cell<bool>,
    update_fps: Cell<f32>,
    ms_to_next_update: Cell<f64>,
}

impl fmt::Debug for VideoResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VideoResource")
            .field("core", &self.core)
            .field("auto_update", &self.auto_update.get())
            .field("update_fps", &self.update_fps.get())
            .field("ticking", &self.is_ticking())
            .finish()
    }
}

impl VideoResource {
    pub fn new(source: Box<dyn VideoSource>, ticker: Ticker) -> Rc<Self> {
        let (width, height) = source.dimensions();
        let video = Rc::new_cyclic(|this| Self {
            core: ResourceCore::new(width, height),
            this: this.clone(),
            source,
            ticker,
            tick_id: ListenerId::unique(),
            auto_update: Cell::new(true),
            update_fps: Cell::new(0.0),
            ms_to_next_update: Cell::new(0.0),
        });
        video.sync_playing();
        video
    }

    pub fn source(&self) -> &dyn VideoSource {
        self.source.as_ref()
    }

    pub fn is_ticking(&self) -> bool {
        self.ticker.contains(self.tick_id)
    }

    pub fn auto_update(&self) -> bool {
        self.auto_update.get()
    }

    /// Enable or disable ticker-driven updates
    pub fn set_auto_update(&self, value: bool) {
        if self.auto_update.replace(value) == value {
            return;
        }
        if !value {
            self.ticker.remove(self.tick_id);
        } else if self.source.is_playing() {
            self.start_ticking();
        }
    }

    pub fn update_fps(&self) -> f32 {
        self.update_fps.get()
    }

    /// Sample at most `fps` frames per second; 0 samples every tick
    pub fn set_update_fps(&self, fps: f32) {
        let fps = fps.max(0.0);
        if fps != self.update_fps.get() {
            self.update_fps.set(fps);
            self.ms_to_next_update.set(0.0);
        }
    }

    /// Playback started
    pub fn on_play_start(&self) {
        self.refresh_size();
        if self.auto_update.get() {
            self.start_ticking();
        }
    }

    /// Playback paused or ended
    pub fn on_play_stop(&self) {
        self.ticker.remove(self.tick_id);
    }

    /// Match ticker registration to the source's play state
    pub fn sync_playing(&self) {
        if self.source.is_playing() {
            self.on_play_start();
        } else {
            self.on_play_stop();
        }
    }

    fn start_ticking(&self) {
        let this = self.this.clone();
        self.ticker.add(self.tick_id, move |tick: &Tick| {
            if let Some(this) = this.upgrade() {
                this.tick(tick.delta_ms);
            }
        });
    }

    fn refresh_size(&self) {
        let (width, height) = self.source.dimensions();
        self.core.resize(width, height);
    }

    /// Advance by `delta_ms`, announcing a frame when the sampling interval elapsed
    pub fn tick(&self, delta_ms: f64) {
        if self.core.destroyed() {
            return;
        }
        self.refresh_size();

        let elapsed = delta_ms * self.source.playback_rate();
        let remaining = (self.ms_to_next_update.get() - elapsed).floor();
        self.ms_to_next_update.set(remaining);

        let fps = self.update_fps.get();
        if fps == 0.0 || remaining <= 0.0 {
            self.core.update();
            let next = if fps > 0.0 {
                (1000.0 / fps as f64).floor()
            } else {
                0.0
            };
            self.ms_to_next_update.set(next);
        }
    }
}

impl Resource for VideoResource {
    fn core(&self) -> &ResourceCore {
        &self.core
    }

    fn kind(&self) -> &'static str {
        "video"
    }

    fn load(&self) -> LoadState {
        self.refresh_size();
        if self.core.valid() {
            LoadState::Ready
        } else {
            LoadState::Pending
        }
    }

    fn read_pixels(&self, f: &mut dyn FnMut(&[u8], u32, u32)) -> bool {
        self.source.read_frame(f)
    }

    fn upload(
        &self,
        uploader: &mut dyn TextureUploader,
        base: &BaseTexture,
        gl: &mut GlTexture,
    ) -> bool {
        upload_pixels(self, uploader, base, gl)
    }

    fn dispose(&self) {
        self.ticker.remove(self.tick_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ResourceExt;

    struct FakeVideo {
        playing: Rc<Cell<bool>>,
    }

    impl VideoSource for FakeVideo {
        fn dimensions(&self) -> (u32, u32) {
            (16, 9)
        }

        fn is_playing(&self) -> bool {
            self.playing.get()
        }

        fn read_frame(&self, f: &mut dyn FnMut(&[u8], u32, u32)) -> bool {
            f(&[0; 16 * 9 * 4], 16, 9);
            true
        }
    }

    fn video(playing: bool) -> (Rc<VideoResource>, Rc<Cell<bool>>, Ticker) {
        let flag = Rc::new(Cell::new(playing));
        let ticker = Ticker::new();
        let resource = VideoResource::new(
            Box::new(FakeVideo {
                playing: flag.clone(),
            }),
            ticker.clone(),
        );
        (resource, flag, ticker)
    }

    fn count_updates(resource: &VideoResource) -> Rc<Cell<u32>> {
        let count = Rc::new(Cell::new(0));
        let c = count.clone();
        resource.core().on_update.connect(move |_| c.set(c.get() + 1));
        count
    }

    #[test]
    fn registers_with_ticker_while_playing() {
        let (resource, playing, ticker) = video(true);
        assert!(resource.is_ticking());
        assert_eq!(ticker.len(), 1);

        playing.set(false);
        resource.sync_playing();
        assert!(!resource.is_ticking());
    }

    #[test]
    fn paused_video_does_not_tick() {
        let (resource, _, _) = video(false);
        assert!(!resource.is_ticking());
        assert!(resource.valid());
    }

    #[test]
    fn every_tick_updates_without_fps() {
        let (resource, _, ticker) = video(true);
        let count = count_updates(&resource);
        ticker.update(0.0);
        ticker.update(16.0);
        ticker.update(32.0);
        assert_eq!(count.get(), 3);
    }

    #[test]
    fn update_fps_throttles_sampling() {
        let (resource, _, _) = video(true);
        resource.set_update_fps(10.0);
        let count = count_updates(&resource);

        // First tick samples immediately, the next one is due after 100ms
        resource.tick(16.0);
        for _ in 0..5 {
            resource.tick(16.0);
        }
        assert_eq!(count.get(), 1);

        resource.tick(20.0);
        assert_eq!(count.get(), 2);
    }

    #[test]
    fn destroy_leaves_ticker() {
        let (resource, _, ticker) = video(true);
        resource.destroy();
        assert!(ticker.is_empty());
    }
}
