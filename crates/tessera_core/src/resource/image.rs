use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::{Rc, Weak};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::Arc;

use image::{ImageError, RgbaImage};

use super::{upload_pixels, LoadState, Resource, ResourceCore};
use crate::base_texture::BaseTexture;
use crate::error::ResourceError;
use crate::signal::ListenerId;
use crate::ticker::Ticker;
use crate::upload::{GlTexture, TextureUploader};

/// Where encoded image data comes from
#[derive(Clone, Debug)]
pub enum ImageSource {
    Bytes(Arc<[u8]>),
    Path(PathBuf),
}

type DecodeResult = Result<RgbaImage, ResourceError>;

/// An encoded image decoded into RGBA8 pixels
///
/// [`ImageResource::load`] decodes on a worker thread; the result is picked up
/// by [`Resource::poll`] on the render thread (or automatically every tick
/// after [`ImageResource::watch`]). Destroying the resource while a decode is
/// in flight drops the result.
pub struct ImageResource {
    core: ResourceCore,
    source: ImageSource,
    this: Weak<ImageResource>,
    pixels: RefCell<Option<RgbaImage>>,
    state: RefCell<LoadState>,
    pending: RefCell<Option<Receiver<DecodeResult>>>,
    ticker: RefCell<Option<(Ticker, ListenerId)>>,
}

impl std::fmt::Debug for ImageResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageResource")
            .field("core", &self.core)
            .field("source", &self.source)
            .field("state", &self.state.borrow())
            .finish()
    }
}

fn decode(source: &ImageSource) -> DecodeResult {
    let decoded = match source {
        ImageSource::Bytes(bytes) => image::load_from_memory(bytes),
        ImageSource::Path(path) => image::open(path),
    };

    decoded
        .map(|image| image.to_rgba8())
        .map_err(|e| match e {
            ImageError::IoError(io) => ResourceError::Io(io.to_string()),
            other => ResourceError::Decode(other.to_string()),
        })
}

impl ImageResource {
    pub fn new(source: ImageSource) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            core: ResourceCore::default(),
            source,
            this: this.clone(),
            pixels: RefCell::new(None),
            state: RefCell::new(LoadState::Pending),
            pending: RefCell::new(None),
            ticker: RefCell::new(None),
        })
    }

    pub fn source(&self) -> &ImageSource {
        &self.source
    }

    pub fn state(&self) -> LoadState {
        self.state.borrow().clone()
    }

    /// Whether a background decode is in flight
    pub fn is_loading(&self) -> bool {
        self.pending.borrow().is_some()
    }

    /// Decode on the calling thread
    pub fn load_sync(&self) -> LoadState {
        if self.core.destroyed() {
            return LoadState::Failed(ResourceError::Destroyed);
        }
        if self.pixels.borrow().is_some() {
            return LoadState::Ready;
        }
        self.pending.borrow_mut().take();
        self.finish(decode(&self.source));
        self.state()
    }

    /// Poll for completion on every tick until the decode settles
    pub fn watch(&self, ticker: &Ticker) {
        let id = ListenerId::unique();
        let this = self.this.clone();
        ticker.add(id, move |_| {
            if let Some(this) = this.upgrade() {
                this.poll();
            }
        });
        if let Some((old, old_id)) = self.ticker.replace(Some((ticker.clone(), id))) {
            old.remove(old_id);
        }
    }

    fn unwatch(&self) {
        if let Some((ticker, id)) = self.ticker.borrow_mut().take() {
            ticker.remove(id);
        }
    }

    fn finish(&self, result: DecodeResult) {
        if self.core.destroyed() {
            return;
        }
        self.unwatch();

        match result {
            Ok(pixels) => {
                let (width, height) = pixels.dimensions();
                *self.pixels.borrow_mut() = Some(pixels);
                *self.state.borrow_mut() = LoadState::Ready;
                tracing::debug!("decoded image {}x{}", width, height);

                if (width, height) != (self.core.width(), self.core.height()) {
                    self.core.resize(width, height);
                } else {
                    self.core.update();
                }
            }
            Err(error) => {
                *self.state.borrow_mut() = LoadState::Failed(error.clone());
                self.core.fail(error);
            }
        }
    }
}

impl Resource for ImageResource {
    fn core(&self) -> &ResourceCore {
        &self.core
    }

    fn kind(&self) -> &'static str {
        "image"
    }

    fn load(&self) -> LoadState {
        if self.core.destroyed() {
            return LoadState::Failed(ResourceError::Destroyed);
        }
        if self.pixels.borrow().is_some() {
            return LoadState::Ready;
        }
        if self.pending.borrow().is_some() {
            return LoadState::Pending;
        }

        let (tx, rx) = mpsc::channel();
        let source = self.source.clone();
        let spawned = std::thread::Builder::new()
            .name("tessera-image-decode".to_string())
            .spawn(move || {
                // Receiver may be gone if the resource was destroyed
                let _ = tx.send(decode(&source));
            });

        match spawned {
            Ok(_) => {
                *self.pending.borrow_mut() = Some(rx);
                *self.state.borrow_mut() = LoadState::Pending;
                LoadState::Pending
            }
            Err(e) => {
                self.finish(Err(ResourceError::Io(e.to_string())));
                self.state()
            }
        }
    }

    fn poll(&self) {
        let received = match self.pending.borrow().as_ref() {
            Some(rx) => rx.try_recv(),
            None => return,
        };

        match received {
            Ok(result) => {
                self.pending.borrow_mut().take();
                self.finish(result);
            }
            Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Disconnected) => {
                self.pending.borrow_mut().take();
                self.finish(Err(ResourceError::Decode(
                    "decoder thread exited without a result".to_string(),
                )));
            }
        }
    }

    fn read_pixels(&self, f: &mut dyn FnMut(&[u8], u32, u32)) -> bool {
        match self.pixels.borrow().as_ref() {
            Some(pixels) => {
                f(pixels.as_raw(), pixels.width(), pixels.height());
                true
            }
            None => false,
        }
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
        self.unwatch();
        self.pending.borrow_mut().take();
        self.pixels.borrow_mut().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ResourceExt;
    use std::cell::Cell;
    use std::time::Duration;

    fn png_bytes(width: u32, height: u32) -> Arc<[u8]> {
        let image = RgbaImage::from_pixel(width, height, image::Rgba([255, 0, 0, 255]));
        let mut out = std::io::Cursor::new(Vec::new());
        image.write_to(&mut out, image::ImageFormat::Png).unwrap();
        out.into_inner().into()
    }

    fn wait_ready(resource: &ImageResource) {
        for _ in 0..500 {
            resource.poll();
            if !resource.is_loading() {
                return;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        panic!("decode did not finish");
    }

    #[test]
    fn sync_load_sets_size() {
        let resource = ImageResource::new(ImageSource::Bytes(png_bytes(3, 5)));
        assert_eq!(resource.load_sync(), LoadState::Ready);
        assert_eq!((resource.width(), resource.height()), (3, 5));
    }

    #[test]
    fn background_load_completes_on_poll() {
        let resource = ImageResource::new(ImageSource::Bytes(png_bytes(4, 4)));
        let resized = Rc::new(Cell::new(false));
        let r = resized.clone();
        resource.core().on_resize.connect(move |_| r.set(true));

        assert_eq!(resource.load(), LoadState::Pending);
        wait_ready(&resource);

        assert!(resized.get());
        assert_eq!(resource.state(), LoadState::Ready);
    }

    #[test]
    fn decode_errors_go_through_signal() {
        let resource = ImageResource::new(ImageSource::Bytes(Arc::from(&b"nope"[..])));
        let failed = Rc::new(Cell::new(false));
        let f = failed.clone();
        resource.core().on_error.connect(move |_| f.set(true));

        assert!(matches!(resource.load_sync(), LoadState::Failed(_)));
        assert!(failed.get());
        assert!(!resource.valid());
    }

    #[test]
    fn destroy_cancels_pending_decode() {
        let resource = ImageResource::new(ImageSource::Bytes(png_bytes(2, 2)));
        resource.load();
        resource.destroy();
        resource.poll();

        assert!(!resource.valid());
        assert_eq!(resource.load(), LoadState::Failed(ResourceError::Destroyed));
    }

    #[test]
    fn watch_polls_from_ticker() {
        let ticker = Ticker::new();
        let resource = ImageResource::new(ImageSource::Bytes(png_bytes(2, 2)));
        resource.watch(&ticker);
        resource.load();

        for i in 0..500 {
            ticker.update(i as f64);
            if !resource.is_loading() {
                break;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        assert!(resource.valid());
        assert!(ticker.is_empty());
    }
}
