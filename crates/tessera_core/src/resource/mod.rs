//! Pixel sources that base textures bind to
//!
//! A [`Resource`] knows its pixel dimensions and how to upload itself through a
//! [`TextureUploader`]. The shared bookkeeping (dimensions, destroyed flag and
//! the resize/update/error signals) lives in [`ResourceCore`]; concrete
//! variants only decide how dimensions are discovered and how pixels reach
//! the GPU.

mod array;
mod buffer;
mod canvas;
mod image;
mod video;

pub use array::{ArrayResource, CubeResource};
pub use buffer::BufferResource;
pub use canvas::CanvasResource;
pub use self::image::{ImageResource, ImageSource};
pub use video::{VideoResource, VideoSource};

use std::cell::Cell;
use std::fmt;
use std::path::PathBuf;
use std::rc::Rc;

use crate::base_texture::BaseTexture;
use crate::constants::{AlphaMode, TextureTarget};
use crate::error::ResourceError;
use crate::signal::{ListenerId, Signal};
use crate::ticker::Ticker;
use crate::upload::{GlTexture, TextureUpload, TextureUploader};

/// Progress of an asynchronous load
#[derive(Clone, Debug, PartialEq)]
pub enum LoadState {
    /// Dimensions and pixels are available
    Ready,
    /// Work is in flight; poll again later
    Pending,
    /// The last attempt failed; `load()` retries
    Failed(ResourceError),
}

/// State shared by every resource variant
pub struct ResourceCore {
    width: Cell<u32>,
    height: Cell<u32>,
    destroyed: Cell<bool>,
    /// Fired with the new size when dimensions change
    pub on_resize: Signal<(u32, u32)>,
    /// Fired when contents change
    pub on_update: Signal<()>,
    /// Fired when loading fails
    pub on_error: Signal<ResourceError>,
}

impl fmt::Debug for ResourceCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceCore")
            .field("width", &self.width.get())
            .field("height", &self.height.get())
            .field("destroyed", &self.destroyed.get())
            .finish()
    }
}

impl Default for ResourceCore {
    fn default() -> Self {
        Self::new(0, 0)
    }
}

impl ResourceCore {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: Cell::new(width),
            height: Cell::new(height),
            destroyed: Cell::new(false),
            on_resize: Signal::new(),
            on_update: Signal::new(),
            on_error: Signal::new(),
        }
    }

    pub fn width(&self) -> u32 {
        self.width.get()
    }

    pub fn height(&self) -> u32 {
        self.height.get()
    }

    /// Both dimensions are positive and the resource is not destroyed
    pub fn valid(&self) -> bool {
        !self.destroyed.get() && self.width.get() > 0 && self.height.get() > 0
    }

    pub fn destroyed(&self) -> bool {
        self.destroyed.get()
    }

    /// Change dimensions, notifying only if they actually differ
    pub fn resize(&self, width: u32, height: u32) {
        if self.destroyed.get() {
            return;
        }
        if width == self.width.get() && height == self.height.get() {
            return;
        }
        self.width.set(width);
        self.height.set(height);
        self.on_resize.emit(&(width, height));
    }

    /// Announce new contents
    pub fn update(&self) {
        if !self.destroyed.get() {
            self.on_update.emit(&());
        }
    }

    /// Report a load failure
    pub fn fail(&self, error: ResourceError) {
        tracing::warn!("resource error: {}", error);
        self.on_error.emit(&error);
    }

    /// Register an owner for all three notifications
    ///
    /// When the resource already has a size, the owner immediately receives
    /// one resize notification.
    pub fn bind(
        &self,
        owner: ListenerId,
        on_resize: impl Fn(&(u32, u32)) + 'static,
        on_update: impl Fn(&()) + 'static,
        on_error: impl Fn(&ResourceError) + 'static,
    ) {
        let (width, height) = (self.width.get(), self.height.get());
        let has_size = width > 0 || height > 0;

        if has_size {
            on_resize(&(width, height));
        }

        self.on_resize.connect_as(owner, on_resize);
        self.on_update.connect_as(owner, on_update);
        self.on_error.connect_as(owner, on_error);
    }

    /// Remove every registration of `owner`
    pub fn unbind(&self, owner: ListenerId) {
        self.on_resize.disconnect(owner);
        self.on_update.disconnect(owner);
        self.on_error.disconnect(owner);
    }

    fn mark_destroyed(&self) -> bool {
        if self.destroyed.replace(true) {
            return false;
        }
        self.on_resize.close();
        self.on_update.close();
        self.on_error.close();
        true
    }
}

/// A source of texture pixels
pub trait Resource: fmt::Debug {
    fn core(&self) -> &ResourceCore;

    /// Short variant name for logs
    fn kind(&self) -> &'static str;

    /// Texture target this resource needs, if it differs from a plain 2D texture
    fn target(&self) -> Option<TextureTarget> {
        None
    }

    /// Called when a base texture takes this resource
    fn on_bind(&self) -> Result<(), ResourceError> {
        Ok(())
    }

    /// Called when a base texture releases this resource
    fn on_unbind(&self) {}

    /// Start (or retry) loading
    fn load(&self) -> LoadState {
        if self.core().valid() {
            LoadState::Ready
        } else {
            LoadState::Pending
        }
    }

    /// Deliver completed asynchronous work on the calling thread
    fn poll(&self) {}

    /// Borrow the current pixels as tightly packed rows
    fn read_pixels(&self, _f: &mut dyn FnMut(&[u8], u32, u32)) -> bool {
        false
    }

    /// Upload into `gl`; `false` lets the texture system run its generic path
    fn upload(
        &self,
        _uploader: &mut dyn TextureUploader,
        _base: &BaseTexture,
        _gl: &mut GlTexture,
    ) -> bool {
        false
    }

    /// Apply sampler state; `false` lets the texture system apply defaults
    fn style(
        &self,
        _uploader: &mut dyn TextureUploader,
        _base: &BaseTexture,
        _gl: &mut GlTexture,
    ) -> bool {
        false
    }

    /// Release variant-specific state
    fn dispose(&self) {}
}

/// Operations every resource gets for free
pub trait ResourceExt {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    fn valid(&self) -> bool;
    fn destroyed(&self) -> bool;
    fn resize(&self, width: u32, height: u32);
    fn update(&self);
    /// Dispose and close all signals; later calls do nothing
    fn destroy(&self);
}

impl<R: Resource + ?Sized> ResourceExt for R {
    fn width(&self) -> u32 {
        self.core().width()
    }

    fn height(&self) -> u32 {
        self.core().height()
    }

    fn valid(&self) -> bool {
        self.core().valid()
    }

    fn destroyed(&self) -> bool {
        self.core().destroyed()
    }

    fn resize(&self, width: u32, height: u32) {
        self.core().resize(width, height);
    }

    fn update(&self) {
        self.core().update();
    }

    fn destroy(&self) {
        if self.core().destroyed() {
            return;
        }
        self.dispose();
        self.core().mark_destroyed();
        tracing::trace!("destroyed {} resource", self.kind());
    }
}

/// Upload whatever `read_pixels` yields as layer 0 of `gl`
pub(crate) fn upload_pixels(
    resource: &dyn Resource,
    uploader: &mut dyn TextureUploader,
    base: &BaseTexture,
    gl: &mut GlTexture,
) -> bool {
    let premultiply = base.alpha_mode() == AlphaMode::Unpack;
    let (width, height) = (base.real_width(), base.real_height());
    let mut short = None;

    let read = resource.read_pixels(&mut |data, _w, _h| {
        let upload = TextureUpload::image(gl, width, height, premultiply, Some(data));
        if data.len() < upload.expected_len() {
            short = Some(ResourceError::BufferTooShort {
                expected: upload.expected_len(),
                actual: data.len(),
            });
            return;
        }
        uploader.upload(gl, &upload);
    });

    if let Some(error) = short {
        resource.core().fail(error);
    }
    read
}

/// Raw inputs `auto_detect_resource` understands
pub enum TextureSource {
    /// An existing resource, used as is
    Resource(Rc<dyn Resource>),
    /// An image file, detected by extension
    Path(PathBuf),
    /// Encoded image bytes, detected by magic number
    Encoded(Vec<u8>),
    /// Raw pixels with explicit dimensions
    Pixels {
        data: Vec<u8>,
        width: u32,
        height: u32,
    },
    /// One source per array layer
    Layers(Vec<TextureSource>),
    /// A frame provider driven by the ticker
    Video(Box<dyn VideoSource>),
}

impl fmt::Debug for TextureSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TextureSource::Resource(r) => f.debug_tuple("Resource").field(&r.kind()).finish(),
            TextureSource::Path(p) => f.debug_tuple("Path").field(p).finish(),
            TextureSource::Encoded(b) => f.debug_tuple("Encoded").field(&b.len()).finish(),
            TextureSource::Pixels { width, height, .. } => f
                .debug_struct("Pixels")
                .field("width", width)
                .field("height", height)
                .finish(),
            TextureSource::Layers(l) => f.debug_tuple("Layers").field(&l.len()).finish(),
            TextureSource::Video(_) => f.write_str("Video"),
        }
    }
}

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp"];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "m4v", "webm", "ogg", "ogv", "mov", "h264"];

/// Pick a resource variant for a raw source
pub fn auto_detect_resource(
    source: TextureSource,
    ticker: &Ticker,
) -> Result<Rc<dyn Resource>, ResourceError> {
    match source {
        TextureSource::Resource(resource) => Ok(resource),
        TextureSource::Pixels {
            data,
            width,
            height,
        } => Ok(Rc::new(BufferResource::new(data, width, height)?)),
        TextureSource::Encoded(bytes) => {
            if ::image::guess_format(&bytes).is_err() {
                return Err(ResourceError::UnsupportedSource(
                    "unrecognized image data".to_string(),
                ));
            }
            Ok(ImageResource::new(ImageSource::Bytes(bytes.into())))
        }
        TextureSource::Path(path) => {
            let ext = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_ascii_lowercase())
                .unwrap_or_default();

            if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
                Ok(ImageResource::new(ImageSource::Path(path)))
            } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
                Err(ResourceError::UnsupportedSource(format!(
                    "{} is a video; wrap a decoder in a VideoSource",
                    path.display()
                )))
            } else {
                Err(ResourceError::UnsupportedSource(path.display().to_string()))
            }
        }
        TextureSource::Layers(layers) => {
            let resources = layers
                .into_iter()
                .map(|layer| auto_detect_resource(layer, ticker))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(ArrayResource::from_resources(resources))
        }
        TextureSource::Video(source) => Ok(VideoResource::new(source, ticker.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct Plain {
        core: ResourceCore,
        disposed: Cell<u32>,
    }

    impl Resource for Plain {
        fn core(&self) -> &ResourceCore {
            &self.core
        }

        fn kind(&self) -> &'static str {
            "plain"
        }

        fn dispose(&self) {
            self.disposed.set(self.disposed.get() + 1);
        }
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Core behavior
    // ─────────────────────────────────────────────────────────────────────────────

    #[test]
    fn resize_only_fires_on_change() {
        let r = Plain::default();
        let fired = Rc::new(Cell::new(0));
        let f = fired.clone();
        r.core().on_resize.connect(move |_| f.set(f.get() + 1));

        r.resize(0, 0);
        assert_eq!(fired.get(), 0);
        r.resize(10, 20);
        assert_eq!(fired.get(), 1);
        r.resize(10, 20);
        assert_eq!(fired.get(), 1);
        assert!(r.valid());
    }

    #[test]
    fn bind_synthesizes_resize_for_sized_resources() {
        let r = Plain::default();
        r.resize(8, 8);

        let seen = Rc::new(Cell::new((0, 0)));
        let s = seen.clone();
        r.core()
            .bind(ListenerId::unique(), move |size| s.set(*size), |_| {}, |_| {});
        assert_eq!(seen.get(), (8, 8));
    }

    #[test]
    fn unbind_removes_all_listeners() {
        let r = Plain::default();
        let owner = ListenerId::unique();
        r.core().bind(owner, |_| {}, |_| {}, |_| {});
        r.core().unbind(owner);

        assert!(r.core().on_resize.is_empty());
        assert!(r.core().on_update.is_empty());
        assert!(r.core().on_error.is_empty());
    }

    #[test]
    fn destroy_is_idempotent() {
        let r = Plain::default();
        r.destroy();
        r.destroy();
        assert_eq!(r.disposed.get(), 1);
        assert!(r.destroyed());
        assert!(r.core().on_update.is_closed());
    }

    #[test]
    fn update_after_destroy_is_silent() {
        let r = Plain::default();
        let fired = Rc::new(Cell::new(false));
        let f = fired.clone();
        r.core().on_update.connect(move |_| f.set(true));
        r.destroy();
        r.update();
        assert!(!fired.get());
    }

    #[test]
    fn destroyed_resources_never_become_valid() {
        let r = Plain::default();
        r.destroy();
        r.resize(4, 4);
        assert!(r.destroyed());
        assert!(!r.valid());
        assert_eq!((r.width(), r.height()), (0, 0));

        let sized = Plain {
            core: ResourceCore::new(8, 8),
            ..Plain::default()
        };
        assert!(sized.valid());
        sized.destroy();
        assert!(!sized.valid());
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Auto detection
    // ─────────────────────────────────────────────────────────────────────────────

    #[test]
    fn detects_pixels_as_buffer() {
        let resource = auto_detect_resource(
            TextureSource::Pixels {
                data: vec![0; 16],
                width: 2,
                height: 2,
            },
            &Ticker::new(),
        )
        .unwrap();
        assert_eq!(resource.kind(), "buffer");
        assert_eq!((resource.width(), resource.height()), (2, 2));
    }

    #[test]
    fn detects_images_by_extension() {
        let resource =
            auto_detect_resource(TextureSource::Path("atlas.PNG".into()), &Ticker::new()).unwrap();
        assert_eq!(resource.kind(), "image");
    }

    #[test]
    fn rejects_unknown_sources() {
        let err = auto_detect_resource(TextureSource::Path("clip.mp4".into()), &Ticker::new())
            .unwrap_err();
        assert!(matches!(err, ResourceError::UnsupportedSource(_)));

        let err = auto_detect_resource(TextureSource::Encoded(vec![1, 2, 3]), &Ticker::new())
            .unwrap_err();
        assert!(matches!(err, ResourceError::UnsupportedSource(_)));
    }

    #[test]
    fn detects_layers_as_array() {
        let layers = (0..3)
            .map(|_| TextureSource::Pixels {
                data: vec![0; 4],
                width: 1,
                height: 1,
            })
            .collect();
        let resource = auto_detect_resource(TextureSource::Layers(layers), &Ticker::new()).unwrap();
        assert_eq!(resource.kind(), "array");
        assert_eq!(resource.target(), Some(TextureTarget::Texture2DArray));
    }
}
