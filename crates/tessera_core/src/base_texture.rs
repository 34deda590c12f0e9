//! Logical GPU textures
//!
//! A [`BaseTexture`] is the CPU-side description of one GPU texture: its size
//! at a given resolution, sampler settings and the [`Resource`] that provides
//! its pixels. GPU systems never look at pixels directly; they compare the
//! `dirty_id`/`dirty_style_id` counters with what they uploaded last.
//!
//! `BaseTexture` is a cheap handle (`Rc`); clones refer to the same texture.

use std::cell::{Cell, Ref, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::constants::{
    AlphaMode, MipmapMode, PixelFormat, PixelType, ScaleMode, TextureTarget, WrapMode,
};
use crate::error::{ResourceError, Result, TextureError};
use crate::resource::{
    auto_detect_resource, BufferResource, LoadState, Resource, ResourceExt, TextureSource,
};
use crate::signal::{next_uid, ListenerId, Signal};
use crate::ticker::Ticker;

/// Tolerance applied before rounding real sizes up to whole pixels
pub const SIZE_EPSILON: f32 = 1e-4;

/// Construction options
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BaseTextureOptions {
    pub alpha_mode: AlphaMode,
    pub mipmap: MipmapMode,
    pub anisotropic_level: u32,
    pub wrap_mode: WrapMode,
    pub scale_mode: ScaleMode,
    pub format: PixelFormat,
    pub pixel_type: PixelType,
    pub target: TextureTarget,
    pub resolution: f32,
    /// Logical width when no resource provides one
    pub width: f32,
    /// Logical height when no resource provides one
    pub height: f32,
}

impl Default for BaseTextureOptions {
    fn default() -> Self {
        Self {
            alpha_mode: AlphaMode::default(),
            mipmap: MipmapMode::default(),
            anisotropic_level: 0,
            wrap_mode: WrapMode::default(),
            scale_mode: ScaleMode::default(),
            format: PixelFormat::default(),
            pixel_type: PixelType::default(),
            target: TextureTarget::default(),
            resolution: 1.0,
            width: 0.0,
            height: 0.0,
        }
    }
}

impl BaseTextureOptions {
    pub fn with_size(mut self, width: f32, height: f32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_resolution(mut self, resolution: f32) -> Self {
        self.resolution = resolution;
        self
    }

    pub fn with_alpha_mode(mut self, alpha_mode: AlphaMode) -> Self {
        self.alpha_mode = alpha_mode;
        self
    }

    pub fn with_scale_mode(mut self, scale_mode: ScaleMode) -> Self {
        self.scale_mode = scale_mode;
        self
    }
}

#[derive(Debug)]
struct State {
    width: f32,
    height: f32,
    resolution: f32,
    alpha_mode: AlphaMode,
    mipmap: MipmapMode,
    anisotropic_level: u32,
    wrap_mode: WrapMode,
    scale_mode: ScaleMode,
    format: PixelFormat,
    pixel_type: PixelType,
    target: TextureTarget,
    is_power_of_two: bool,
    valid: bool,
    destroyed: bool,
    dirty_id: u32,
    dirty_style_id: u32,
}

struct Inner {
    uid: u64,
    listener: ListenerId,
    render_target: bool,
    state: RefCell<State>,
    resource: RefCell<Option<Rc<dyn Resource>>>,
    owns_resource: Cell<bool>,
    cache_ids: RefCell<Vec<String>>,
    on_loaded: Signal<BaseTexture>,
    on_update: Signal<BaseTexture>,
    on_error: Signal<ResourceError>,
    on_dispose: Signal<u64>,
    on_destroy: Signal<u64>,
}

/// Shared handle to a logical texture
#[derive(Clone)]
pub struct BaseTexture(Rc<Inner>);

/// Non-owning reference to a [`BaseTexture`]
#[derive(Clone)]
pub struct WeakBaseTexture(Weak<Inner>);

impl WeakBaseTexture {
    pub fn upgrade(&self) -> Option<BaseTexture> {
        self.0.upgrade().map(BaseTexture)
    }
}

impl PartialEq for BaseTexture {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for BaseTexture {}

impl fmt::Debug for BaseTexture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.0.state.borrow();
        f.debug_struct("BaseTexture")
            .field("uid", &self.0.uid)
            .field("width", &state.width)
            .field("height", &state.height)
            .field("resolution", &state.resolution)
            .field("valid", &state.valid)
            .field("dirty_id", &state.dirty_id)
            .finish()
    }
}

fn is_pow2(v: u32) -> bool {
    v != 0 && (v & (v - 1)) == 0
}

fn real_size(logical: f32, resolution: f32) -> u32 {
    (logical * resolution - SIZE_EPSILON).ceil().max(0.0) as u32
}

impl BaseTexture {
    /// A base texture around an optional, externally owned resource
    pub fn new(resource: Option<Rc<dyn Resource>>, options: BaseTextureOptions) -> Result<Self> {
        let texture = Self::with_options(options, false);
        if let Some(resource) = resource {
            texture.set_resource(resource)?;
        }
        Ok(texture)
    }

    /// A base texture without a resource, backed by GPU-side storage only
    pub fn new_render_target(options: BaseTextureOptions) -> Self {
        Self::with_options(options, true)
    }

    /// Detect a resource for `source`, own it and start loading it
    pub fn from_source(
        source: TextureSource,
        options: BaseTextureOptions,
        ticker: &Ticker,
    ) -> Result<Self> {
        let external = matches!(source, TextureSource::Resource(_));
        let resource = auto_detect_resource(source, ticker)?;
        let texture = Self::new(Some(resource.clone()), options)?;
        texture.0.owns_resource.set(!external);

        if let LoadState::Failed(error) = resource.load() {
            tracing::debug!("texture {} source failed to load: {}", texture.uid(), error);
        }
        Ok(texture)
    }

    /// Wrap raw pixels in an owned buffer resource
    pub fn from_buffer(
        data: Vec<u8>,
        width: u32,
        height: u32,
        options: BaseTextureOptions,
    ) -> Result<Self> {
        let resource: Rc<dyn Resource> = Rc::new(BufferResource::new(data, width, height)?);
        let texture = Self::new(Some(resource), options)?;
        texture.0.owns_resource.set(true);
        Ok(texture)
    }

    fn with_options(options: BaseTextureOptions, render_target: bool) -> Self {
        let texture = Self(Rc::new(Inner {
            uid: next_uid(),
            listener: ListenerId::unique(),
            render_target,
            state: RefCell::new(State {
                width: options.width,
                height: options.height,
                resolution: if options.resolution > 0.0 {
                    options.resolution
                } else {
                    1.0
                },
                alpha_mode: options.alpha_mode,
                mipmap: options.mipmap,
                anisotropic_level: options.anisotropic_level,
                wrap_mode: options.wrap_mode,
                scale_mode: options.scale_mode,
                format: options.format,
                pixel_type: options.pixel_type,
                target: options.target,
                is_power_of_two: false,
                valid: false,
                destroyed: false,
                dirty_id: 0,
                dirty_style_id: 0,
            }),
            resource: RefCell::new(None),
            owns_resource: Cell::new(false),
            cache_ids: RefCell::new(Vec::new()),
            on_loaded: Signal::new(),
            on_update: Signal::new(),
            on_error: Signal::new(),
            on_dispose: Signal::new(),
            on_destroy: Signal::new(),
        }));

        texture.refresh_pot();
        let mut state = texture.0.state.borrow_mut();
        state.valid = state.width > 0.0 && state.height > 0.0;
        drop(state);
        texture
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    pub fn uid(&self) -> u64 {
        self.0.uid
    }

    pub fn downgrade(&self) -> WeakBaseTexture {
        WeakBaseTexture(Rc::downgrade(&self.0))
    }

    fn state(&self) -> Ref<'_, State> {
        self.0.state.borrow()
    }

    pub fn width(&self) -> f32 {
        self.state().width
    }

    pub fn height(&self) -> f32 {
        self.state().height
    }

    pub fn resolution(&self) -> f32 {
        self.state().resolution
    }

    /// Width in device pixels
    pub fn real_width(&self) -> u32 {
        let s = self.state();
        real_size(s.width, s.resolution)
    }

    /// Height in device pixels
    pub fn real_height(&self) -> u32 {
        let s = self.state();
        real_size(s.height, s.resolution)
    }

    pub fn valid(&self) -> bool {
        self.state().valid
    }

    pub fn destroyed(&self) -> bool {
        self.state().destroyed
    }

    pub fn is_power_of_two(&self) -> bool {
        self.state().is_power_of_two
    }

    /// Content version; increases by one per update once valid
    pub fn dirty_id(&self) -> u32 {
        self.state().dirty_id
    }

    /// Sampler state version
    pub fn dirty_style_id(&self) -> u32 {
        self.state().dirty_style_id
    }

    pub fn alpha_mode(&self) -> AlphaMode {
        self.state().alpha_mode
    }

    pub fn mipmap(&self) -> MipmapMode {
        self.state().mipmap
    }

    pub fn anisotropic_level(&self) -> u32 {
        self.state().anisotropic_level
    }

    pub fn wrap_mode(&self) -> WrapMode {
        self.state().wrap_mode
    }

    pub fn scale_mode(&self) -> ScaleMode {
        self.state().scale_mode
    }

    pub fn format(&self) -> PixelFormat {
        self.state().format
    }

    pub fn pixel_type(&self) -> PixelType {
        self.state().pixel_type
    }

    pub fn target(&self) -> TextureTarget {
        self.state().target
    }

    /// Whether this texture only exists as a render target
    pub fn is_render_target(&self) -> bool {
        self.0.render_target
    }

    pub fn resource(&self) -> Option<Rc<dyn Resource>> {
        self.0.resource.borrow().clone()
    }

    /// Whether the resource was created by this texture and dies with it
    pub fn owns_resource(&self) -> bool {
        self.0.owns_resource.get()
    }

    pub fn cache_ids(&self) -> Vec<String> {
        self.0.cache_ids.borrow().clone()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Signals
    // ─────────────────────────────────────────────────────────────────────────

    /// Fired once, when the texture first becomes valid
    pub fn on_loaded(&self) -> &Signal<BaseTexture> {
        &self.0.on_loaded
    }

    pub fn on_update(&self) -> &Signal<BaseTexture> {
        &self.0.on_update
    }

    /// Resource load errors, re-emitted
    pub fn on_error(&self) -> &Signal<ResourceError> {
        &self.0.on_error
    }

    /// GPU storage should be released; the texture stays usable
    pub fn on_dispose(&self) -> &Signal<u64> {
        &self.0.on_dispose
    }

    /// The texture is gone for good
    pub fn on_destroy(&self) -> &Signal<u64> {
        &self.0.on_destroy
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Mutation
    // ─────────────────────────────────────────────────────────────────────────

    /// Attach the pixel source; a texture takes exactly one resource
    pub fn set_resource(&self, resource: Rc<dyn Resource>) -> Result<()> {
        if let Some(current) = self.0.resource.borrow().as_ref() {
            if Rc::ptr_eq(current, &resource) {
                return Ok(());
            }
            return Err(TextureError::ResourceAlreadySet);
        }

        resource.on_bind()?;

        if let Some(target) = resource.target() {
            self.0.state.borrow_mut().target = target;
        }
        *self.0.resource.borrow_mut() = Some(resource.clone());

        let on_resize = {
            let weak = Rc::downgrade(&self.0);
            move |&(w, h): &(u32, u32)| {
                if let Some(inner) = weak.upgrade() {
                    BaseTexture(inner).set_real_size(w as f32, h as f32, None);
                }
            }
        };
        let on_update = {
            let weak = Rc::downgrade(&self.0);
            move |_: &()| {
                if let Some(inner) = weak.upgrade() {
                    BaseTexture(inner).update();
                }
            }
        };
        let on_error = {
            let weak = Rc::downgrade(&self.0);
            move |e: &ResourceError| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_error.emit(e);
                }
            }
        };
        resource
            .core()
            .bind(self.0.listener, on_resize, on_update, on_error);
        Ok(())
    }

    /// Announce new contents
    ///
    /// The first call with positive dimensions makes the texture valid and
    /// fires `loaded` then `update`. Later calls bump both dirty ids.
    pub fn update(&self) {
        let became_valid = {
            let mut s = self.0.state.borrow_mut();
            if s.destroyed {
                return;
            }
            if !s.valid {
                if s.width > 0.0 && s.height > 0.0 {
                    s.valid = true;
                    true
                } else {
                    return;
                }
            } else {
                s.dirty_id = s.dirty_id.wrapping_add(1);
                s.dirty_style_id = s.dirty_style_id.wrapping_add(1);
                false
            }
        };

        if became_valid {
            self.0.on_loaded.emit(self);
        }
        self.0.on_update.emit(self);
    }

    fn refresh_pot(&self) {
        let mut s = self.0.state.borrow_mut();
        let w = real_size(s.width, s.resolution);
        let h = real_size(s.height, s.resolution);
        s.is_power_of_two = is_pow2(w) && is_pow2(h);
    }

    /// Set the size in device pixels, optionally changing resolution
    pub fn set_real_size(&self, real_width: f32, real_height: f32, resolution: Option<f32>) {
        {
            let mut s = self.0.state.borrow_mut();
            if let Some(resolution) = resolution.filter(|r| *r > 0.0) {
                s.resolution = resolution;
            }
            s.width = real_width / s.resolution;
            s.height = real_height / s.resolution;
        }
        self.refresh_pot();
        self.update();
    }

    /// Set the logical size, optionally changing resolution
    pub fn set_size(&self, width: f32, height: f32, resolution: Option<f32>) {
        {
            let mut s = self.0.state.borrow_mut();
            if let Some(resolution) = resolution.filter(|r| *r > 0.0) {
                s.resolution = resolution;
            }
            s.width = width;
            s.height = height;
        }
        self.refresh_pot();
        self.update();
    }

    /// Change resolution keeping the real pixel size
    pub fn set_resolution(&self, resolution: f32) {
        let notify = {
            let mut s = self.0.state.borrow_mut();
            let old = s.resolution;
            if resolution <= 0.0 || old == resolution {
                return;
            }
            s.resolution = resolution;
            if s.valid {
                s.width = (s.width * old).round() / resolution;
                s.height = (s.height * old).round() / resolution;
            }
            s.valid
        };
        self.refresh_pot();
        if notify {
            self.0.on_update.emit(self);
        }
    }

    /// Change sampler filtering and mipmapping
    pub fn set_style(&self, scale_mode: Option<ScaleMode>, mipmap: Option<MipmapMode>) {
        let mut s = self.0.state.borrow_mut();
        let mut dirty = false;

        if let Some(scale_mode) = scale_mode.filter(|m| *m != s.scale_mode) {
            s.scale_mode = scale_mode;
            dirty = true;
        }
        if let Some(mipmap) = mipmap.filter(|m| *m != s.mipmap) {
            s.mipmap = mipmap;
            dirty = true;
        }
        if dirty {
            s.dirty_style_id = s.dirty_style_id.wrapping_add(1);
        }
    }

    pub fn set_wrap_mode(&self, wrap_mode: WrapMode) {
        let mut s = self.0.state.borrow_mut();
        if s.wrap_mode != wrap_mode {
            s.wrap_mode = wrap_mode;
            s.dirty_style_id = s.dirty_style_id.wrapping_add(1);
        }
    }

    pub fn set_anisotropic_level(&self, level: u32) {
        let mut s = self.0.state.borrow_mut();
        if s.anisotropic_level != level {
            s.anisotropic_level = level;
            s.dirty_style_id = s.dirty_style_id.wrapping_add(1);
        }
    }

    /// Alpha handling changes how pixels are uploaded, so contents are re-sent
    pub fn set_alpha_mode(&self, alpha_mode: AlphaMode) {
        let mut s = self.0.state.borrow_mut();
        if s.alpha_mode != alpha_mode {
            s.alpha_mode = alpha_mode;
            s.dirty_id = s.dirty_id.wrapping_add(1);
        }
    }

    /// Kick off (or retry) loading the resource
    pub fn load(&self) -> LoadState {
        match self.resource() {
            Some(resource) => resource.load(),
            None if self.valid() => LoadState::Ready,
            None => LoadState::Pending,
        }
    }

    /// Deliver finished asynchronous loads
    pub fn poll(&self) {
        if let Some(resource) = self.resource() {
            resource.poll();
        }
    }

    pub(crate) fn add_cache_id(&self, id: &str) {
        let mut ids = self.0.cache_ids.borrow_mut();
        if !ids.iter().any(|existing| existing == id) {
            ids.push(id.to_string());
        }
    }

    pub(crate) fn remove_cache_id(&self, id: &str) {
        self.0.cache_ids.borrow_mut().retain(|existing| existing != id);
    }

    /// Ask GPU systems to release this texture's storage
    pub fn dispose(&self) {
        self.0.on_dispose.emit(&self.0.uid);
    }

    /// Release the resource, drop cache aliases and GPU storage
    ///
    /// Externally supplied resources survive; owned ones are destroyed.
    /// Calling this twice has no further effect.
    pub fn destroy(&self) {
        {
            let mut s = self.0.state.borrow_mut();
            if s.destroyed {
                return;
            }
            s.destroyed = true;
        }

        let resource = self.0.resource.borrow_mut().take();
        if let Some(resource) = resource {
            resource.core().unbind(self.0.listener);
            resource.on_unbind();
            if self.0.owns_resource.get() {
                resource.destroy();
            }
        }

        self.dispose();
        self.0.on_destroy.emit(&self.0.uid);
        self.0.cache_ids.borrow_mut().clear();

        self.0.on_loaded.close();
        self.0.on_update.close();
        self.0.on_error.close();
        self.0.on_dispose.close();
        self.0.on_destroy.close();
        tracing::trace!("base texture {} destroyed", self.0.uid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ResourceCore;

    fn buffer(w: u32, h: u32) -> Rc<dyn Resource> {
        Rc::new(BufferResource::new(vec![0; (w * h * 4) as usize], w, h).unwrap())
    }

    fn counter<T: ?Sized + 'static>(signal: &Signal<T>) -> Rc<Cell<u32>> {
        let count = Rc::new(Cell::new(0));
        let c = count.clone();
        signal.connect(move |_| c.set(c.get() + 1));
        count
    }

    #[derive(Debug, Default)]
    struct Lazy {
        core: ResourceCore,
    }

    impl Resource for Lazy {
        fn core(&self) -> &ResourceCore {
            &self.core
        }

        fn kind(&self) -> &'static str {
            "lazy"
        }
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Validity and dirty tracking
    // ─────────────────────────────────────────────────────────────────────────────

    #[test]
    fn sized_resource_makes_texture_valid() {
        let base = BaseTexture::new(Some(buffer(64, 64)), Default::default()).unwrap();
        assert!(base.valid());
        assert_eq!(base.width(), 64.0);
        assert_eq!(base.real_width(), 64);
        assert!(base.is_power_of_two());
        assert_eq!(base.dirty_id(), 0);
    }

    #[test]
    fn late_resource_fires_loaded_then_update() {
        let lazy = Rc::new(Lazy::default());
        let base = BaseTexture::new(Some(lazy.clone()), Default::default()).unwrap();
        assert!(!base.valid());

        let order = Rc::new(RefCell::new(Vec::new()));
        let o = order.clone();
        base.on_loaded().connect(move |_| o.borrow_mut().push("loaded"));
        let o = order.clone();
        base.on_update().connect(move |_| o.borrow_mut().push("update"));

        lazy.resize(10, 10);
        assert!(base.valid());
        assert_eq!(*order.borrow(), vec!["loaded", "update"]);
        assert_eq!(base.dirty_id(), 0);
    }

    #[test]
    fn dirty_id_counts_updates() {
        let base = BaseTexture::new(Some(buffer(4, 4)), Default::default()).unwrap();
        let before = base.dirty_id();
        for _ in 0..5 {
            base.update();
        }
        assert_eq!(base.dirty_id(), before + 5);
    }

    #[test]
    fn invalid_texture_update_does_nothing() {
        let base = BaseTexture::new(None, Default::default()).unwrap();
        let updates = counter(base.on_update());
        base.update();
        assert_eq!(updates.get(), 0);
        assert_eq!(base.dirty_id(), 0);
    }

    #[test]
    fn resource_can_be_set_once() {
        let base = BaseTexture::new(Some(buffer(2, 2)), Default::default()).unwrap();
        assert_eq!(
            base.set_resource(buffer(2, 2)),
            Err(TextureError::ResourceAlreadySet)
        );
        let same = base.resource().unwrap();
        assert!(base.set_resource(same).is_ok());
    }

    #[test]
    fn resource_errors_are_reemitted() {
        let lazy = Rc::new(Lazy::default());
        let base = BaseTexture::new(Some(lazy.clone()), Default::default()).unwrap();
        let errors = counter(base.on_error());
        lazy.core().fail(ResourceError::Decode("bad".into()));
        assert_eq!(errors.get(), 1);
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Sizes
    // ─────────────────────────────────────────────────────────────────────────────

    #[test]
    fn real_size_respects_resolution() {
        let base = BaseTexture::new(Some(buffer(128, 64)), Default::default()).unwrap();
        base.set_resolution(2.0);
        assert_eq!(base.width(), 64.0);
        assert_eq!(base.height(), 32.0);
        assert_eq!(base.real_width(), 128);
        assert!(base.is_power_of_two());
    }

    #[test]
    fn pot_tolerates_float_noise() {
        let base = BaseTexture::new(None, Default::default()).unwrap();
        base.set_size(64.00001, 32.0, None);
        assert!(base.is_power_of_two());
        base.set_size(65.0, 32.0, None);
        assert!(!base.is_power_of_two());
    }

    #[test]
    fn style_changes_bump_style_id_only() {
        let base = BaseTexture::new(Some(buffer(2, 2)), Default::default()).unwrap();
        let (dirty, style) = (base.dirty_id(), base.dirty_style_id());

        base.set_style(Some(ScaleMode::Nearest), None);
        base.set_style(Some(ScaleMode::Nearest), None);
        base.set_wrap_mode(WrapMode::Repeat);

        assert_eq!(base.dirty_id(), dirty);
        assert_eq!(base.dirty_style_id(), style + 2);
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Destruction
    // ─────────────────────────────────────────────────────────────────────────────

    #[test]
    fn destroy_is_idempotent() {
        let base = BaseTexture::new(Some(buffer(2, 2)), Default::default()).unwrap();
        let disposed = counter(base.on_dispose());
        base.destroy();
        base.destroy();
        assert_eq!(disposed.get(), 1);
        assert!(base.destroyed());
        assert!(base.resource().is_none());
    }

    #[test]
    fn external_resource_survives_destroy() {
        let resource = buffer(2, 2);
        let base = BaseTexture::new(Some(resource.clone()), Default::default()).unwrap();
        base.destroy();
        assert!(!resource.destroyed());
        assert!(resource.core().on_update.is_empty());
    }

    #[test]
    fn owned_resource_dies_with_texture() {
        let base =
            BaseTexture::from_buffer(vec![0; 16], 2, 2, BaseTextureOptions::default()).unwrap();
        let resource = base.resource().unwrap();
        base.destroy();
        assert!(resource.destroyed());
    }

    #[test]
    fn from_source_with_existing_resource_is_not_owned() {
        let resource = buffer(2, 2);
        let base = BaseTexture::from_source(
            TextureSource::Resource(resource.clone()),
            Default::default(),
            &Ticker::new(),
        )
        .unwrap();
        assert!(!base.owns_resource());
        base.destroy();
        assert!(!resource.destroyed());
    }

    #[test]
    fn array_resource_switches_target() {
        use crate::resource::ArrayResource;
        let array = ArrayResource::from_resources(vec![buffer(2, 2), buffer(2, 2)]);
        let base = BaseTexture::new(Some(array.clone()), Default::default()).unwrap();
        assert_eq!(base.target(), TextureTarget::Texture2DArray);

        let err = BaseTexture::new(Some(array), Default::default()).unwrap_err();
        assert_eq!(err, TextureError::Resource(ResourceError::ArrayAlreadyBound));
    }
}
