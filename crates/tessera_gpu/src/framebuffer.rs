//! Framebuffers and their per-context binding
//!
//! A [`Framebuffer`] is the logical description (size in device pixels,
//! color textures, depth and stencil). [`FramebufferSystem`] keeps one native
//! framebuffer per logical one and re-validates its attachments when the
//! format or size versions move.

use std::cell::{Cell, Ref, RefCell};
use std::fmt;
use std::rc::Rc;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use tessera_core::{
    next_uid, BaseTexture, BaseTextureOptions, Disposal, DisposalQueue, ListenerId, MipmapMode,
    ScaleMode, Signal,
};

use crate::backend::{Backend, FramebufferDesc, FramebufferHandle, ViewRect};
use crate::texture_system::TextureSystem;

struct FramebufferInner {
    uid: u64,
    width: Cell<u32>,
    height: Cell<u32>,
    color_textures: RefCell<SmallVec<[BaseTexture; 1]>>,
    depth: Cell<bool>,
    stencil: Cell<bool>,
    dirty_id: Cell<u32>,
    dirty_format: Cell<u32>,
    dirty_size: Cell<u32>,
    on_dispose: Signal<u64>,
}

/// Render target attachments
#[derive(Clone)]
pub struct Framebuffer(Rc<FramebufferInner>);

impl PartialEq for Framebuffer {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Framebuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Framebuffer")
            .field("uid", &self.0.uid)
            .field("width", &self.0.width.get())
            .field("height", &self.0.height.get())
            .field("colors", &self.0.color_textures.borrow().len())
            .field("depth", &self.0.depth.get())
            .field("stencil", &self.0.stencil.get())
            .finish()
    }
}

fn bump(cell: &Cell<u32>) {
    cell.set(cell.get().wrapping_add(1));
}

impl Framebuffer {
    /// An attachment-less framebuffer of `width`×`height` device pixels
    pub fn new(width: u32, height: u32) -> Self {
        Self(Rc::new(FramebufferInner {
            uid: next_uid(),
            width: Cell::new(width),
            height: Cell::new(height),
            color_textures: RefCell::new(SmallVec::new()),
            depth: Cell::new(false),
            stencil: Cell::new(false),
            dirty_id: Cell::new(0),
            dirty_format: Cell::new(0),
            dirty_size: Cell::new(0),
            on_dispose: Signal::new(),
        }))
    }

    pub fn uid(&self) -> u64 {
        self.0.uid
    }

    pub fn width(&self) -> u32 {
        self.0.width.get()
    }

    pub fn height(&self) -> u32 {
        self.0.height.get()
    }

    pub fn color_textures(&self) -> Ref<'_, SmallVec<[BaseTexture; 1]>> {
        self.0.color_textures.borrow()
    }

    pub fn color_texture(&self) -> Option<BaseTexture> {
        self.0.color_textures.borrow().first().cloned()
    }

    pub fn depth(&self) -> bool {
        self.0.depth.get()
    }

    pub fn stencil(&self) -> bool {
        self.0.stencil.get()
    }

    pub fn dirty_id(&self) -> u32 {
        self.0.dirty_id.get()
    }

    pub fn dirty_format(&self) -> u32 {
        self.0.dirty_format.get()
    }

    pub fn dirty_size(&self) -> u32 {
        self.0.dirty_size.get()
    }

    pub fn on_dispose(&self) -> &Signal<u64> {
        &self.0.on_dispose
    }

    fn format_changed(&self) {
        bump(&self.0.dirty_id);
        bump(&self.0.dirty_format);
    }

    /// Attach `texture` at `index`, or a fresh render target texture
    pub fn add_color_texture(&self, index: usize, texture: Option<BaseTexture>) -> BaseTexture {
        let texture = texture.unwrap_or_else(|| {
            let options = BaseTextureOptions {
                scale_mode: ScaleMode::Nearest,
                mipmap: MipmapMode::Off,
                ..BaseTextureOptions::default()
            }
            .with_size(self.width() as f32, self.height() as f32);
            BaseTexture::new_render_target(options)
        });

        {
            let mut colors = self.0.color_textures.borrow_mut();
            if index < colors.len() {
                colors[index] = texture.clone();
            } else {
                colors.push(texture.clone());
            }
        }
        self.format_changed();
        texture
    }

    pub fn enable_depth(&self) {
        if !self.0.depth.replace(true) {
            self.format_changed();
        }
    }

    pub fn enable_stencil(&self) {
        if !self.0.stencil.replace(true) {
            self.format_changed();
        }
    }

    /// Resize attachments, in device pixels
    pub fn resize(&self, width: f32, height: f32) {
        let width = width.round().max(0.0) as u32;
        let height = height.round().max(0.0) as u32;
        if width == self.width() && height == self.height() {
            return;
        }
        self.0.width.set(width);
        self.0.height.set(height);
        bump(&self.0.dirty_id);
        bump(&self.0.dirty_size);

        let colors: SmallVec<[BaseTexture; 1]> = self.0.color_textures.borrow().clone();
        for texture in colors {
            let resolution = texture.resolution();
            texture.set_size(width as f32 / resolution, height as f32 / resolution, None);
        }
    }

    /// Ask GPU systems to drop the native framebuffer
    pub fn dispose(&self) {
        self.0.on_dispose.emit(&self.0.uid);
    }
}

#[derive(Debug)]
struct GlFramebuffer {
    handle: FramebufferHandle,
    dirty_id: Option<u32>,
    dirty_format: Option<u32>,
    dirty_size: Option<u32>,
}

/// Binds framebuffers and tracks the viewport
pub struct FramebufferSystem {
    framebuffers: FxHashMap<u64, GlFramebuffer>,
    /// `None` when the screen is bound
    current: Option<Framebuffer>,
    bound_once: bool,
    viewport: Option<ViewRect>,
    screen: (u32, u32),
    listener: ListenerId,
    disposals: DisposalQueue,
}

impl Default for FramebufferSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl FramebufferSystem {
    pub fn new() -> Self {
        Self {
            framebuffers: FxHashMap::default(),
            current: None,
            bound_once: false,
            viewport: None,
            screen: (0, 0),
            listener: ListenerId::unique(),
            disposals: DisposalQueue::new(),
        }
    }

    pub fn current(&self) -> Option<&Framebuffer> {
        self.current.as_ref()
    }

    pub fn viewport(&self) -> Option<ViewRect> {
        self.viewport
    }

    pub fn handle(&self, framebuffer: &Framebuffer) -> Option<FramebufferHandle> {
        self.framebuffers.get(&framebuffer.uid()).map(|f| f.handle)
    }

    /// Screen size in device pixels, used when binding the screen without a frame
    pub fn set_screen_size(&mut self, width: u32, height: u32) {
        self.screen = (width, height);
    }

    /// Bind `framebuffer` (or the screen) and set the viewport
    pub fn bind(
        &mut self,
        backend: &mut dyn Backend,
        textures: &mut TextureSystem,
        framebuffer: Option<&Framebuffer>,
        frame: Option<ViewRect>,
    ) {
        let Some(framebuffer) = framebuffer else {
            if self.current.is_some() || !self.bound_once {
                backend.bind_framebuffer(None);
                self.current = None;
                self.bound_once = true;
            }
            let (w, h) = self.screen;
            self.set_viewport(
                backend,
                frame.unwrap_or(ViewRect::new(0, 0, w as i32, h as i32)),
            );
            return;
        };

        let uid = framebuffer.uid();
        if !self.framebuffers.contains_key(&uid) {
            self.init_framebuffer(backend, framebuffer);
        }

        if self.current.as_ref() != Some(framebuffer) || !self.bound_once {
            let handle = self.framebuffers.get(&uid).map(|f| f.handle);
            backend.bind_framebuffer(handle);
            self.current = Some(framebuffer.clone());
            self.bound_once = true;
        }

        self.validate(backend, textures, framebuffer);

        let colors: SmallVec<[BaseTexture; 1]> = framebuffer.color_textures().clone();
        for texture in &colors {
            textures.unbind(backend, texture);
        }

        self.set_viewport(
            backend,
            frame.unwrap_or(ViewRect::new(
                0,
                0,
                framebuffer.width() as i32,
                framebuffer.height() as i32,
            )),
        );
    }

    fn init_framebuffer(&mut self, backend: &mut dyn Backend, framebuffer: &Framebuffer) {
        let handle = backend.create_framebuffer();
        if !framebuffer.on_dispose().is_connected(self.listener) {
            framebuffer
                .on_dispose()
                .connect_as(self.listener, self.disposals.sink(Disposal::Framebuffer));
        }
        self.framebuffers.insert(
            framebuffer.uid(),
            GlFramebuffer {
                handle,
                dirty_id: None,
                dirty_format: None,
                dirty_size: None,
            },
        );
    }

    /// Re-attach on format change, re-allocate on size change
    fn validate(
        &mut self,
        backend: &mut dyn Backend,
        textures: &mut TextureSystem,
        framebuffer: &Framebuffer,
    ) {
        let Some(gl) = self.framebuffers.get_mut(&framebuffer.uid()) else {
            return;
        };
        if gl.dirty_id == Some(framebuffer.dirty_id()) {
            return;
        }
        gl.dirty_id = Some(framebuffer.dirty_id());

        let format_changed = gl.dirty_format != Some(framebuffer.dirty_format());
        let size_changed = gl.dirty_size != Some(framebuffer.dirty_size());
        if !format_changed && !size_changed {
            return;
        }
        gl.dirty_format = Some(framebuffer.dirty_format());
        gl.dirty_size = Some(framebuffer.dirty_size());
        let handle = gl.handle;

        // Binding allocates (or resizes) the color storage
        let mut color = SmallVec::new();
        let colors: SmallVec<[BaseTexture; 1]> = framebuffer.color_textures().clone();
        for texture in &colors {
            textures.bind(backend, Some(texture), 0);
            if let Some(h) = textures.handle(texture.uid()) {
                color.push(h);
            }
        }

        if format_changed {
            tracing::trace!("framebuffer {} attachments updated", framebuffer.uid());
        }
        backend.update_framebuffer(
            handle,
            &FramebufferDesc {
                width: framebuffer.width(),
                height: framebuffer.height(),
                color,
                depth: framebuffer.depth(),
                stencil: framebuffer.stencil(),
            },
        );
    }

    /// Give the bound framebuffer a stencil attachment if it lacks one
    pub fn force_stencil(&mut self, backend: &mut dyn Backend, textures: &mut TextureSystem) {
        let Some(framebuffer) = self.current.clone() else {
            return;
        };
        if framebuffer.stencil() {
            return;
        }
        framebuffer.enable_stencil();
        self.validate(backend, textures, &framebuffer);
    }

    pub fn set_viewport(&mut self, backend: &mut dyn Backend, viewport: ViewRect) {
        if self.viewport != Some(viewport) {
            backend.set_viewport(viewport);
            self.viewport = Some(viewport);
        }
    }

    /// Clear the bound target
    pub fn clear(&mut self, backend: &mut dyn Backend, color: Option<[f32; 4]>, depth: bool, stencil: bool) {
        backend.clear(color, depth.then_some(1.0), stencil.then_some(0));
    }

    pub fn dispose_framebuffer(&mut self, backend: &mut dyn Backend, uid: u64) {
        if let Some(gl) = self.framebuffers.remove(&uid) {
            backend.delete_framebuffer(gl.handle);
        }
        if self.current.as_ref().map(|f| f.uid()) == Some(uid) {
            self.current = None;
            self.bound_once = false;
        }
    }

    pub fn drain_disposals(&mut self, backend: &mut dyn Backend) {
        for disposal in self.disposals.drain() {
            if let Disposal::Framebuffer(uid) = disposal {
                self.dispose_framebuffer(backend, uid);
            }
        }
    }

    /// Forget cached bindings so the next bind reaches the backend
    pub fn reset(&mut self) {
        self.bound_once = false;
        self.viewport = None;
    }

    pub fn context_change(&mut self) {
        self.framebuffers.clear();
        self.current = None;
        self.disposals.drain();
        self.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Command, RecordingBackend};

    fn updates(backend: &RecordingBackend) -> Vec<FramebufferDesc> {
        backend
            .commands()
            .iter()
            .filter_map(|c| match c {
                Command::UpdateFramebuffer { desc, .. } => Some(desc.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn first_bind_attaches_storage() {
        let mut backend = RecordingBackend::default();
        let mut textures = TextureSystem::new(4, 16);
        let mut system = FramebufferSystem::new();
        let framebuffer = Framebuffer::new(32, 16);
        framebuffer.add_color_texture(0, None);

        system.bind(&mut backend, &mut textures, Some(&framebuffer), None);

        let descs = updates(&backend);
        assert_eq!(descs.len(), 1);
        assert_eq!((descs[0].width, descs[0].height), (32, 16));
        assert_eq!(descs[0].color.len(), 1);
        assert_eq!(system.viewport(), Some(ViewRect::new(0, 0, 32, 16)));
    }

    #[test]
    fn resize_revalidates_once() {
        let mut backend = RecordingBackend::default();
        let mut textures = TextureSystem::new(4, 16);
        let mut system = FramebufferSystem::new();
        let framebuffer = Framebuffer::new(8, 8);
        let color = framebuffer.add_color_texture(0, None);
        system.bind(&mut backend, &mut textures, Some(&framebuffer), None);
        backend.clear_commands();

        framebuffer.resize(16.0, 8.0);
        system.bind(&mut backend, &mut textures, Some(&framebuffer), None);
        system.bind(&mut backend, &mut textures, Some(&framebuffer), None);

        assert_eq!(updates(&backend).len(), 1);
        assert_eq!(color.real_width(), 16);
        assert_eq!(
            textures.gl_texture(color.uid()).map(|gl| gl.width),
            Some(16)
        );
    }

    #[test]
    fn color_textures_are_unbound_while_targeted() {
        let mut backend = RecordingBackend::default();
        let mut textures = TextureSystem::new(4, 16);
        let mut system = FramebufferSystem::new();
        let framebuffer = Framebuffer::new(4, 4);
        let color = framebuffer.add_color_texture(0, None);
        textures.bind(&mut backend, Some(&color), 2);

        system.bind(&mut backend, &mut textures, Some(&framebuffer), None);

        assert!(textures.bound_textures().iter().all(|b| b.is_none()));
    }

    #[test]
    fn force_stencil_adds_attachment() {
        let mut backend = RecordingBackend::default();
        let mut textures = TextureSystem::new(4, 16);
        let mut system = FramebufferSystem::new();
        let framebuffer = Framebuffer::new(4, 4);
        framebuffer.add_color_texture(0, None);
        system.bind(&mut backend, &mut textures, Some(&framebuffer), None);

        system.force_stencil(&mut backend, &mut textures);

        assert!(updates(&backend).last().map(|d| d.stencil).unwrap_or(false));
    }

    #[test]
    fn screen_rebinds_only_on_change() {
        let mut backend = RecordingBackend::default();
        let mut textures = TextureSystem::new(4, 16);
        let mut system = FramebufferSystem::new();
        system.set_screen_size(100, 50);

        system.bind(&mut backend, &mut textures, None, None);
        system.bind(&mut backend, &mut textures, None, None);

        assert_eq!(
            backend.count(|c| matches!(c, Command::BindFramebuffer(None))),
            1
        );
        assert_eq!(system.viewport(), Some(ViewRect::new(0, 0, 100, 50)));
    }
}
