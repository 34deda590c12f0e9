//! Per-context texture binding table
//!
//! Maps each [`BaseTexture`] (by uid) to its [`GlTexture`] record and mirrors
//! what sits in every texture unit. A texture is re-uploaded only when its
//! `dirty_id` differs from the record, and its sampler is re-applied only
//! when `dirty_style_id` differs.

use rustc_hash::FxHashMap;

use tessera_core::{
    BaseTexture, Disposal, DisposalQueue, GlTexture, ListenerId, MipmapMode, TextureTarget,
    TextureUpload, TextureUploader, WeakBaseTexture, WrapMode,
};

use crate::backend::{Backend, SamplerDesc, TextureHandle};

/// Routes resource uploads to a backend
pub(crate) struct BackendUploader<'a> {
    pub backend: &'a mut dyn Backend,
}

impl TextureUploader for BackendUploader<'_> {
    fn upload(&mut self, texture: &mut GlTexture, upload: &TextureUpload<'_>) {
        self.backend.upload_texture(texture.handle, upload);
        if !upload.sub_image {
            texture.width = upload.width;
            texture.height = upload.height;
            texture.format = upload.format;
            texture.pixel_type = upload.pixel_type;
        }
    }

    fn allocate_layers(&mut self, texture: &mut GlTexture, width: u32, height: u32, layers: u32) {
        self.backend.allocate_texture_layers(
            texture.handle,
            texture.format,
            texture.pixel_type,
            width,
            height,
            layers,
        );
        texture.width = width;
        texture.height = height;
        texture.layers = layers;
    }
}

struct Entry {
    gl: GlTexture,
    base: WeakBaseTexture,
    /// GC clock value when last bound
    touched: u64,
    render_target: bool,
}

/// What currently occupies a texture unit
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BoundTexture {
    pub uid: u64,
    pub target: TextureTarget,
}

pub struct TextureSystem {
    textures: FxHashMap<u64, Entry>,
    bound: Vec<Option<BoundTexture>>,
    clock: u64,
    max_anisotropy: u32,
    listener: ListenerId,
    disposals: DisposalQueue,
}

impl TextureSystem {
    pub fn new(max_units: u32, max_anisotropy: u32) -> Self {
        Self {
            textures: FxHashMap::default(),
            bound: vec![None; max_units.max(1) as usize],
            clock: 0,
            max_anisotropy,
            listener: ListenerId::unique(),
            disposals: DisposalQueue::new(),
        }
    }

    pub fn max_units(&self) -> u32 {
        self.bound.len() as u32
    }

    /// Units and what they hold
    pub fn bound_textures(&self) -> &[Option<BoundTexture>] {
        &self.bound
    }

    pub fn gl_texture(&self, uid: u64) -> Option<&GlTexture> {
        self.textures.get(&uid).map(|e| &e.gl)
    }

    pub fn handle(&self, uid: u64) -> Option<TextureHandle> {
        self.textures.get(&uid).map(|e| e.gl.handle)
    }

    /// Textures with GPU storage in this context
    pub fn managed_count(&self) -> usize {
        self.textures.len()
    }

    pub(crate) fn set_clock(&mut self, clock: u64) {
        self.clock = clock;
    }

    /// Bind `texture` to `unit`, uploading whatever changed since last time
    ///
    /// `None` binds the empty texture. Invalid textures are ignored and leave
    /// the unit as it was.
    pub fn bind(&mut self, backend: &mut dyn Backend, texture: Option<&BaseTexture>, unit: u32) {
        let Some(slot) = self.bound.get(unit as usize).copied() else {
            tracing::warn!("texture unit {} out of range ({} units)", unit, self.bound.len());
            return;
        };

        let Some(base) = texture else {
            backend.bind_texture(unit, None);
            self.bound[unit as usize] = None;
            return;
        };
        if !base.valid() {
            return;
        }

        let uid = base.uid();
        if !self.textures.contains_key(&uid) {
            self.init_texture(backend, base);
        }
        let clock = self.clock;
        let Some(entry) = self.textures.get_mut(&uid) else {
            return;
        };
        entry.touched = clock;

        if slot.map(|b| b.uid) != Some(uid) {
            backend.bind_texture(unit, Some(entry.gl.handle));
        }

        if entry.gl.dirty_id != Some(base.dirty_id()) {
            self.update_texture(backend, base);
        } else if entry.gl.dirty_style_id != Some(base.dirty_style_id()) {
            self.update_texture_style(backend, base);
        }

        self.bound[unit as usize] = Some(BoundTexture {
            uid,
            target: base.target(),
        });
    }

    /// Forget what the units hold; the next binds go to the backend
    pub fn reset(&mut self) {
        self.bound.iter_mut().for_each(|b| *b = None);
    }

    /// Replace the empty texture in every unit that holds `texture`
    pub fn unbind(&mut self, backend: &mut dyn Backend, texture: &BaseTexture) {
        self.unbind_uid(backend, texture.uid());
    }

    fn unbind_uid(&mut self, backend: &mut dyn Backend, uid: u64) {
        for (unit, slot) in self.bound.iter_mut().enumerate() {
            if slot.map(|b| b.uid) == Some(uid) {
                backend.bind_texture(unit as u32, None);
                *slot = None;
            }
        }
    }

    /// Clear units below `max_textures` holding textures plain 2D samplers
    /// cannot read
    pub fn ensure_sampler_type(&mut self, backend: &mut dyn Backend, max_textures: u32) {
        for unit in 0..(max_textures as usize).min(self.bound.len()) {
            if let Some(bound) = self.bound[unit] {
                if bound.target != TextureTarget::Texture2D {
                    backend.bind_texture(unit as u32, None);
                    self.bound[unit] = None;
                }
            }
        }
    }

    fn init_texture(&mut self, backend: &mut dyn Backend, base: &BaseTexture) {
        let handle = backend.create_texture(base.target());
        let mut gl = GlTexture::new(handle, base.target());
        gl.format = base.format();
        gl.pixel_type = base.pixel_type();

        if !base.on_dispose().is_connected(self.listener) {
            base.on_dispose()
                .connect_as(self.listener, self.disposals.sink(Disposal::Texture));
        }
        self.textures.insert(
            base.uid(),
            Entry {
                gl,
                base: base.downgrade(),
                touched: self.clock,
                render_target: base.is_render_target(),
            },
        );
    }

    /// Upload contents of `texture`, or allocate storage when there are none
    pub(crate) fn update_texture(&mut self, backend: &mut dyn Backend, base: &BaseTexture) {
        let Some(entry) = self.textures.get_mut(&base.uid()) else {
            return;
        };
        let gl = &mut entry.gl;
        if gl.target != base.target() || gl.format != base.format() {
            gl.target = base.target();
            gl.format = base.format();
            gl.pixel_type = base.pixel_type();
            gl.width = 0;
            gl.height = 0;
        }

        let uploaded = {
            let mut uploader = BackendUploader {
                backend: &mut *backend,
            };
            base.resource()
                .map(|resource| resource.upload(&mut uploader, base, gl))
                .unwrap_or(false)
        };

        if !uploaded {
            let (width, height) = (base.real_width(), base.real_height());
            if gl.width != width || gl.height != height || gl.dirty_id.is_none() {
                let upload = TextureUpload {
                    sub_image: false,
                    ..TextureUpload::image(gl, width, height, false, None)
                };
                BackendUploader {
                    backend: &mut *backend,
                }
                .upload(gl, &upload);
            }
        }

        if gl.dirty_style_id != Some(base.dirty_style_id()) {
            self.update_texture_style(backend, base);
        }
        if let Some(entry) = self.textures.get_mut(&base.uid()) {
            entry.gl.dirty_id = Some(base.dirty_id());
        }
    }

    /// Re-apply sampler state and regenerate mipmaps
    pub(crate) fn update_texture_style(&mut self, backend: &mut dyn Backend, base: &BaseTexture) {
        let max_anisotropy = self.max_anisotropy;
        let Some(entry) = self.textures.get_mut(&base.uid()) else {
            return;
        };
        let gl = &mut entry.gl;
        let pot = base.is_power_of_two();

        gl.mipmap = match base.mipmap() {
            MipmapMode::Off => false,
            MipmapMode::Pow2 => pot,
            MipmapMode::On => true,
        };
        gl.wrap_mode = if pot { base.wrap_mode() } else { WrapMode::Clamp };

        let styled = {
            let mut uploader = BackendUploader {
                backend: &mut *backend,
            };
            base.resource()
                .map(|resource| resource.style(&mut uploader, base, gl))
                .unwrap_or(false)
        };
        if !styled {
            backend.set_sampler(
                gl.handle,
                &SamplerDesc {
                    wrap_mode: gl.wrap_mode,
                    scale_mode: base.scale_mode(),
                    mipmap: gl.mipmap,
                    anisotropy: base.anisotropic_level().min(max_anisotropy),
                },
            );
            if gl.mipmap {
                backend.generate_mipmaps(gl.handle);
            }
        }
        gl.dirty_style_id = Some(base.dirty_style_id());
    }

    /// Release the GPU storage of `uid`
    pub fn destroy_texture(&mut self, backend: &mut dyn Backend, uid: u64) {
        self.unbind_uid(backend, uid);
        if let Some(entry) = self.textures.remove(&uid) {
            backend.delete_texture(entry.gl.handle);
            if let Some(base) = entry.base.upgrade() {
                base.on_dispose().disconnect(self.listener);
            }
            tracing::trace!("texture {} released", uid);
        }
    }

    /// Release storage of every texture that announced disposal
    pub fn drain_disposals(&mut self, backend: &mut dyn Backend) {
        for disposal in self.disposals.drain() {
            if let Disposal::Texture(uid) = disposal {
                self.destroy_texture(backend, uid);
            }
        }
    }

    /// Release textures not bound for more than `max_idle` clock ticks
    ///
    /// Render targets are never collected.
    pub(crate) fn unload_idle(&mut self, backend: &mut dyn Backend, max_idle: u64) -> usize {
        let clock = self.clock;
        let idle: Vec<u64> = self
            .textures
            .iter()
            .filter(|(_, e)| !e.render_target && clock.saturating_sub(e.touched) > max_idle)
            .map(|(uid, _)| *uid)
            .collect();
        for uid in &idle {
            self.destroy_texture(backend, *uid);
        }
        idle.len()
    }

    /// The old context's handles are gone; start over without touching logical textures
    pub fn context_change(&mut self) {
        for entry in self.textures.values() {
            if let Some(base) = entry.base.upgrade() {
                base.on_dispose().disconnect(self.listener);
            }
        }
        self.textures.clear();
        self.disposals.drain();
        self.reset();
    }
}
