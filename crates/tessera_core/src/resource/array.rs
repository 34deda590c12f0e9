use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use super::{Resource, ResourceCore, ResourceExt};
use crate::base_texture::BaseTexture;
use crate::constants::{AlphaMode, TextureTarget};
use crate::error::ResourceError;
use crate::signal::ListenerId;
use crate::upload::{GlTexture, TextureUpload, TextureUploader};

/// Number of faces a cube texture needs
pub const CUBE_FACES: usize = 6;

#[derive(Default)]
struct Layer {
    resource: Option<Rc<dyn Resource>>,
    version: u32,
    uploaded: Option<u32>,
}

/// A layered resource; each layer is itself a resource of the same size
///
/// Only layers whose contents changed since the last upload are re-sent.
pub struct ArrayResource {
    core: ResourceCore,
    this: Weak<ArrayResource>,
    layers: RefCell<Vec<Layer>>,
    listener: ListenerId,
    bound: Cell<bool>,
    target: TextureTarget,
}

impl fmt::Debug for ArrayResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArrayResource")
            .field("core", &self.core)
            .field("length", &self.len())
            .field("target", &self.target)
            .finish()
    }
}

impl ArrayResource {
    /// An array with `length` empty layers
    pub fn new(length: usize) -> Rc<Self> {
        Self::with_target(length, TextureTarget::Texture2DArray)
    }

    fn with_target(length: usize, target: TextureTarget) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            core: ResourceCore::default(),
            this: this.clone(),
            layers: RefCell::new((0..length).map(|_| Layer::default()).collect()),
            listener: ListenerId::unique(),
            bound: Cell::new(false),
            target,
        })
    }

    /// An array with one layer per resource
    pub fn from_resources(resources: Vec<Rc<dyn Resource>>) -> Rc<Self> {
        let array = Self::new(resources.len());
        array.fill(resources);
        array
    }

    fn fill(&self, resources: Vec<Rc<dyn Resource>>) {
        for (index, resource) in resources.into_iter().enumerate() {
            // Indices come from the vector itself, so they are in bounds
            let _ = self.add_resource_at(resource, index);
        }
    }

    pub fn len(&self) -> usize {
        self.layers.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.borrow().is_empty()
    }

    pub fn layer(&self, index: usize) -> Option<Rc<dyn Resource>> {
        self.layers
            .borrow()
            .get(index)
            .and_then(|layer| layer.resource.clone())
    }

    /// Put `resource` into layer `index`, replacing what was there
    pub fn add_resource_at(
        &self,
        resource: Rc<dyn Resource>,
        index: usize,
    ) -> Result<(), ResourceError> {
        let length = self.len();
        if index >= length {
            return Err(ResourceError::LayerOutOfBounds { index, length });
        }

        let previous = self.layers.borrow_mut()[index].resource.replace(resource.clone());
        if let Some(previous) = previous {
            previous.core().unbind(self.listener);
        }

        let on_resize = {
            let this = self.this.clone();
            move |&(w, h): &(u32, u32)| {
                if let Some(this) = this.upgrade() {
                    this.layer_resized(index, w, h);
                }
            }
        };
        let on_update = {
            let this = self.this.clone();
            move |_: &()| {
                if let Some(this) = this.upgrade() {
                    this.layer_updated(index);
                }
            }
        };
        let on_error = {
            let this = self.this.clone();
            move |e: &ResourceError| {
                if let Some(this) = this.upgrade() {
                    this.core.fail(e.clone());
                }
            }
        };

        resource
            .core()
            .bind(self.listener, on_resize, on_update, on_error);
        self.layer_updated(index);
        Ok(())
    }

    fn layer_resized(&self, index: usize, width: u32, height: u32) {
        if !self.core.valid() && width > 0 && height > 0 {
            self.core.resize(width, height);
        }
        self.layer_updated(index);
    }

    fn layer_updated(&self, index: usize) {
        if let Some(layer) = self.layers.borrow_mut().get_mut(index) {
            layer.version = layer.version.wrapping_add(1);
        }
        self.core.update();
    }

    /// Whether a layer will be sent on the next upload
    pub fn layer_dirty(&self, index: usize) -> bool {
        self.layers
            .borrow()
            .get(index)
            .map(|l| l.uploaded != Some(l.version))
            .unwrap_or(false)
    }

    fn upload_layers(
        &self,
        uploader: &mut dyn TextureUploader,
        base: &BaseTexture,
        gl: &mut GlTexture,
    ) -> bool {
        let (width, height) = (base.real_width(), base.real_height());
        let mut layers = self.layers.borrow_mut();
        let length = layers.len() as u32;

        let fresh =
            gl.dirty_id.is_none() || !gl.fits(width, height) || gl.layers != length;
        if fresh {
            uploader.allocate_layers(gl, width, height, length);
            for layer in layers.iter_mut() {
                layer.uploaded = None;
            }
        }

        let premultiply = base.alpha_mode() == AlphaMode::Unpack;
        for (index, layer) in layers.iter_mut().enumerate() {
            let Some(resource) = layer.resource.as_ref() else {
                continue;
            };
            if layer.uploaded == Some(layer.version) || !resource.valid() {
                continue;
            }

            let mut sent = false;
            resource.read_pixels(&mut |data, w, h| {
                let upload = TextureUpload {
                    sub_image: true,
                    ..TextureUpload::image(gl, w, h, premultiply, Some(data))
                }
                .with_layer(index as u32);
                uploader.upload(gl, &upload);
                sent = true;
            });

            if sent {
                layer.uploaded = Some(layer.version);
            } else {
                tracing::debug!("array layer {} ({}) has no pixels yet", index, resource.kind());
            }
        }
        true
    }

    fn release_layers(&self) {
        for layer in self.layers.borrow_mut().iter_mut() {
            if let Some(resource) = layer.resource.take() {
                resource.core().unbind(self.listener);
            }
        }
    }
}

impl Resource for ArrayResource {
    fn core(&self) -> &ResourceCore {
        &self.core
    }

    fn kind(&self) -> &'static str {
        "array"
    }

    fn target(&self) -> Option<TextureTarget> {
        Some(self.target)
    }

    fn on_bind(&self) -> Result<(), ResourceError> {
        if self.bound.replace(true) {
            return Err(ResourceError::ArrayAlreadyBound);
        }
        Ok(())
    }

    fn on_unbind(&self) {
        self.bound.set(false);
    }

    fn upload(
        &self,
        uploader: &mut dyn TextureUploader,
        base: &BaseTexture,
        gl: &mut GlTexture,
    ) -> bool {
        self.upload_layers(uploader, base, gl)
    }

    fn dispose(&self) {
        self.release_layers();
    }
}

/// Six faces in +X, -X, +Y, -Y, +Z, -Z order
#[derive(Debug)]
pub struct CubeResource {
    faces: Rc<ArrayResource>,
}

impl CubeResource {
    pub fn new(faces: Vec<Rc<dyn Resource>>) -> Result<Self, ResourceError> {
        if faces.len() != CUBE_FACES {
            return Err(ResourceError::InvalidCubeLength(faces.len()));
        }
        let array = ArrayResource::with_target(CUBE_FACES, TextureTarget::TextureCube);
        array.fill(faces);
        Ok(Self { faces: array })
    }

    pub fn face(&self, index: usize) -> Option<Rc<dyn Resource>> {
        self.faces.layer(index)
    }
}

impl Resource for CubeResource {
    fn core(&self) -> &ResourceCore {
        self.faces.core()
    }

    fn kind(&self) -> &'static str {
        "cube"
    }

    fn target(&self) -> Option<TextureTarget> {
        Some(TextureTarget::TextureCube)
    }

    fn on_bind(&self) -> Result<(), ResourceError> {
        self.faces.on_bind()
    }

    fn on_unbind(&self) {
        self.faces.on_unbind();
    }

    fn upload(
        &self,
        uploader: &mut dyn TextureUploader,
        base: &BaseTexture,
        gl: &mut GlTexture,
    ) -> bool {
        self.faces.upload_layers(uploader, base, gl)
    }

    fn dispose(&self) {
        self.faces.release_layers();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::BufferResource;

    fn layer(size: u32) -> Rc<dyn Resource> {
        Rc::new(BufferResource::new(vec![0; (size * size * 4) as usize], size, size).unwrap())
    }

    #[test]
    fn takes_size_from_first_layer() {
        let array = ArrayResource::from_resources(vec![layer(8), layer(8)]);
        assert_eq!((array.width(), array.height()), (8, 8));
        assert!(array.layer_dirty(0));
        assert!(array.layer_dirty(1));
    }

    #[test]
    fn layer_index_is_checked() {
        let array = ArrayResource::new(2);
        let err = array.add_resource_at(layer(4), 2).unwrap_err();
        assert_eq!(err, ResourceError::LayerOutOfBounds { index: 2, length: 2 });
    }

    #[test]
    fn only_one_owner() {
        let array = ArrayResource::new(1);
        assert!(array.on_bind().is_ok());
        assert_eq!(array.on_bind(), Err(ResourceError::ArrayAlreadyBound));
        array.on_unbind();
        assert!(array.on_bind().is_ok());
    }

    #[test]
    fn cube_requires_six_faces() {
        let faces: Vec<_> = (0..5).map(|_| layer(2)).collect();
        assert_eq!(
            CubeResource::new(faces).unwrap_err(),
            ResourceError::InvalidCubeLength(5)
        );

        let faces: Vec<_> = (0..6).map(|_| layer(2)).collect();
        let cube = CubeResource::new(faces).unwrap();
        assert_eq!(cube.target(), Some(TextureTarget::TextureCube));
        assert!(cube.valid());
    }

    #[test]
    fn destroy_releases_layer_listeners() {
        let inner = layer(2);
        let array = ArrayResource::from_resources(vec![inner.clone()]);
        assert_eq!(inner.core().on_update.len(), 1);
        array.destroy();
        assert!(inner.core().on_update.is_empty());
    }
}
