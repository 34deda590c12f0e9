use std::cell::RefCell;

use super::{upload_pixels, Resource, ResourceCore};
use crate::base_texture::BaseTexture;
use crate::error::ResourceError;
use crate::upload::{GlTexture, TextureUploader};

/// Raw pixel data with explicit dimensions
#[derive(Debug)]
pub struct BufferResource {
    core: ResourceCore,
    data: RefCell<Vec<u8>>,
}

impl BufferResource {
    /// Wrap `data`; both dimensions are required
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Result<Self, ResourceError> {
        if width == 0 || height == 0 {
            return Err(ResourceError::InvalidBufferSize { width, height });
        }
        Ok(Self {
            core: ResourceCore::new(width, height),
            data: RefCell::new(data),
        })
    }

    /// Replace the pixels and announce the change
    pub fn set_data(&self, data: Vec<u8>) {
        *self.data.borrow_mut() = data;
        self.core.update();
    }

    /// Replace pixels and size together
    pub fn set_data_with_size(&self, data: Vec<u8>, width: u32, height: u32) {
        *self.data.borrow_mut() = data;
        self.core.resize(width, height);
        self.core.update();
    }

    pub fn len(&self) -> usize {
        self.data.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.borrow().is_empty()
    }
}

impl Resource for BufferResource {
    fn core(&self) -> &ResourceCore {
        &self.core
    }

    fn kind(&self) -> &'static str {
        "buffer"
    }

    fn read_pixels(&self, f: &mut dyn FnMut(&[u8], u32, u32)) -> bool {
        f(&self.data.borrow(), self.core.width(), self.core.height());
        true
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
        self.data.borrow_mut().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ResourceExt;

    #[test]
    fn requires_dimensions() {
        assert_eq!(
            BufferResource::new(vec![], 0, 4).unwrap_err(),
            ResourceError::InvalidBufferSize {
                width: 0,
                height: 4
            }
        );
    }

    #[test]
    fn valid_on_construction() {
        let r = BufferResource::new(vec![0; 64 * 64 * 4], 64, 64).unwrap();
        assert!(r.valid());
        assert_eq!(r.len(), 64 * 64 * 4);
    }

    #[test]
    fn dispose_releases_pixels() {
        let r = BufferResource::new(vec![0; 16], 2, 2).unwrap();
        r.destroy();
        assert!(r.is_empty());
    }
}
