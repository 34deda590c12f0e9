//! Boundary between resources and the GPU texture table
//!
//! Resources never talk to a graphics API directly. During upload they are
//! handed a [`TextureUploader`] and the per-context [`GlTexture`] record of the
//! base texture being uploaded, and describe their pixels with a
//! [`TextureUpload`].

use slotmap::new_key_type;

use crate::constants::{PixelFormat, PixelType, TextureTarget, WrapMode};

new_key_type! {
    /// Native texture handle owned by a backend
    pub struct TextureHandle;
}

/// Per-context record of a base texture's GPU storage
#[derive(Clone, Debug)]
pub struct GlTexture {
    pub handle: TextureHandle,
    /// Width of the allocated storage, 0 before the first upload
    pub width: u32,
    /// Height of the allocated storage, 0 before the first upload
    pub height: u32,
    /// Layer count of the allocated storage
    pub layers: u32,
    /// Content version last uploaded
    pub dirty_id: Option<u32>,
    /// Sampler state version last applied
    pub dirty_style_id: Option<u32>,
    /// Whether mipmaps were generated for the current content
    pub mipmap: bool,
    /// Wrap mode actually applied, which may be clamped for non-power-of-two sizes
    pub wrap_mode: WrapMode,
    pub format: PixelFormat,
    pub pixel_type: PixelType,
    pub target: TextureTarget,
}

impl GlTexture {
    pub fn new(handle: TextureHandle, target: TextureTarget) -> Self {
        Self {
            handle,
            width: 0,
            height: 0,
            layers: 1,
            dirty_id: None,
            dirty_style_id: None,
            mipmap: false,
            wrap_mode: WrapMode::Clamp,
            format: PixelFormat::Rgba,
            pixel_type: PixelType::UnsignedByte,
            target,
        }
    }

    /// Whether existing storage can take a sub-image update of this size
    pub fn fits(&self, width: u32, height: u32) -> bool {
        self.width == width && self.height == height
    }
}

/// One texture image upload
#[derive(Clone, Copy, Debug)]
pub struct TextureUpload<'a> {
    pub target: TextureTarget,
    /// Array layer or cube face
    pub layer: u32,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub pixel_type: PixelType,
    /// Multiply color channels by alpha while uploading
    pub premultiply: bool,
    /// Update the existing storage instead of reallocating it
    pub sub_image: bool,
    /// `None` allocates storage without contents
    pub data: Option<&'a [u8]>,
}

impl<'a> TextureUpload<'a> {
    /// A full-image upload of `data` into layer 0
    pub fn image(
        texture: &GlTexture,
        width: u32,
        height: u32,
        premultiply: bool,
        data: Option<&'a [u8]>,
    ) -> Self {
        Self {
            target: texture.target,
            layer: 0,
            width,
            height,
            format: texture.format,
            pixel_type: texture.pixel_type,
            premultiply,
            sub_image: texture.fits(width, height),
            data,
        }
    }

    pub fn with_layer(mut self, layer: u32) -> Self {
        self.layer = layer;
        self
    }

    /// Bytes a tightly packed image of this upload needs
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * self.format.channels() * self.pixel_type.size()
    }
}

/// Sink for texture uploads, implemented by the GPU texture system
pub trait TextureUploader {
    /// Upload one image into `texture`, allocating or resizing storage as needed
    ///
    /// Implementations update `texture.width`/`texture.height` when storage is
    /// (re)allocated.
    fn upload(&mut self, texture: &mut GlTexture, upload: &TextureUpload<'_>);

    /// Allocate layered storage before per-layer uploads
    fn allocate_layers(&mut self, texture: &mut GlTexture, width: u32, height: u32, layers: u32);
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    #[test]
    fn image_upload_detects_sub_image() {
        let mut handles: SlotMap<TextureHandle, ()> = SlotMap::with_key();
        let mut gl = GlTexture::new(handles.insert(()), TextureTarget::Texture2D);

        let first = TextureUpload::image(&gl, 4, 4, false, None);
        assert!(!first.sub_image);

        gl.width = 4;
        gl.height = 4;
        let second = TextureUpload::image(&gl, 4, 4, false, None);
        assert!(second.sub_image);
        assert_eq!(second.expected_len(), 64);
    }
}
