use std::cell::RefCell;

use super::{upload_pixels, Resource, ResourceCore};
use crate::base_texture::BaseTexture;
use crate::color::Color;
use crate::math::Rectangle;
use crate::upload::{GlTexture, TextureUploader};

/// A CPU-side RGBA8 surface that can be drawn into between frames
///
/// Drawing does not notify owners by itself; call [`CanvasResource::commit`]
/// once a batch of edits is done so the texture is uploaded once.
#[derive(Debug)]
pub struct CanvasResource {
    core: ResourceCore,
    pixels: RefCell<Vec<u8>>,
}

impl CanvasResource {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            core: ResourceCore::new(width, height),
            pixels: RefCell::new(vec![0; width as usize * height as usize * 4]),
        }
    }

    /// Reallocate the surface, discarding its contents
    pub fn set_size(&self, width: u32, height: u32) {
        if width == self.core.width() && height == self.core.height() {
            return;
        }
        *self.pixels.borrow_mut() = vec![0; width as usize * height as usize * 4];
        self.core.resize(width, height);
    }

    pub fn clear(&self, color: Color) {
        let px = rgba8(color);
        for chunk in self.pixels.borrow_mut().chunks_exact_mut(4) {
            chunk.copy_from_slice(&px);
        }
    }

    /// Fill `rect` (clipped to the surface) with a solid color
    pub fn fill_rect(&self, rect: Rectangle, color: Color) {
        let (w, h) = (self.core.width() as i64, self.core.height() as i64);
        let x0 = (rect.x.floor() as i64).clamp(0, w);
        let y0 = (rect.y.floor() as i64).clamp(0, h);
        let x1 = (rect.right().ceil() as i64).clamp(0, w);
        let y1 = (rect.bottom().ceil() as i64).clamp(0, h);
        let px = rgba8(color);

        let mut pixels = self.pixels.borrow_mut();
        for y in y0..y1 {
            let row = (y * w) as usize * 4;
            for x in x0..x1 {
                let i = row + x as usize * 4;
                pixels[i..i + 4].copy_from_slice(&px);
            }
        }
    }

    /// Mutate raw pixels directly
    pub fn with_pixels_mut<R>(&self, f: impl FnOnce(&mut [u8], u32, u32) -> R) -> R {
        f(
            &mut self.pixels.borrow_mut(),
            self.core.width(),
            self.core.height(),
        )
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.core.width() || y >= self.core.height() {
            return None;
        }
        let i = (y as usize * self.core.width() as usize + x as usize) * 4;
        let pixels = self.pixels.borrow();
        Some([pixels[i], pixels[i + 1], pixels[i + 2], pixels[i + 3]])
    }

    /// Publish edits to every owner
    pub fn commit(&self) {
        self.core.update();
    }
}

fn rgba8(color: Color) -> [u8; 4] {
    let c = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
    [c(color.r), c(color.g), c(color.b), c(color.a)]
}

impl Resource for CanvasResource {
    fn core(&self) -> &ResourceCore {
        &self.core
    }

    fn kind(&self) -> &'static str {
        "canvas"
    }

    fn read_pixels(&self, f: &mut dyn FnMut(&[u8], u32, u32)) -> bool {
        f(&self.pixels.borrow(), self.core.width(), self.core.height());
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
        self.pixels.borrow_mut().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_rect_clips_to_surface() {
        let canvas = CanvasResource::new(4, 4);
        canvas.fill_rect(Rectangle::new(2.0, 2.0, 10.0, 10.0), Color::WHITE);

        assert_eq!(canvas.pixel(3, 3), Some([255; 4]));
        assert_eq!(canvas.pixel(1, 1), Some([0; 4]));
        assert_eq!(canvas.pixel(4, 0), None);
    }

    #[test]
    fn set_size_notifies_once() {
        let canvas = CanvasResource::new(4, 4);
        let hits = std::rc::Rc::new(std::cell::Cell::new(0));
        let h = hits.clone();
        canvas.core().on_resize.connect(move |_| h.set(h.get() + 1));

        canvas.set_size(8, 4);
        canvas.set_size(8, 4);
        assert_eq!(hits.get(), 1);
        canvas.with_pixels_mut(|px, w, h| assert_eq!(px.len(), (w * h * 4) as usize));
    }
}
