//! Views into base textures
//!
//! A [`Texture`] selects a frame of a [`BaseTexture`], optionally rotated by
//! a dihedral group element, and caches the UV coordinates of that frame.
//! `orig` is the untrimmed size of the frame as authored; `trim` locates the
//! packed pixels inside it.

use std::cell::{Ref, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::base_texture::{BaseTexture, BaseTextureOptions};
use crate::error::{FrameOverflow, Result, TextureError};
use crate::group_d8;
use crate::math::{Point, Rectangle};
use crate::resource::{BufferResource, Resource};
use crate::signal::{ListenerId, Signal};

/// UV coordinates of a frame's four corners, clockwise from top-left
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TextureUvs {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub x3: f32,
    pub y3: f32,
}

impl Default for TextureUvs {
    fn default() -> Self {
        Self {
            x0: 0.0,
            y0: 0.0,
            x1: 1.0,
            y1: 0.0,
            x2: 1.0,
            y2: 1.0,
            x3: 0.0,
            y3: 1.0,
        }
    }
}

impl TextureUvs {
    /// Compute UVs for `frame` inside a `tw` x `th` base texture
    pub fn set(&mut self, frame: &Rectangle, tw: f32, th: f32, rotate: u8) {
        if rotate != 0 {
            let w2 = frame.width / 2.0 / tw;
            let h2 = frame.height / 2.0 / th;
            let cx = frame.x / tw + w2;
            let cy = frame.y / th + h2;

            // walk the corners from north-west, a quarter turn at a time
            let mut r = group_d8::add(rotate, group_d8::NW);
            let mut corners = [(0.0f32, 0.0f32); 4];
            for corner in corners.iter_mut() {
                *corner = (
                    cx + w2 * group_d8::ux(r) as f32,
                    cy + h2 * group_d8::uy(r) as f32,
                );
                r = group_d8::add(r, 2);
            }

            [
                (self.x0, self.y0),
                (self.x1, self.y1),
                (self.x2, self.y2),
                (self.x3, self.y3),
            ] = corners;
        } else {
            self.x0 = frame.x / tw;
            self.y0 = frame.y / th;
            self.x1 = (frame.x + frame.width) / tw;
            self.y1 = frame.y / th;
            self.x2 = (frame.x + frame.width) / tw;
            self.y2 = (frame.y + frame.height) / th;
            self.x3 = frame.x / tw;
            self.y3 = (frame.y + frame.height) / th;
        }
    }

    pub fn to_array(&self) -> [f32; 8] {
        [
            self.x0, self.y0, self.x1, self.y1, self.x2, self.y2, self.x3, self.y3,
        ]
    }
}

/// Optional parts of a texture view
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TextureOptions {
    /// `None` views the whole base texture and follows its size
    pub frame: Option<Rectangle>,
    pub orig: Option<Rectangle>,
    pub trim: Option<Rectangle>,
    /// Dihedral group element; must be even
    pub rotate: u8,
    pub default_anchor: Point,
}

#[derive(Debug)]
struct State {
    frame: Rectangle,
    /// `None` means the frame itself
    orig: Option<Rectangle>,
    trim: Option<Rectangle>,
    rotate: u8,
    no_frame: bool,
    valid: bool,
    uvs: TextureUvs,
    update_id: u32,
    default_anchor: Point,
    destroyed: bool,
}

struct Inner {
    listener: ListenerId,
    base: BaseTexture,
    state: RefCell<State>,
    on_update: Signal<Texture>,
}

/// Shared handle to a texture view
#[derive(Clone)]
pub struct Texture(Rc<Inner>);

impl PartialEq for Texture {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Texture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.0.state.borrow();
        f.debug_struct("Texture")
            .field("base", &self.0.base.uid())
            .field("frame", &s.frame)
            .field("rotate", &s.rotate)
            .field("valid", &s.valid)
            .finish()
    }
}

fn check_rotation(rotate: u8) -> Result<()> {
    if !group_d8::is_valid(rotate) {
        return Err(TextureError::InvalidRotation(rotate));
    }
    if rotate % 2 != 0 {
        return Err(TextureError::DiamondUvs(rotate));
    }
    Ok(())
}

fn check_frame(frame: &Rectangle, base: &BaseTexture) -> Result<()> {
    let (bw, bh) = (base.width(), base.height());
    let overflow_x = frame.x + frame.width - bw;
    let overflow_y = frame.y + frame.height - bh;

    let overflow = FrameOverflow {
        x: (overflow_x > 0.0).then_some(overflow_x),
        y: (overflow_y > 0.0).then_some(overflow_y),
    };
    if overflow.x.is_some() || overflow.y.is_some() {
        return Err(TextureError::FrameOutOfBounds(overflow));
    }
    Ok(())
}

impl Texture {
    pub fn new(base: BaseTexture, options: TextureOptions) -> Result<Self> {
        check_rotation(options.rotate)?;

        let frame = options.frame;
        let texture = Self::construct(base, options);
        if let Some(frame) = frame {
            if texture.0.base.valid() {
                texture.set_frame(frame)?;
            }
        }
        Ok(texture)
    }

    fn construct(base: BaseTexture, options: TextureOptions) -> Self {
        let no_frame = options.frame.is_none();
        let frame = options
            .frame
            .unwrap_or_else(|| Rectangle::new(0.0, 0.0, 1.0, 1.0));

        let texture = Self(Rc::new(Inner {
            listener: ListenerId::unique(),
            base: base.clone(),
            state: RefCell::new(State {
                frame,
                orig: options.orig,
                trim: options.trim,
                rotate: options.rotate,
                no_frame,
                valid: false,
                uvs: TextureUvs::default(),
                update_id: 0,
                default_anchor: options.default_anchor,
                destroyed: false,
            }),
            on_update: Signal::new(),
        }));

        if base.valid() {
            if no_frame {
                texture.base_updated();
            }
        } else {
            let weak = Rc::downgrade(&texture.0);
            base.on_loaded().connect_as(texture.0.listener, move |_| {
                if let Some(inner) = weak.upgrade() {
                    inner.base.on_loaded().disconnect(inner.listener);
                    Texture(inner).base_updated();
                }
            });
        }

        if no_frame {
            let weak: Weak<Inner> = Rc::downgrade(&texture.0);
            base.on_update().connect_as(texture.0.listener, move |_| {
                if let Some(inner) = weak.upgrade() {
                    Texture(inner).base_updated();
                }
            });
        }

        texture
    }

    /// View the whole base texture
    pub fn from_base(base: BaseTexture) -> Self {
        Self::construct(base, TextureOptions::default())
    }

    /// View one frame of `base`
    pub fn with_frame(base: BaseTexture, frame: Rectangle) -> Result<Self> {
        Self::new(
            base,
            TextureOptions {
                frame: Some(frame),
                ..Default::default()
            },
        )
    }

    /// An opaque white 16x16 texture for untextured fills and masks
    pub fn white() -> Result<Self> {
        let resource: Rc<dyn Resource> =
            Rc::new(BufferResource::new(vec![255u8; 16 * 16 * 4], 16, 16)?);
        let base = BaseTexture::new(Some(resource), BaseTextureOptions::default())?;
        Ok(Self::from_base(base))
    }

    fn state(&self) -> Ref<'_, State> {
        self.0.state.borrow()
    }

    fn base_updated(&self) {
        let no_frame = self.state().no_frame;
        if no_frame {
            if !self.0.base.valid() {
                return;
            }
            {
                let mut s = self.0.state.borrow_mut();
                s.frame.width = self.0.base.width();
                s.frame.height = self.0.base.height();
                s.valid = true;
            }
            self.update_uvs();
        } else {
            let frame = self.state().frame;
            if let Err(e) = self.set_frame(frame) {
                tracing::warn!("texture frame no longer fits its base texture: {}", e);
                self.0.state.borrow_mut().valid = false;
            }
        }
        self.0.on_update.emit(self);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    pub fn base_texture(&self) -> &BaseTexture {
        &self.0.base
    }

    pub fn frame(&self) -> Rectangle {
        self.state().frame
    }

    /// Untrimmed frame
    pub fn orig(&self) -> Rectangle {
        let s = self.state();
        s.orig.unwrap_or(s.frame)
    }

    pub fn trim(&self) -> Option<Rectangle> {
        self.state().trim
    }

    pub fn rotate(&self) -> u8 {
        self.state().rotate
    }

    pub fn uvs(&self) -> TextureUvs {
        self.state().uvs
    }

    /// Incremented every time UVs are recomputed
    pub fn update_id(&self) -> u32 {
        self.state().update_id
    }

    pub fn valid(&self) -> bool {
        let s = self.state();
        s.valid && !s.destroyed && self.0.base.valid()
    }

    pub fn no_frame(&self) -> bool {
        self.state().no_frame
    }

    /// Visual width, including trimmed-away space
    pub fn width(&self) -> f32 {
        self.orig().width
    }

    /// Visual height, including trimmed-away space
    pub fn height(&self) -> f32 {
        self.orig().height
    }

    pub fn default_anchor(&self) -> Point {
        self.state().default_anchor
    }

    pub fn on_update(&self) -> &Signal<Texture> {
        &self.0.on_update
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Mutation
    // ─────────────────────────────────────────────────────────────────────────

    /// Select a new frame; it must fit inside the base texture
    pub fn set_frame(&self, frame: Rectangle) -> Result<()> {
        check_frame(&frame, &self.0.base)?;

        let valid = {
            let mut s = self.0.state.borrow_mut();
            s.frame = frame;
            s.no_frame = false;
            s.valid = frame.width > 0.0 && frame.height > 0.0 && self.0.base.valid();
            if s.trim.is_none() && s.rotate == 0 {
                s.orig = None;
            }
            s.valid
        };

        if valid {
            self.update_uvs();
        }
        Ok(())
    }

    pub fn set_rotate(&self, rotate: u8) -> Result<()> {
        check_rotation(rotate)?;
        let valid = {
            let mut s = self.0.state.borrow_mut();
            s.rotate = rotate;
            s.valid
        };
        if valid {
            self.update_uvs();
        }
        Ok(())
    }

    pub fn set_orig(&self, orig: Option<Rectangle>) {
        self.0.state.borrow_mut().orig = orig;
    }

    pub fn set_trim(&self, trim: Option<Rectangle>) {
        self.0.state.borrow_mut().trim = trim;
    }

    pub fn set_default_anchor(&self, anchor: Point) {
        self.0.state.borrow_mut().default_anchor = anchor;
    }

    /// Recompute the cached UVs
    pub fn update_uvs(&self) {
        let (bw, bh) = (self.0.base.width(), self.0.base.height());
        let mut s = self.0.state.borrow_mut();
        let (frame, rotate) = (s.frame, s.rotate);
        s.uvs.set(&frame, bw, bh, rotate);
        s.update_id = s.update_id.wrapping_add(1);
    }

    /// Ask the base texture to re-upload its resource
    pub fn update(&self) {
        if self.0.base.resource().is_some() {
            self.0.base.update();
        }
    }

    /// Detach from the base texture, optionally destroying it
    pub fn destroy(&self, destroy_base: bool) {
        {
            let mut s = self.0.state.borrow_mut();
            if s.destroyed {
                return;
            }
            s.destroyed = true;
            s.valid = false;
        }
        self.0.base.on_update().disconnect(self.0.listener);
        self.0.base.on_loaded().disconnect(self.0.listener);
        if destroy_base {
            self.0.base.destroy();
        }
        self.0.on_update.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ResourceExt;

    fn base(w: u32, h: u32) -> (BaseTexture, Rc<BufferResource>) {
        let resource = Rc::new(BufferResource::new(vec![0; (w * h * 4) as usize], w, h).unwrap());
        let base = BaseTexture::new(Some(resource.clone()), Default::default()).unwrap();
        (base, resource)
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Frames
    // ─────────────────────────────────────────────────────────────────────────────

    #[test]
    fn whole_texture_view() {
        let (base, _) = base(64, 64);
        let texture = Texture::from_base(base);

        assert!(texture.valid());
        assert_eq!(texture.width(), 64.0);
        assert_eq!(texture.height(), 64.0);
        assert_eq!(texture.uvs(), TextureUvs::default());
    }

    #[test]
    fn whole_texture_view_follows_resize() {
        let (base, resource) = base(64, 64);
        let texture = Texture::from_base(base.clone());
        let updates = Rc::new(std::cell::Cell::new(0));
        let u = updates.clone();
        texture.on_update().connect(move |_| u.set(u.get() + 1));

        resource.set_data_with_size(vec![0; 128 * 64 * 4], 128, 64);

        assert!(updates.get() >= 1);
        assert_eq!(texture.frame().width, 128.0);
        assert_eq!(texture.width(), 128.0);
        assert!(base.is_power_of_two());
    }

    #[test]
    fn frame_uvs_map_linearly() {
        let (base, _) = base(200, 100);
        let frame = Rectangle::new(20.0, 10.0, 50.0, 40.0);
        let texture = Texture::with_frame(base, frame).unwrap();
        let uvs = texture.uvs();

        assert_eq!((uvs.x0, uvs.y0), (20.0 / 200.0, 10.0 / 100.0));
        assert_eq!((uvs.x1, uvs.y1), (70.0 / 200.0, 10.0 / 100.0));
        assert_eq!((uvs.x2, uvs.y2), (70.0 / 200.0, 50.0 / 100.0));
        assert_eq!((uvs.x3, uvs.y3), (20.0 / 200.0, 50.0 / 100.0));
    }

    #[test]
    fn frame_overflow_reports_axis() {
        let (base, _) = base(100, 100);
        let texture = Texture::from_base(base);

        let err = texture
            .set_frame(Rectangle::new(90.0, 0.0, 20.0, 10.0))
            .unwrap_err();
        assert_eq!(
            err,
            TextureError::FrameOutOfBounds(FrameOverflow {
                x: Some(10.0),
                y: None
            })
        );

        let err = texture
            .set_frame(Rectangle::new(90.0, 95.0, 20.0, 10.0))
            .unwrap_err();
        assert_eq!(
            err,
            TextureError::FrameOutOfBounds(FrameOverflow {
                x: Some(10.0),
                y: Some(5.0)
            })
        );

        assert!(texture.set_frame(Rectangle::new(0.0, 0.0, 100.0, 100.0)).is_ok());
    }

    #[test]
    fn update_id_increments_per_uv_update() {
        let (base, _) = base(16, 16);
        let texture = Texture::from_base(base);
        let before = texture.update_id();
        texture.update_uvs();
        texture.update_uvs();
        assert_eq!(texture.update_id(), before + 2);
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Rotation
    // ─────────────────────────────────────────────────────────────────────────────

    #[test]
    fn odd_rotation_is_rejected() {
        let (base, _) = base(16, 16);
        let err = Texture::new(
            base.clone(),
            TextureOptions {
                rotate: 3,
                ..Default::default()
            },
        )
        .unwrap_err();
        assert_eq!(err, TextureError::DiamondUvs(3));

        let texture = Texture::from_base(base);
        assert_eq!(texture.set_rotate(16), Err(TextureError::InvalidRotation(16)));
    }

    #[test]
    fn quarter_turn_rotates_corners() {
        let (base, _) = base(100, 100);
        let texture = Texture::new(
            base,
            TextureOptions {
                frame: Some(Rectangle::new(0.0, 0.0, 50.0, 100.0)),
                rotate: group_d8::S,
                ..Default::default()
            },
        )
        .unwrap();
        let uvs = texture.uvs();

        // top-left of the sprite samples the top-right of the frame
        assert_eq!((uvs.x0, uvs.y0), (0.5, 0.0));
        assert_eq!((uvs.x1, uvs.y1), (0.5, 1.0));
        assert_eq!((uvs.x2, uvs.y2), (0.0, 1.0));
        assert_eq!((uvs.x3, uvs.y3), (0.0, 0.0));
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Trim and loading
    // ─────────────────────────────────────────────────────────────────────────────

    #[test]
    fn trimmed_texture_reports_orig_size() {
        let (base, _) = base(64, 64);
        let texture = Texture::new(
            base,
            TextureOptions {
                frame: Some(Rectangle::new(0.0, 0.0, 20.0, 20.0)),
                orig: Some(Rectangle::new(0.0, 0.0, 32.0, 32.0)),
                trim: Some(Rectangle::new(6.0, 6.0, 20.0, 20.0)),
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(texture.width(), 32.0);
        assert_eq!(texture.frame().width, 20.0);
    }

    #[test]
    fn becomes_valid_when_base_loads() {
        let base = BaseTexture::new(None, Default::default()).unwrap();
        let texture = Texture::from_base(base.clone());
        assert!(!texture.valid());

        base.set_size(32.0, 16.0, None);
        assert!(texture.valid());
        assert_eq!(texture.width(), 32.0);
        assert!(base.on_loaded().is_empty());
    }

    #[test]
    fn destroy_detaches_from_base() {
        let (base, resource) = base(8, 8);
        let texture = Texture::from_base(base.clone());
        assert_eq!(base.on_update().len(), 1);
        texture.destroy(false);
        assert!(base.on_update().is_empty());
        assert!(!resource.destroyed());
    }
}
