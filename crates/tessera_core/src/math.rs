//! Points, rectangles and 2D affine matrices

use std::f32::consts::PI;

/// A 2D point
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const ZERO: Point = Point { x: 0.0, y: 0.0 };

    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// An axis-aligned rectangle
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Rectangle {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rectangle {
    pub const EMPTY: Rectangle = Rectangle {
        x: 0.0,
        y: 0.0,
        width: 0.0,
        height: 0.0,
    };

    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn left(&self) -> f32 {
        self.x
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn top(&self) -> f32 {
        self.y
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }

    pub fn contains(&self, x: f32, y: f32) -> bool {
        if self.is_empty() {
            return false;
        }
        x >= self.x && x < self.right() && y >= self.y && y < self.bottom()
    }

    /// Grow the rectangle by `pad_x`/`pad_y` on each side
    pub fn pad(&mut self, pad_x: f32, pad_y: f32) -> &mut Self {
        self.x -= pad_x;
        self.y -= pad_y;
        self.width += pad_x * 2.0;
        self.height += pad_y * 2.0;
        self
    }

    /// Clip this rectangle so it lies within `other`
    pub fn fit(&mut self, other: &Rectangle) -> &mut Self {
        let x1 = self.x.max(other.x);
        let x2 = self.right().min(other.right());
        let y1 = self.y.max(other.y);
        let y2 = self.bottom().min(other.bottom());

        self.x = x1;
        self.width = (x2 - x1).max(0.0);
        self.y = y1;
        self.height = (y2 - y1).max(0.0);
        self
    }

    /// Snap edges outwards to whole pixels at `resolution`
    ///
    /// `eps` absorbs float noise so that `2.0000001` does not round to 3.
    pub fn ceil(&mut self, resolution: f32, eps: f32) -> &mut Self {
        let x2 = ((self.right() - eps) * resolution).ceil() / resolution;
        let y2 = ((self.bottom() - eps) * resolution).ceil() / resolution;

        self.x = ((self.x + eps) * resolution).floor() / resolution;
        self.y = ((self.y + eps) * resolution).floor() / resolution;
        self.width = x2 - self.x;
        self.height = y2 - self.y;
        self
    }

    /// Expand to include `other`
    pub fn enlarge(&mut self, other: &Rectangle) -> &mut Self {
        let x1 = self.x.min(other.x);
        let x2 = self.right().max(other.right());
        let y1 = self.y.min(other.y);
        let y2 = self.bottom().max(other.bottom());

        self.x = x1;
        self.width = x2 - x1;
        self.y = y1;
        self.height = y2 - y1;
        self
    }

    pub fn intersects(&self, other: &Rectangle) -> bool {
        self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }

    /// Bounding box of this rectangle after transformation by `matrix`
    pub fn transformed(&self, matrix: &Matrix) -> Rectangle {
        let corners = [
            matrix.apply(Point::new(self.x, self.y)),
            matrix.apply(Point::new(self.right(), self.y)),
            matrix.apply(Point::new(self.right(), self.bottom())),
            matrix.apply(Point::new(self.x, self.bottom())),
        ];

        let mut min = corners[0];
        let mut max = corners[0];
        for p in &corners[1..] {
            min.x = min.x.min(p.x);
            min.y = min.y.min(p.y);
            max.x = max.x.max(p.x);
            max.y = max.y.max(p.y);
        }
        Rectangle::new(min.x, min.y, max.x - min.x, max.y - min.y)
    }
}

/// A 2D affine matrix
///
/// ```text
/// | a  c  tx |
/// | b  d  ty |
/// | 0  0  1  |
/// ```
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Matrix {
    pub a: f32,
    pub b: f32,
    pub c: f32,
    pub d: f32,
    pub tx: f32,
    pub ty: f32,
}

impl Default for Matrix {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Matrix {
    pub const IDENTITY: Matrix = Matrix {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 1.0,
        tx: 0.0,
        ty: 0.0,
    };

    pub const fn new(a: f32, b: f32, c: f32, d: f32, tx: f32, ty: f32) -> Self {
        Self { a, b, c, d, tx, ty }
    }

    pub fn translation(tx: f32, ty: f32) -> Self {
        Self::new(1.0, 0.0, 0.0, 1.0, tx, ty)
    }

    pub fn scaling(sx: f32, sy: f32) -> Self {
        Self::new(sx, 0.0, 0.0, sy, 0.0, 0.0)
    }

    pub fn rotation(angle: f32) -> Self {
        let (sin, cos) = angle.sin_cos();
        Self::new(cos, sin, -sin, cos, 0.0, 0.0)
    }

    pub fn set(&mut self, a: f32, b: f32, c: f32, d: f32, tx: f32, ty: f32) -> &mut Self {
        *self = Self::new(a, b, c, d, tx, ty);
        self
    }

    pub fn identity(&mut self) -> &mut Self {
        *self = Self::IDENTITY;
        self
    }

    pub fn translate(&mut self, x: f32, y: f32) -> &mut Self {
        self.tx += x;
        self.ty += y;
        self
    }

    pub fn scale(&mut self, x: f32, y: f32) -> &mut Self {
        self.a *= x;
        self.d *= y;
        self.c *= x;
        self.b *= y;
        self.tx *= x;
        self.ty *= y;
        self
    }

    /// `self = self * other`
    pub fn append(&mut self, other: &Matrix) -> &mut Self {
        let (a1, b1, c1, d1) = (self.a, self.b, self.c, self.d);

        self.a = other.a * a1 + other.b * c1;
        self.b = other.a * b1 + other.b * d1;
        self.c = other.c * a1 + other.d * c1;
        self.d = other.c * b1 + other.d * d1;
        self.tx = other.tx * a1 + other.ty * c1 + self.tx;
        self.ty = other.tx * b1 + other.ty * d1 + self.ty;
        self
    }

    /// `self = other * self`
    pub fn prepend(&mut self, other: &Matrix) -> &mut Self {
        let tx1 = self.tx;

        if other.a != 1.0 || other.b != 0.0 || other.c != 0.0 || other.d != 1.0 {
            let a1 = self.a;
            let c1 = self.c;

            self.a = a1 * other.a + self.b * other.c;
            self.b = a1 * other.b + self.b * other.d;
            self.c = c1 * other.a + self.d * other.c;
            self.d = c1 * other.b + self.d * other.d;
        }

        self.tx = tx1 * other.a + self.ty * other.c + other.tx;
        self.ty = tx1 * other.b + self.ty * other.d + other.ty;
        self
    }

    /// Invert in place; a singular matrix becomes identity
    pub fn invert(&mut self) -> &mut Self {
        let n = self.a * self.d - self.b * self.c;
        if n == 0.0 {
            return self.identity();
        }

        let (a1, b1, c1, d1, tx1) = (self.a, self.b, self.c, self.d, self.tx);

        self.a = d1 / n;
        self.b = -b1 / n;
        self.c = -c1 / n;
        self.d = a1 / n;
        self.tx = (c1 * self.ty - d1 * tx1) / n;
        self.ty = -(a1 * self.ty - b1 * tx1) / n;
        self
    }

    pub fn inverted(&self) -> Matrix {
        let mut m = *self;
        m.invert();
        m
    }

    pub fn apply(&self, p: Point) -> Point {
        Point::new(
            self.a * p.x + self.c * p.y + self.tx,
            self.b * p.x + self.d * p.y + self.ty,
        )
    }

    pub fn apply_inverse(&self, p: Point) -> Point {
        let id = 1.0 / (self.a * self.d + self.c * -self.b);
        Point::new(
            self.d * id * p.x
                + -self.c * id * p.y
                + (self.ty * self.c - self.tx * self.d) * id,
            self.a * id * p.y
                + -self.b * id * p.x
                + (-self.ty * self.a + self.tx * self.b) * id,
        )
    }

    /// Rotation of the x axis in radians
    pub fn rotation_angle(&self) -> f32 {
        self.b.atan2(self.a)
    }

    /// Whether the transform maps axis-aligned rectangles to axis-aligned rectangles
    ///
    /// The rotation is measured in hundredths of a degree and must be a
    /// multiple of 90 degrees; skew is rejected.
    pub fn is_axis_aligned(&self) -> bool {
        let to_hundredths = |rad: f32| (rad * (180.0 * 100.0) / PI).round() as i64;

        let rot_x = to_hundredths(self.b.atan2(self.a));
        if rot_x % 9000 != 0 {
            return false;
        }

        // y axis must stay perpendicular to x (mirroring allowed)
        let rot_y = to_hundredths(self.d.atan2(self.c));
        matches!((rot_y - rot_x).rem_euclid(36000), 9000 | 27000)
    }

    /// Column-major 3x3 representation for shader uniforms
    pub fn to_array(&self, transpose: bool) -> [f32; 9] {
        if transpose {
            [self.a, self.b, 0.0, self.c, self.d, 0.0, self.tx, self.ty, 1.0]
        } else {
            [self.a, self.c, self.tx, self.b, self.d, self.ty, 0.0, 0.0, 1.0]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f32 = 1e-5;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < EPS
    }

    #[test]
    fn rectangle_pad_and_fit() {
        let mut r = Rectangle::new(10.0, 10.0, 20.0, 20.0);
        r.pad(5.0, 5.0);
        assert_eq!(r, Rectangle::new(5.0, 5.0, 30.0, 30.0));

        r.fit(&Rectangle::new(0.0, 0.0, 20.0, 100.0));
        assert_eq!(r, Rectangle::new(5.0, 5.0, 15.0, 30.0));
    }

    #[test]
    fn rectangle_fit_disjoint_is_empty() {
        let mut r = Rectangle::new(50.0, 50.0, 10.0, 10.0);
        r.fit(&Rectangle::new(0.0, 0.0, 10.0, 10.0));
        assert!(r.is_empty());
    }

    #[test]
    fn rectangle_ceil_snaps_outward() {
        let mut r = Rectangle::new(0.3, 0.6, 10.2, 10.1);
        r.ceil(1.0, 1e-4);
        assert_eq!(r.x, 0.0);
        assert_eq!(r.y, 0.0);
        assert_eq!(r.width, 11.0);
        assert_eq!(r.height, 11.0);
    }

    #[test]
    fn matrix_invert_roundtrip() {
        let mut m = Matrix::new(2.0, 0.5, -0.25, 3.0, 10.0, -4.0);
        let p = Point::new(3.0, 7.0);
        let q = m.apply(p);
        m.invert();
        let back = m.apply(q);
        assert!(approx(back.x, p.x));
        assert!(approx(back.y, p.y));
    }

    #[test]
    fn matrix_append_composes() {
        let mut m = Matrix::translation(10.0, 0.0);
        m.append(&Matrix::scaling(2.0, 2.0));
        let p = m.apply(Point::new(1.0, 1.0));
        assert_eq!(p, Point::new(12.0, 2.0));
    }

    #[test]
    fn axis_aligned_detection() {
        assert!(Matrix::IDENTITY.is_axis_aligned());
        assert!(Matrix::rotation(PI / 2.0).is_axis_aligned());
        assert!(Matrix::rotation(PI).is_axis_aligned());
        assert!(Matrix::scaling(2.0, -3.0).is_axis_aligned());
        assert!(!Matrix::rotation(PI / 4.0).is_axis_aligned());
        assert!(!Matrix::new(1.0, 0.0, 0.5, 1.0, 0.0, 0.0).is_axis_aligned());
    }

    #[test]
    fn transformed_bounds() {
        let r = Rectangle::new(0.0, 0.0, 10.0, 20.0);
        let b = r.transformed(&Matrix::rotation(PI / 2.0));
        assert!(approx(b.x, -20.0));
        assert!(approx(b.width, 20.0));
        assert!(approx(b.height, 10.0));
    }
}
