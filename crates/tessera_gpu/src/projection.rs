//! World-to-clip projection of the bound render target

use tessera_core::{Matrix, Rectangle};

use crate::shader::UniformGroup;

/// Name of the projection uniform in the renderer globals
pub const PROJECTION_UNIFORM: &str = "projectionMatrix";

/// Map `source` (world units) onto clip space
///
/// With `flip_y` the top of `source` lands at clip +1.
pub fn calculate_projection(source: &Rectangle, flip_y: bool) -> Matrix {
    let sign = if flip_y { -1.0 } else { 1.0 };
    let a = 2.0 / source.width;
    let d = sign * 2.0 / source.height;
    Matrix::new(a, 0.0, 0.0, d, -1.0 - source.x * a, -sign - source.y * d)
}

/// Tracks the frames of the current target and publishes the projection
#[derive(Debug, Clone)]
pub struct ProjectionSystem {
    destination_frame: Rectangle,
    source_frame: Rectangle,
    default_frame: Rectangle,
    projection_matrix: Matrix,
    /// Extra transform appended after the projection
    pub transform: Option<Matrix>,
}

impl Default for ProjectionSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl ProjectionSystem {
    pub fn new() -> Self {
        Self {
            destination_frame: Rectangle::EMPTY,
            source_frame: Rectangle::EMPTY,
            default_frame: Rectangle::EMPTY,
            projection_matrix: Matrix::IDENTITY,
            transform: None,
        }
    }

    pub fn projection_matrix(&self) -> Matrix {
        self.projection_matrix
    }

    pub fn source_frame(&self) -> Rectangle {
        self.source_frame
    }

    pub fn destination_frame(&self) -> Rectangle {
        self.destination_frame
    }

    /// Frame used when nothing else was given
    pub fn set_default_frame(&mut self, frame: Rectangle) {
        self.default_frame = frame;
    }

    /// Recompute the projection and store it in `globals`
    pub fn update(
        &mut self,
        globals: &UniformGroup,
        destination: Option<Rectangle>,
        source: Option<Rectangle>,
        flip_y: bool,
    ) {
        self.destination_frame = destination.unwrap_or(if self.destination_frame.is_empty() {
            self.default_frame
        } else {
            self.destination_frame
        });
        self.source_frame = source.unwrap_or(self.destination_frame);

        self.projection_matrix = calculate_projection(&self.source_frame, flip_y);
        if let Some(transform) = &self.transform {
            self.projection_matrix.append(transform);
        }
        globals.set(PROJECTION_UNIFORM, self.projection_matrix);
    }
}
