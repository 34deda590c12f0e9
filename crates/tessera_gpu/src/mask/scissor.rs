use tessera_core::{Matrix, MaskObject, Rectangle};

use super::MaskData;
use crate::backend::{Backend, ViewRect};
use crate::renderer::Systems;

/// Map a world rectangle into whole target pixels
///
/// Left untouched when `transform` rotates by anything but a multiple of 90°.
pub fn round_frame_to_pixels(
    frame: &mut Rectangle,
    resolution: f32,
    binding_source: &Rectangle,
    binding_destination: &Rectangle,
    transform: Option<&Matrix>,
) {
    if transform.is_some_and(|t| !t.is_axis_aligned()) || binding_source.is_empty() {
        return;
    }

    let mut to_target = transform.copied().unwrap_or(Matrix::IDENTITY);
    to_target
        .translate(-binding_source.x, -binding_source.y)
        .scale(
            binding_destination.width / binding_source.width,
            binding_destination.height / binding_source.height,
        )
        .translate(binding_destination.x, binding_destination.y);

    *frame = frame.transformed(&to_target);
    frame.fit(binding_destination);
    frame.x = (frame.x * resolution).round();
    frame.y = (frame.y * resolution).round();
    frame.width = (frame.width * resolution).round();
    frame.height = (frame.height * resolution).round();
}

impl Systems {
    /// Pixel rectangle of `object` in the bound target
    fn calc_scissor_rect(&self, object: &dyn MaskObject) -> Rectangle {
        let resolution = self
            .render_target
            .current()
            .map_or(self.resolution, |t| t.resolution());
        let mut rect = object.bounds();
        round_frame_to_pixels(
            &mut rect,
            resolution,
            &self.render_target.source_frame(),
            &self.render_target.destination_frame(),
            self.projection.transform.as_ref(),
        );
        rect
    }

    /// Whether `data` can be expressed as a scissor rectangle
    pub(super) fn test_scissor(&self, data: &mut MaskData) -> bool {
        let object = &data.object;
        if !object.is_fast_rect() || !object.world_transform().is_axis_aligned() {
            return false;
        }
        if self
            .projection
            .transform
            .is_some_and(|t| !t.is_axis_aligned())
        {
            return false;
        }
        let rect = self.calc_scissor_rect(&**object);
        data.scissor_rect_local = Some(rect);
        rect.width > 0.0 && rect.height > 0.0
    }

    pub(super) fn push_scissor(&mut self, backend: &mut dyn Backend) {
        let Some(top) = self.current_mask() else {
            return;
        };
        let local = match top.scissor_rect_local {
            Some(rect) => rect,
            None => self.calc_scissor_rect(&*top.object),
        };
        let mut rect = local;
        if let Some(inherited) = &top.scissor_rect {
            rect.fit(inherited);
        }

        if let Some(top) = self.current_mask_mut() {
            top.scissor_counter += 1;
            top.scissor_rect_local = Some(local);
            top.scissor_rect = Some(rect);
        }
        self.use_current_scissor(backend);
    }

    pub(super) fn pop_scissor(&mut self, backend: &mut dyn Backend) {
        self.use_current_scissor(backend);
    }

    /// Scissor the bound target's stack asks for, in backend coordinates
    fn scissor_view(&self) -> Option<ViewRect> {
        let top = self.current_mask().filter(|m| m.scissor_counter > 0)?;
        let rect = top.scissor_rect?;
        let y = match self.render_target.current() {
            Some(_) => rect.y,
            None => self.view_height() - rect.height - rect.y,
        };
        Some(ViewRect::from_rect(&Rectangle::new(rect.x, y, rect.width, rect.height)))
    }

    fn use_current_scissor(&mut self, backend: &mut dyn Backend) {
        let view = self.scissor_view();
        backend.set_scissor(view);
        self.mask.applied_scissor = view;
    }

    pub(super) fn sync_scissor(&mut self, backend: &mut dyn Backend) {
        if self.scissor_view() != self.mask.applied_scissor {
            self.use_current_scissor(backend);
        }
    }

    /// Reapply the mask scissor after something else used the scissor test
    pub(crate) fn restore_scissor(&mut self, backend: &mut dyn Backend) {
        self.use_current_scissor(backend);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_scale_into_the_destination() {
        let mut frame = Rectangle::new(10.0, 10.0, 20.0, 20.0);
        let source = Rectangle::new(0.0, 0.0, 100.0, 100.0);
        let destination = Rectangle::new(0.0, 0.0, 50.0, 50.0);

        round_frame_to_pixels(&mut frame, 2.0, &source, &destination, None);

        assert_eq!(frame, Rectangle::new(10.0, 10.0, 20.0, 20.0));
    }

    #[test]
    fn frames_are_clipped_to_the_destination() {
        let mut frame = Rectangle::new(-5.0, 40.0, 20.0, 20.0);
        let binding = Rectangle::new(0.0, 0.0, 50.0, 50.0);

        round_frame_to_pixels(&mut frame, 1.0, &binding, &binding, None);

        assert_eq!(frame, Rectangle::new(0.0, 40.0, 15.0, 10.0));
    }

    #[test]
    fn rotated_projections_leave_the_frame_alone() {
        let original = Rectangle::new(1.5, 1.5, 3.0, 3.0);
        let mut frame = original;
        let binding = Rectangle::new(0.0, 0.0, 50.0, 50.0);

        round_frame_to_pixels(&mut frame, 1.0, &binding, &binding, Some(&Matrix::rotation(0.5)));

        assert_eq!(frame, original);
    }
}
