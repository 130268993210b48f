//! Page-scoped rotation
//!
//! A rotation is opened with a graphics-state save followed by two `cm`
//! operators (rotate, then move the pivot back). Exactly one rotation can be
//! active per page: opening a new one pops the previous save first, so
//! transforms never compound.

use crate::canvas::ContentSink;
use crate::geometry::Matrix;

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct RotationContext {
    active: Option<f64>,
}

impl RotationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Angle of the rotation currently open, if any.
    pub fn active(&self) -> Option<f64> {
        self.active
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Rotate subsequent drawing by `degrees` around `pivot` (PDF points).
    /// Any active rotation is closed first; a multiple of 360 only closes.
    pub fn set(&mut self, sink: &mut ContentSink, degrees: f64, pivot: (f64, f64)) {
        self.close(sink);

        let normalized = degrees.rem_euclid(360.0);
        if normalized == 0.0 {
            return;
        }

        let (cx, cy) = pivot;
        let mut rotate = Matrix::rotation(degrees);
        rotate.0[4] = cx;
        rotate.0[5] = cy;

        sink.save_state();
        sink.concat(&rotate);
        sink.concat(&Matrix::translate(-cx, -cy));
        self.active = Some(normalized);
    }

    /// Pop the active rotation's saved state. No-op when nothing is open.
    pub fn close(&mut self, sink: &mut ContentSink) {
        if self.active.take().is_some() {
            sink.restore_state();
        }
    }
}
