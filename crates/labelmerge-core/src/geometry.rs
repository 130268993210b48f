//! Page geometry in document units
//!
//! Layout math runs in millimeters with a top-left origin and y growing
//! downwards. PDF points (bottom-left origin) only appear where templates are
//! imported and where placement matrices are written into content streams.

use crate::error::{LabelMergeError, Result};
use lopdf::Object;
use serde::{Deserialize, Serialize};

/// PDF points per millimeter
pub const PT_PER_MM: f64 = 72.0 / 25.4;

pub fn mm_to_pt(mm: f64) -> f64 {
    mm * PT_PER_MM
}

pub fn pt_to_mm(pt: f64) -> f64 {
    pt / PT_PER_MM
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageSize {
    pub width: f64,
    pub height: f64,
}

impl PageSize {
    /// Both dimensions must be strictly positive (and finite).
    pub fn new(width: f64, height: f64) -> Result<Self> {
        if !(width > 0.0 && height > 0.0 && width.is_finite() && height.is_finite()) {
            return Err(LabelMergeError::InvalidTemplateSize { width, height });
        }
        Ok(Self { width, height })
    }

    pub fn from_points(width_pt: f64, height_pt: f64) -> Result<Self> {
        Self::new(pt_to_mm(width_pt), pt_to_mm(height_pt))
    }

    pub fn half(&self) -> PageSize {
        PageSize {
            width: self.width / 2.0,
            height: self.height / 2.0,
        }
    }

    pub fn scaled(&self, factor: f64) -> PageSize {
        PageSize {
            width: self.width * factor,
            height: self.height * factor,
        }
    }

    pub fn to_points(&self) -> (f64, f64) {
        (mm_to_pt(self.width), mm_to_pt(self.height))
    }

    pub fn is_close_to(&self, other: &PageSize, epsilon: f64) -> bool {
        (self.width - other.width).abs() <= epsilon && (self.height - other.height).abs() <= epsilon
    }
}

/// Axis-aligned box in millimeters, top-left origin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// 2D affine transform `[a b c d e f]` as used by the PDF `cm` operator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Matrix(pub [f64; 6]);

impl Matrix {
    pub fn translate(tx: f64, ty: f64) -> Self {
        Matrix([1.0, 0.0, 0.0, 1.0, tx, ty])
    }

    pub fn scale_translate(sx: f64, sy: f64, tx: f64, ty: f64) -> Self {
        Matrix([sx, 0.0, 0.0, sy, tx, ty])
    }

    /// Rotation by `degrees` about the origin. Components within 1e-12 of zero
    /// are snapped so right angles produce exact matrices.
    pub fn rotation(degrees: f64) -> Self {
        let radians = degrees.to_radians();
        let (s, c) = (snap(radians.sin()), snap(radians.cos()));
        Matrix([c, s, -s, c, 0.0, 0.0])
    }

    /// `self` applied first, then `other`.
    pub fn then(&self, other: &Matrix) -> Matrix {
        let [a1, b1, c1, d1, e1, f1] = self.0;
        let [a2, b2, c2, d2, e2, f2] = other.0;
        Matrix([
            a1 * a2 + b1 * c2,
            a1 * b2 + b1 * d2,
            c1 * a2 + d1 * c2,
            c1 * b2 + d1 * d2,
            e1 * a2 + f1 * c2 + e2,
            e1 * b2 + f1 * d2 + f2,
        ])
    }

    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        let [a, b, c, d, e, f] = self.0;
        (a * x + c * y + e, b * x + d * y + f)
    }

    pub fn to_operands(&self) -> Vec<Object> {
        self.0.iter().map(|v| Object::Real(*v as f32)).collect()
    }
}

fn snap(value: f64) -> f64 {
    if value.abs() < 1e-12 {
        0.0
    } else {
        value
    }
}
