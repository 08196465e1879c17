//! Crop position selection
//!
//! A position is a normalized offset in [0, 1] along the axis the crop cuts:
//! the horizontal axis when the image is too wide for the target ratio, the
//! vertical axis otherwise.

use crate::detect::Detection;
use serde::Serialize;

/// Axis along which a crop removes pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CropAxis {
    /// The image is too wide; columns are cut and the position is a column
    Col,
    /// The image is too tall (or exactly fits); rows are cut and the position is a row
    Row,
}

/// Determine which axis a crop of `width`×`height` to `ratio` cuts
///
/// [`CropAxis::Col`] when `floor(height · ratio) < width`.
#[must_use]
pub fn crop_axis(width: u32, height: u32, ratio: f64) -> CropAxis {
    if ((f64::from(height) * ratio) as u64) < u64::from(width) {
        CropAxis::Col
    } else {
        CropAxis::Row
    }
}

/// Ranking weight of a detection: window size times score
fn weight(detection: &Detection) -> f32 {
    detection.scale as f32 * detection.score
}

/// Pick the crop position for an image given its detections
///
/// The detection with the largest `scale · score` wins, the earliest one on
/// ties. Its centre is normalized along the crop axis. Without detections
/// the `fallback` is returned.
///
/// # Examples
/// ```
/// use covercrop::detect::Detection;
/// use covercrop::position::select_position;
///
/// let face = Detection { row: 300, col: 500, scale: 80, score: 4.0 };
/// // 1000x1500 at ratio 1.0 keeps full width, so the row decides
/// assert!((select_position(&[face], 1000, 1500, 1.0, 0.5) - 0.2).abs() < 1e-9);
/// assert!((select_position(&[], 1000, 1500, 1.0, 0.5) - 0.5).abs() < 1e-9);
/// ```
#[must_use]
pub fn select_position(
    detections: &[Detection],
    width: u32,
    height: u32,
    ratio: f64,
    fallback: f64,
) -> f64 {
    let Some(best) = detections
        .iter()
        .fold(None::<&Detection>, |best, candidate| match best {
            Some(current) if weight(candidate) <= weight(current) => Some(current),
            _ => Some(candidate),
        })
    else {
        return fallback;
    };

    match crop_axis(width, height, ratio) {
        CropAxis::Col => f64::from(best.col) / f64::from(width.max(1)),
        CropAxis::Row => f64::from(best.row) / f64::from(height.max(1)),
    }
}

/// A complete crop decision
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CropPlan {
    pub ratio: f64,
    pub position: f64,
    pub axis: CropAxis,
    /// Whether the position came from a detection rather than the fallback
    pub face_driven: bool,
}

/// Combine axis and position selection into one plan
#[must_use]
pub fn plan_crop(
    detections: &[Detection],
    width: u32,
    height: u32,
    ratio: f64,
    fallback: f64,
) -> CropPlan {
    CropPlan {
        ratio,
        position: select_position(detections, width, height, ratio, fallback),
        axis: crop_axis(width, height, ratio),
        face_driven: !detections.is_empty(),
    }
}
