use std::borrow::Cow;

use nalgebra::Point2;
use opencv::{
    core::{Mat, Point, Point2f, Size, CV_8U},
    imgproc,
    prelude::*,
};

use crate::error::{Result, TrackerError};

pub fn to_cv_point(p: &Point2<f32>) -> Point2f {
    Point2f::new(p.x, p.y)
}

pub fn from_cv_point(p: &Point2f) -> Point2<f32> {
    Point2::new(p.x, p.y)
}

/// True when `p` lies on a pixel of a frame of `size` (sub-pixel, inclusive of the last row/column).
pub fn in_bounds(p: &Point2<f32>, size: Size) -> bool {
    p.x.is_finite()
        && p.y.is_finite()
        && p.x >= 0.0
        && p.y >= 0.0
        && p.x <= (size.width - 1) as f32
        && p.y <= (size.height - 1) as f32
}

/// Round to the nearest pixel and clamp into the frame.
pub fn clamp_to_frame(p: &Point2<f32>, size: Size) -> Point {
    let max_x = (size.width - 1).max(0);
    let max_y = (size.height - 1).max(0);
    let x = if p.x.is_finite() { p.x.round() as i32 } else { 0 };
    let y = if p.y.is_finite() { p.y.round() as i32 } else { 0 };
    Point::new(x.clamp(0, max_x), y.clamp(0, max_y))
}

/// Reject frames the tracker cannot work on: empty, or not 8-bit with 1, 3 or 4 channels.
pub fn check_frame(frame: &Mat) -> Result<Size> {
    if frame.empty() || frame.rows() <= 0 || frame.cols() <= 0 {
        return Err(TrackerError::EmptyFrame);
    }
    let channels = frame.channels();
    let depth = frame.depth();
    if depth != CV_8U || !matches!(channels, 1 | 3 | 4) {
        return Err(TrackerError::UnsupportedFormat { channels, depth });
    }
    Ok(frame.size()?)
}

/// Single-channel view of `frame`, converting BGR/BGRA input.
pub fn to_gray(frame: &Mat) -> Result<Cow<'_, Mat>> {
    check_frame(frame)?;
    let code = match frame.channels() {
        1 => return Ok(Cow::Borrowed(frame)),
        3 => imgproc::COLOR_BGR2GRAY,
        _ => imgproc::COLOR_BGRA2GRAY,
    };
    let mut gray = Mat::default();
    imgproc::cvt_color_def(frame, &mut gray, code)?;
    Ok(Cow::Owned(gray))
}
