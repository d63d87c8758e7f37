//! Synthetic frames shared by the unit tests.

use opencv::{
    core::{Mat, Rect, Scalar, CV_8UC1, CV_8UC3},
    imgproc,
    prelude::*,
};

pub const WIDTH: i32 = 320;
pub const HEIGHT: i32 = 240;

/// Uniform grey BGR frame with no trackable texture.
pub fn uniform_frame(width: i32, height: i32) -> Mat {
    Mat::new_rows_cols_with_default(height, width, CV_8UC3, Scalar::new(90.0, 90.0, 90.0, 0.0))
        .unwrap()
}

/// BGR frame with a grid of bright blocks shifted by `(dx, dy)` pixels.
pub fn textured_frame(dx: i32, dy: i32) -> Mat {
    let mut frame =
        Mat::new_rows_cols_with_default(HEIGHT, WIDTH, CV_8UC3, Scalar::all(20.0)).unwrap();
    for i in 0..4 {
        for j in 0..3 {
            let shade = 150.0 + 30.0 * ((i + j) % 3) as f64;
            imgproc::rectangle(
                &mut frame,
                Rect::new(50 + i * 60 + dx, 50 + j * 55 + dy, 24, 24),
                Scalar::all(shade),
                -1,
                imgproc::LINE_8,
                0,
            )
            .unwrap();
        }
    }
    frame
}

/// Single-channel version of [`textured_frame`].
pub fn textured_gray(dx: i32, dy: i32) -> Mat {
    let color = textured_frame(dx, dy);
    let mut gray = Mat::default();
    imgproc::cvt_color_def(&color, &mut gray, imgproc::COLOR_BGR2GRAY).unwrap();
    gray
}

pub fn uniform_gray(width: i32, height: i32) -> Mat {
    Mat::new_rows_cols_with_default(height, width, CV_8UC1, Scalar::all(90.0)).unwrap()
}
