use opencv::{
    core::{Mat, Point, Scalar, Size},
    imgproc,
    prelude::*,
};

use crate::config::AnnotationConfig;
use crate::error::Result;
use crate::lifecycle::TrackSet;
use crate::track::Track;
use crate::utils::clamp_to_frame;

const COLORS: &[Scalar] = &[
    Scalar::new(255.0, 0.0, 0.0, 0.0),    // Blue
    Scalar::new(0.0, 255.0, 0.0, 0.0),    // Green
    Scalar::new(0.0, 0.0, 255.0, 0.0),    // Red
    Scalar::new(255.0, 255.0, 0.0, 0.0),  // Cyan
    Scalar::new(255.0, 0.0, 255.0, 0.0),  // Magenta
    Scalar::new(0.0, 255.0, 255.0, 0.0),  // Yellow
];

const TEXT_ORIGIN: (i32, i32) = (10, 30);
const TEXT_LINE_HEIGHT: i32 = 25;

pub fn track_color(track: &Track) -> Scalar {
    COLORS[(track.id() as usize) % COLORS.len()]
}

/// Readout for the performance sample; anything that is not a finite positive rate shows a placeholder.
pub fn format_rate(fps: f64) -> String {
    if fps.is_finite() && fps > 0.0 {
        format!("FPS: {:.1}", fps)
    } else {
        "FPS: --".to_string()
    }
}

/// Draw text with a black outline so it stays readable on any background.
pub fn draw_text(frame: &mut Mat, text: &str, org: Point, font_scale: f64, color: Scalar) -> Result<()> {
    imgproc::put_text(
        frame,
        text,
        org,
        imgproc::FONT_HERSHEY_SIMPLEX,
        font_scale,
        Scalar::new(0.0, 0.0, 0.0, 0.0),
        3,
        imgproc::LINE_8,
        false,
    )?;
    imgproc::put_text(
        frame,
        text,
        org,
        imgproc::FONT_HERSHEY_SIMPLEX,
        font_scale,
        color,
        1,
        imgproc::LINE_8,
        false,
    )?;
    Ok(())
}

/// Renders track overlays onto copies of frames.
#[derive(Debug, Clone, Default)]
pub struct Annotator {
    style: AnnotationConfig,
}

impl Annotator {
    pub fn new(style: AnnotationConfig) -> Self {
        Self { style }
    }

    /// Return a copy of `frame` with every track's trail and marker, plus the rate readout.
    /// Neither `frame` nor `tracks` is modified.
    pub fn annotate(&self, frame: &Mat, tracks: &TrackSet, fps: f64) -> Result<Mat> {
        let mut output = frame.try_clone()?;
        let size = output.size()?;

        for track in tracks.iter() {
            self.draw_track(&mut output, track, size)?;
        }
        self.draw_frame_info(&mut output, tracks.len(), fps)?;
        Ok(output)
    }

    pub fn draw_track(&self, frame: &mut Mat, track: &Track, size: Size) -> Result<()> {
        let color = track_color(track);

        let trail: Vec<Point> = track.history().iter().map(|p| clamp_to_frame(p, size)).collect();
        for pair in trail.windows(2) {
            imgproc::line(
                frame,
                pair[0],
                pair[1],
                color,
                self.style.trail_thickness,
                imgproc::LINE_8,
                0,
            )?;
        }

        let center = clamp_to_frame(&track.position(), size);
        imgproc::circle(
            frame,
            center,
            self.style.marker_radius,
            color,
            -1,
            imgproc::LINE_8,
            0,
        )?;

        if self.style.show_ids {
            imgproc::put_text(
                frame,
                &track.id().to_string(),
                Point::new(center.x + 4, center.y - 4),
                imgproc::FONT_HERSHEY_SIMPLEX,
                0.4,
                color,
                1,
                imgproc::LINE_8,
                false,
            )?;
        }
        Ok(())
    }

    pub fn draw_frame_info(&self, frame: &mut Mat, live_tracks: usize, fps: f64) -> Result<()> {
        let white = Scalar::new(255.0, 255.0, 255.0, 0.0);
        let org = Point::new(TEXT_ORIGIN.0, TEXT_ORIGIN.1);
        draw_text(frame, &format_rate(fps), org, self.style.font_scale, white)?;

        if self.style.show_track_count {
            let text = format!("Tracks: {}", live_tracks);
            let org = Point::new(TEXT_ORIGIN.0, TEXT_ORIGIN.1 + TEXT_LINE_HEIGHT);
            draw_text(frame, &text, org, self.style.font_scale, white)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencv::prelude::*;
    use crate::config::LifecycleConfig;
    use crate::lifecycle::LifecycleManager;
    use crate::test_util::{textured_frame, HEIGHT, WIDTH};
    use nalgebra::Point2;

    fn manager_with(points: Vec<Point2<f32>>) -> LifecycleManager {
        let mut manager = LifecycleManager::new(LifecycleConfig {
            min_tracks: 1,
            ..LifecycleConfig::default()
        });
        manager
            .update(&[], &[], Size::new(WIDTH, HEIGHT), move |_, _| Ok(points))
            .unwrap();
        manager
    }

    #[test]
    fn test_format_rate() {
        assert_eq!(format_rate(29.97), "FPS: 30.0");
        assert_eq!(format_rate(0.0), "FPS: --");
        assert_eq!(format_rate(-3.0), "FPS: --");
        assert_eq!(format_rate(f64::NAN), "FPS: --");
        assert_eq!(format_rate(f64::INFINITY), "FPS: --");
    }

    #[test]
    fn test_annotate_is_idempotent_and_copy_on_write() {
        let frame = textured_frame(0, 0);
        let original = frame.data_bytes().unwrap().to_vec();
        let manager = manager_with(vec![Point2::new(60.0, 70.0), Point2::new(200.0, 120.0)]);
        let annotator = Annotator::default();

        let first = annotator.annotate(&frame, manager.tracks(), 25.0).unwrap();
        let second = annotator.annotate(&frame, manager.tracks(), 25.0).unwrap();

        assert_eq!(first.data_bytes().unwrap(), second.data_bytes().unwrap());
        assert_eq!(frame.data_bytes().unwrap(), original.as_slice());
        assert_ne!(first.data_bytes().unwrap(), original.as_slice());
        assert_eq!(manager.tracks().len(), 2);
    }

    #[test]
    fn test_marker_drawn_at_track_position() {
        let frame = textured_frame(0, 0);
        let manager = manager_with(vec![Point2::new(250.0, 200.0)]);
        let annotator = Annotator::default();
        let track = manager.tracks().iter().next().unwrap();

        let output = annotator.annotate(&frame, manager.tracks(), 10.0).unwrap();

        let px = *output.at_2d::<opencv::core::Vec3b>(200, 250).unwrap();
        let color = track_color(track);
        assert_eq!(px[0] as f64, color[0]);
        assert_eq!(px[1] as f64, color[1]);
        assert_eq!(px[2] as f64, color[2]);
    }

    #[test]
    fn test_edge_positions_are_clamped() {
        let frame = textured_frame(0, 0);
        let size = Size::new(WIDTH, HEIGHT);
        let track = Track::new(1, Point2::new(WIDTH as f32 - 0.2, HEIGHT as f32 - 0.2), 5);
        let annotator = Annotator::default();

        let mut output = frame.try_clone().unwrap();
        annotator.draw_track(&mut output, &track, size).unwrap();
        assert_eq!(output.size().unwrap(), size);
    }

    #[test]
    fn test_grayscale_frames_are_annotated() {
        let gray = crate::test_util::textured_gray(0, 0);
        let manager = manager_with(vec![Point2::new(30.0, 30.0)]);
        let output = Annotator::default().annotate(&gray, manager.tracks(), f64::NAN).unwrap();

        assert_eq!(output.channels(), 1);
        assert_eq!(output.size().unwrap(), gray.size().unwrap());
    }
}
