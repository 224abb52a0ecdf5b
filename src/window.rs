//! Sampling window selection
//!
//! Maps frame dimensions to the rectangle whose luminance drives the
//! controller. The default is a centered square; any pure function that
//! keeps the window inside the frame can replace it.

use crate::types::SamplingWindow;

/// Default side of the centered square as a fraction of the shorter frame edge
pub const DEFAULT_WINDOW_RATIO: f64 = 0.2;

/// Chooses the region of a frame to sample.
///
/// Implementations must return a window inside `[0, frame_width) x [0, frame_height)`
/// and an empty window for frames with a zero dimension.
pub trait WindowSelector: Send + Sync {
    fn select(&self, frame_width: u32, frame_height: u32) -> SamplingWindow;
}

/// Centered square sized relative to the shorter frame edge
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CenteredSquare {
    ratio: f64,
}

impl CenteredSquare {
    /// Ratios outside `(0, 1]` are clamped into range
    pub fn new(ratio: f64) -> Self {
        let ratio = if ratio.is_finite() {
            ratio.clamp(0.0, 1.0)
        } else {
            DEFAULT_WINDOW_RATIO
        };
        Self { ratio }
    }

    pub fn ratio(&self) -> f64 {
        self.ratio
    }
}

impl Default for CenteredSquare {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_RATIO)
    }
}

impl WindowSelector for CenteredSquare {
    fn select(&self, frame_width: u32, frame_height: u32) -> SamplingWindow {
        if frame_width == 0 || frame_height == 0 {
            return SamplingWindow::empty();
        }

        let shorter = frame_width.min(frame_height);
        let side = ((f64::from(shorter) * self.ratio).round() as u32).min(shorter);
        if side == 0 {
            return SamplingWindow::empty();
        }

        SamplingWindow::new(
            (frame_width - side) / 2,
            (frame_height - side) / 2,
            side,
            side,
        )
    }
}

impl<F> WindowSelector for F
where
    F: Fn(u32, u32) -> SamplingWindow + Send + Sync,
{
    fn select(&self, frame_width: u32, frame_height: u32) -> SamplingWindow {
        self(frame_width, frame_height)
    }
}

/// Run a selector and drop any window that escapes the frame.
///
/// Custom selectors are untrusted; an out-of-bounds result is treated like a
/// degenerate frame and produces an empty window.
pub fn select_checked(
    selector: &dyn WindowSelector,
    frame_width: u32,
    frame_height: u32,
) -> SamplingWindow {
    let window = selector.select(frame_width, frame_height);
    if window.is_empty() {
        return SamplingWindow::empty();
    }
    if !window.fits_within(frame_width, frame_height) {
        log::warn!(
            "Window selector returned {:?} outside {}x{} frame, skipping",
            window,
            frame_width,
            frame_height
        );
        return SamplingWindow::empty();
    }
    window
}
