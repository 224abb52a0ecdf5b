use crate::apl::{mean_luma, scaled_sample_count, AplEstimator};
use crate::commands::config::current_config;
use crate::config::SamplingConfig;
use crate::device::copy_region;
use crate::errors::ExposureError;
use crate::types::{PixelBuffer, SamplingWindow, RGBA_CHANNELS};
use crate::window::{select_checked, CenteredSquare};
use serde::{Deserialize, Serialize};
use tauri::command;

/// APL measurement of a single still frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameAplReport {
    pub width: u32,
    pub height: u32,
    pub window: SamplingWindow,
    pub samples: usize,
    /// Random-sample estimate, what the live loop would see
    pub estimated_apl: f64,
    /// Mean over every pixel in the window
    pub exact_apl: f64,
}

/// Measure a packed RGBA frame the same way the control loop does
pub fn analyze_frame(
    rgba: &[u8],
    width: u32,
    height: u32,
    sampling: &SamplingConfig,
) -> Result<FrameAplReport, ExposureError> {
    let selector = CenteredSquare::new(sampling.window_ratio);
    let window = select_checked(&selector, width, height);

    let mut region = PixelBuffer::default();
    copy_region(rgba, width, height, RGBA_CHANNELS, &window, &mut region)?;

    let requested = if sampling.scale_with_window {
        scaled_sample_count(window.area(), sampling.num_samples)
    } else {
        sampling.num_samples
    };
    let samples =
        AplEstimator::effective_samples(&region.data, region.width, region.height, requested);

    let mut estimator = AplEstimator::from_seed(sampling.seed);
    let estimated_apl = estimator.estimate(&region.data, region.width, region.height, requested);
    let exact_apl = mean_luma(&region.data, region.width, region.height);

    Ok(FrameAplReport {
        width,
        height,
        window,
        samples,
        estimated_apl,
        exact_apl,
    })
}

/// Sampling window the controller would use for a frame size
#[command]
pub async fn compute_sampling_window(
    width: u32,
    height: u32,
    window_ratio: Option<f64>,
) -> Result<SamplingWindow, String> {
    let ratio = match window_ratio {
        Some(ratio) => ratio,
        None => current_config()?.sampling.window_ratio,
    };
    Ok(select_checked(&CenteredSquare::new(ratio), width, height))
}

/// Estimate the APL of an RGBA frame supplied by the frontend
#[command]
pub async fn estimate_frame_apl(
    rgba: Vec<u8>,
    width: u32,
    height: u32,
    num_samples: Option<usize>,
    seed: Option<u64>,
) -> Result<FrameAplReport, String> {
    let mut sampling = current_config()?.sampling;
    if let Some(num_samples) = num_samples {
        sampling.num_samples = num_samples;
    }
    if seed.is_some() {
        sampling.seed = seed;
    }

    analyze_frame(&rgba, width, height, &sampling).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::synthetic_rgba_frame;

    #[test]
    fn test_analyze_uniform_frame() {
        let frame = synthetic_rgba_frame(320, 240, 90, 0);
        let sampling = SamplingConfig {
            seed: Some(3),
            ..SamplingConfig::default()
        };
        let report = analyze_frame(&frame.data, 320, 240, &sampling).unwrap();

        assert_eq!(report.window, SamplingWindow::new(136, 96, 48, 48));
        assert_eq!(report.samples, 1000);
        assert!((report.exact_apl - 90.0).abs() < 1e-9);
        assert!((report.estimated_apl - 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_analyze_caps_samples_at_window_area() {
        let frame = synthetic_rgba_frame(40, 40, 10, 0);
        let report = analyze_frame(&frame.data, 40, 40, &SamplingConfig::default()).unwrap();
        // 8x8 window
        assert_eq!(report.samples, 64);
    }

    #[test]
    fn test_analyze_rejects_tiny_frame() {
        let frame = synthetic_rgba_frame(2, 2, 10, 0);
        let result = analyze_frame(&frame.data, 2, 2, &SamplingConfig::default());
        assert!(matches!(result, Err(ExposureError::DegenerateFrame { .. })));
    }

    #[tokio::test]
    async fn test_compute_sampling_window_command() {
        let window = compute_sampling_window(1920, 1080, Some(0.2)).await.unwrap();
        assert_eq!(window, SamplingWindow::new(852, 432, 216, 216));
    }

    #[tokio::test]
    async fn test_estimate_frame_apl_reports_errors_as_strings() {
        let result = estimate_frame_apl(vec![0; 8], 100, 100, None, None).await;
        assert!(result.is_err());
    }
}
