//! Average Picture Level estimation
//!
//! Monte Carlo estimate of mean BT.709 luma over an RGBA buffer. Pixels are
//! drawn uniformly with replacement, so the result varies run to run unless
//! the estimator is built with [`AplEstimator::seeded`], which makes it fully
//! deterministic for a given seed and input.
//!
//! Channel values are accumulated as integers and weighted once at the end.
//! This is the same weighted mean as averaging per-pixel luma, and it makes a
//! uniform image come out at exactly its own luma regardless of sample count.

use crate::types::RGBA_CHANNELS;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Default number of random pixels drawn per estimate
pub const DEFAULT_NUM_SAMPLES: usize = 1000;

/// Window area the default sample count was tuned for (200x200)
pub const REFERENCE_WINDOW_AREA: u64 = 200 * 200;

const LUMA_R: f64 = 0.2126;
const LUMA_G: f64 = 0.7152;
const LUMA_B: f64 = 0.0722;

/// ITU-R BT.709 luma of one pixel
#[inline]
pub fn luma(r: f64, g: f64, b: f64) -> f64 {
    LUMA_R * r + LUMA_G * g + LUMA_B * b
}

/// Number of whole pixels actually present in `pixels` for the given dimensions
fn usable_pixels(pixels: &[u8], width: u32, height: u32) -> usize {
    let declared = width as usize * height as usize;
    declared.min(pixels.len() / RGBA_CHANNELS)
}

#[derive(Debug, Default, Clone, Copy)]
struct ChannelSums {
    r: u64,
    g: u64,
    b: u64,
    count: u64,
}

impl ChannelSums {
    #[inline]
    fn add(&mut self, pixels: &[u8], index: usize) {
        let offset = index * RGBA_CHANNELS;
        self.r += u64::from(pixels[offset]);
        self.g += u64::from(pixels[offset + 1]);
        self.b += u64::from(pixels[offset + 2]);
        self.count += 1;
    }

    fn mean_luma(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        let n = self.count as f64;
        luma(self.r as f64 / n, self.g as f64 / n, self.b as f64 / n)
    }
}

/// Stochastic APL sampler.
#[derive(Debug, Clone)]
pub struct AplEstimator {
    rng: StdRng,
    seeded: bool,
}

impl AplEstimator {
    /// Estimator drawing from OS entropy (non-deterministic)
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
            seeded: false,
        }
    }

    /// Deterministic estimator for reproducible runs and tests
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            seeded: true,
        }
    }

    /// Build from an optional seed
    pub fn from_seed(seed: Option<u64>) -> Self {
        match seed {
            Some(seed) => Self::seeded(seed),
            None => Self::new(),
        }
    }

    pub fn is_deterministic(&self) -> bool {
        self.seeded
    }

    /// Number of samples `estimate` will actually draw
    pub fn effective_samples(pixels: &[u8], width: u32, height: u32, num_samples: usize) -> usize {
        num_samples.min(usable_pixels(pixels, width, height))
    }

    /// Estimate APL of an RGBA region.
    ///
    /// Draws `min(num_samples, width * height)` pixels and returns their mean
    /// luma on the 0..=255 scale. Returns 0.0 when nothing can be sampled.
    pub fn estimate(&mut self, pixels: &[u8], width: u32, height: u32, num_samples: usize) -> f64 {
        let available = usable_pixels(pixels, width, height);
        let samples = num_samples.min(available);
        if samples == 0 {
            return 0.0;
        }

        let mut sums = ChannelSums::default();
        for _ in 0..samples {
            let index = self.rng.gen_range(0..available);
            sums.add(pixels, index);
        }
        sums.mean_luma()
    }
}

impl Default for AplEstimator {
    fn default() -> Self {
        Self::new()
    }
}

/// Exact APL over every pixel of an RGBA region
pub fn mean_luma(pixels: &[u8], width: u32, height: u32) -> f64 {
    let available = usable_pixels(pixels, width, height);
    let mut sums = ChannelSums::default();
    for index in 0..available {
        sums.add(pixels, index);
    }
    sums.mean_luma()
}

/// Scale a sample budget for windows larger than the 200x200 reference.
///
/// Smaller windows keep `base`; larger ones grow it in proportion to area.
pub fn scaled_sample_count(window_area: u64, base: usize) -> usize {
    if window_area <= REFERENCE_WINDOW_AREA {
        return base;
    }
    let scaled = (base as u64 * window_area).div_ceil(REFERENCE_WINDOW_AREA);
    usize::try_from(scaled).unwrap_or(usize::MAX)
}
