//! Texture-based passive liveness heuristic.
//!
//! Scores a single face crop by how much fine detail it carries. Printed
//! photos and screen replays tend to be blurrier, flatter and lower in
//! contrast than a live face at the same distance.
//!
//! Five cues, each bucketed into a sub-score and blended:
//!
//! | cue | weight |
//! |-----|--------|
//! | Laplacian variance (sharpness) | 0.30 |
//! | spread of per-channel std-dev (colour variation) | 0.20 |
//! | mean Sobel gradient magnitude (edge content) | 0.20 |
//! | std-dev of residual after 3x3 opening (high-frequency texture) | 0.15 |
//! | dynamic range (contrast) | 0.15 |
//!
//! Grayscale-only crops skip the colour cue and renormalise the rest.
//! This is a heuristic, not a certified presentation-attack detector.

use crate::frame::{FaceCrop, FaceRegion};
use crate::sensor::LivenessScorer;

const WEIGHT_LAPLACIAN: f32 = 0.30;
const WEIGHT_COLOR: f32 = 0.20;
const WEIGHT_GRADIENT: f32 = 0.20;
const WEIGHT_HIGH_FREQ: f32 = 0.15;
const WEIGHT_CONTRAST: f32 = 0.15;

/// Score returned when a crop is missing or too small to analyse.
pub const NEUTRAL_SCORE: f32 = 0.5;

/// Individual cue measurements, exposed for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextureCues {
    pub laplacian_var: f64,
    pub color_spread: Option<f64>,
    pub gradient_mean: f64,
    pub high_freq_std: f64,
    pub contrast: f64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TextureLiveness;

impl TextureLiveness {
    pub fn score_crop(&self, crop: &FaceCrop) -> f32 {
        match measure(crop) {
            Some(cues) => blend(&cues),
            None => NEUTRAL_SCORE,
        }
    }
}

impl LivenessScorer for TextureLiveness {
    fn score(&self, face: &FaceRegion) -> f32 {
        match &face.crop {
            Some(crop) => self.score_crop(crop),
            None => NEUTRAL_SCORE,
        }
    }
}

fn bucket(value: f64, edges: &[(f64, f32)], top: f32) -> f32 {
    edges
        .iter()
        .find(|(limit, _)| value < *limit)
        .map(|&(_, score)| score)
        .unwrap_or(top)
}

fn blend(cues: &TextureCues) -> f32 {
    let laplacian = bucket(cues.laplacian_var, &[(15.0, 0.2), (30.0, 0.4), (50.0, 0.6), (100.0, 0.8)], 0.95);
    let gradient = bucket(cues.gradient_mean, &[(5.0, 0.2), (15.0, 0.5), (30.0, 0.8)], 0.95);
    let high_freq = bucket(cues.high_freq_std, &[(3.0, 0.3), (8.0, 0.6)], 0.9);
    let contrast = bucket(cues.contrast, &[(0.3, 0.2), (0.5, 0.5)], 0.9);

    let mut total = WEIGHT_LAPLACIAN * laplacian
        + WEIGHT_GRADIENT * gradient
        + WEIGHT_HIGH_FREQ * high_freq
        + WEIGHT_CONTRAST * contrast;
    let mut weight = WEIGHT_LAPLACIAN + WEIGHT_GRADIENT + WEIGHT_HIGH_FREQ + WEIGHT_CONTRAST;

    if let Some(spread) = cues.color_spread {
        total += WEIGHT_COLOR * bucket(spread, &[(5.0, 0.3), (15.0, 0.6)], 0.9);
        weight += WEIGHT_COLOR;
    }

    (total / weight).clamp(0.0, 1.0)
}

/// Grayscale view with replicated borders.
struct Gray<'a> {
    px: &'a [u8],
    w: usize,
    h: usize,
}

impl Gray<'_> {
    fn at(&self, x: isize, y: isize) -> f64 {
        let x = x.clamp(0, self.w as isize - 1) as usize;
        let y = y.clamp(0, self.h as isize - 1) as usize;
        self.px[y * self.w + x] as f64
    }
}

/// Measure all cues, or `None` for crops smaller than 3x3.
pub fn measure(crop: &FaceCrop) -> Option<TextureCues> {
    if crop.is_empty() || crop.width < 3 || crop.height < 3 {
        return None;
    }
    let (w, h) = (crop.width as usize, crop.height as usize);
    let g = Gray { px: &crop.gray[..w * h], w, h };

    let mut lap = Vec::with_capacity(w * h);
    let mut grad_sum = 0.0f64;
    let mut eroded = vec![0.0f64; w * h];
    let (mut lo, mut hi) = (255.0f64, 0.0f64);

    for y in 0..h as isize {
        for x in 0..w as isize {
            let c = g.at(x, y);
            let (l, r, u, d) = (g.at(x - 1, y), g.at(x + 1, y), g.at(x, y - 1), g.at(x, y + 1));
            lap.push(l + r + u + d - 4.0 * c);

            let gx = (g.at(x + 1, y - 1) + 2.0 * r + g.at(x + 1, y + 1))
                - (g.at(x - 1, y - 1) + 2.0 * l + g.at(x - 1, y + 1));
            let gy = (g.at(x - 1, y + 1) + 2.0 * d + g.at(x + 1, y + 1))
                - (g.at(x - 1, y - 1) + 2.0 * u + g.at(x + 1, y - 1));
            grad_sum += (gx * gx + gy * gy).sqrt();

            // 3x3 elliptical element == cross
            eroded[y as usize * w + x as usize] = c.min(l).min(r).min(u).min(d);

            lo = lo.min(c);
            hi = hi.max(c);
        }
    }

    let at_eroded = |x: isize, y: isize| -> f64 {
        let x = x.clamp(0, w as isize - 1) as usize;
        let y = y.clamp(0, h as isize - 1) as usize;
        eroded[y * w + x]
    };
    let mut residual = Vec::with_capacity(w * h);
    for y in 0..h as isize {
        for x in 0..w as isize {
            let opened = at_eroded(x, y)
                .max(at_eroded(x - 1, y))
                .max(at_eroded(x + 1, y))
                .max(at_eroded(x, y - 1))
                .max(at_eroded(x, y + 1));
            residual.push(g.at(x, y) - opened);
        }
    }

    Some(TextureCues {
        laplacian_var: variance(&lap),
        color_spread: crop.rgb.as_deref().and_then(|rgb| channel_spread(rgb, w * h)),
        gradient_mean: grad_sum / (w * h) as f64,
        high_freq_std: variance(&residual).sqrt(),
        contrast: (hi - lo) / 255.0,
    })
}

fn variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n
}

/// Standard deviation of the three per-channel standard deviations.
fn channel_spread(rgb: &[u8], pixels: usize) -> Option<f64> {
    if rgb.len() < pixels * 3 {
        return None;
    }
    let stds: Vec<f64> = (0..3)
        .map(|c| {
            let channel: Vec<f64> = rgb[..pixels * 3].iter().skip(c).step_by(3).map(|&v| v as f64).collect();
            variance(&channel).sqrt()
        })
        .collect();
    Some(variance(&stds).sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BoundingBox;

    fn crop(w: u32, h: u32, f: impl Fn(u32, u32) -> u8) -> FaceCrop {
        let mut gray = Vec::with_capacity((w * h) as usize);
        for y in 0..h {
            for x in 0..w {
                gray.push(f(x, y));
            }
        }
        FaceCrop { gray, rgb: None, width: w, height: h }
    }

    #[test]
    fn test_flat_crop_scores_low() {
        let flat = crop(32, 32, |_, _| 128);
        let cues = measure(&flat).unwrap();
        assert_eq!(cues.laplacian_var, 0.0);
        assert_eq!(cues.gradient_mean, 0.0);
        assert_eq!(cues.contrast, 0.0);
        let score = TextureLiveness.score_crop(&flat);
        assert!((score - 0.21875).abs() < 1e-5, "score={score}");
    }

    #[test]
    fn test_detailed_crop_scores_high() {
        // Two-pixel stripes: sharp edges everywhere, all detail below the 3x3 opening
        let stripes = crop(32, 32, |x, _| if (x / 2) % 2 == 0 { 0 } else { 255 });
        let score = TextureLiveness.score_crop(&stripes);
        assert!(score > 0.9, "score={score}");
    }

    #[test]
    fn test_score_in_unit_range() {
        let ramp = crop(40, 30, |x, y| ((x * 6 + y * 3) % 256) as u8);
        let score = TextureLiveness.score_crop(&ramp);
        assert!((0.0..=1.0).contains(&score));
    }

    #[test]
    fn test_flat_colour_uses_colour_cue() {
        let mut flat = crop(8, 8, |_, _| 100);
        flat.rgb = Some(vec![100; 8 * 8 * 3]);
        let cues = measure(&flat).unwrap();
        assert_eq!(cues.color_spread, Some(0.0));
        // (0.06 + 0.06 + 0.04 + 0.045 + 0.03) / 1.0
        assert!((TextureLiveness.score_crop(&flat) - 0.235).abs() < 1e-5);
    }

    #[test]
    fn test_tiny_or_missing_crop_is_neutral() {
        let tiny = crop(2, 2, |_, _| 0);
        assert_eq!(TextureLiveness.score_crop(&tiny), NEUTRAL_SCORE);

        let face = FaceRegion {
            frame_sequence: 0,
            index: 0,
            bbox: BoundingBox { x: 0.0, y: 0.0, width: 1.0, height: 1.0, confidence: 1.0 },
            crop: None,
        };
        assert_eq!(TextureLiveness.score(&face), NEUTRAL_SCORE);
    }

    #[test]
    fn test_bucket_edges() {
        let edges = [(15.0, 0.2), (30.0, 0.4)];
        assert_eq!(bucket(0.0, &edges, 0.9), 0.2);
        assert_eq!(bucket(15.0, &edges, 0.9), 0.4);
        assert_eq!(bucket(30.0, &edges, 0.9), 0.9);
    }
}
