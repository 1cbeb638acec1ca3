//! Perceptual pixel comparison
//!
//! Every pixel pair is classified as matching or differing using a YIQ colour
//! distance, and the score is the percentage of matching pixels. Pixels that
//! look like anti-aliasing artefacts in either image are not counted as
//! differences unless [`CompareOptions::include_aa`] is set.

use crate::{CompareOptions, Error, Result};
use image::{ImageFormat, RgbaImage};
use std::path::Path;

/// Largest possible YIQ delta between two colours
const MAX_YIQ_DELTA: f64 = 35215.0;

/// Outcome of comparing two equally sized images
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Comparison {
    pub width: u32,
    pub height: u32,
    /// Pixels classified as differing
    pub diff_pixels: u64,
    /// Percentage of matching pixels, always within `0.0..=100.0`
    pub score: f64,
}

/// Decode PNG bytes into an RGBA buffer
pub fn load_png(bytes: &[u8]) -> Result<RgbaImage> {
    let img = image::load_from_memory_with_format(bytes, ImageFormat::Png)?;
    Ok(img.to_rgba8())
}

/// Read and decode a PNG file
pub async fn read_png(path: &Path) -> Result<RgbaImage> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| Error::DecodeError(format!("Failed to read {}: {}", path.display(), e)))?;
    load_png(&bytes)
}

/// Compare two PNG files. `actual` is checked against `expected`'s size.
pub async fn compare_files(actual: &Path, expected: &Path, opts: &CompareOptions) -> Result<Comparison> {
    let img_actual = read_png(actual).await?;
    let img_expected = read_png(expected).await?;
    compare_images(&img_actual, &img_expected, opts)
}

/// Classify every pixel pair and compute the similarity score
pub fn compare_images(a: &RgbaImage, b: &RgbaImage, opts: &CompareOptions) -> Result<Comparison> {
    if a.dimensions() != b.dimensions() {
        return Err(Error::DimensionMismatch {
            expected: b.dimensions(),
            actual: a.dimensions(),
        });
    }
    if !(0.0..=1.0).contains(&opts.threshold) {
        return Err(Error::ConfigError(format!("threshold {} outside 0..=1", opts.threshold)));
    }

    let (width, height) = a.dimensions();
    let total = u64::from(width) * u64::from(height);
    if total == 0 {
        return Err(Error::EmptyImage);
    }

    let diff_pixels = count_diff_pixels(a.as_raw(), b.as_raw(), width, height, opts);
    let score = ((1.0 - diff_pixels as f64 / total as f64) * 100.0).clamp(0.0, 100.0);

    Ok(Comparison {
        width,
        height,
        diff_pixels,
        score,
    })
}

fn count_diff_pixels(img1: &[u8], img2: &[u8], width: u32, height: u32, opts: &CompareOptions) -> u64 {
    if img1 == img2 {
        return 0;
    }

    let max_delta = MAX_YIQ_DELTA * opts.threshold * opts.threshold;
    let mut diff = 0u64;

    for y in 0..height {
        for x in 0..width {
            let pos = pixel_offset(x, y, width);
            let delta = color_delta(img1, img2, pos, pos, false);

            if delta.abs() > max_delta {
                let aa = !opts.include_aa
                    && (antialiased(img1, x, y, width, height, img2)
                        || antialiased(img2, x, y, width, height, img1));
                if !aa {
                    diff += 1;
                }
            }
        }
    }

    diff
}

#[inline]
fn pixel_offset(x: u32, y: u32, width: u32) -> usize {
    (y as usize * width as usize + x as usize) * 4
}

/// Whether the pixel at (x1, y1) in `img` looks like an anti-aliased edge:
/// its neighbours span both darker and brighter luminance, and the extreme
/// neighbour sits inside a flat region in both images.
fn antialiased(img: &[u8], x1: u32, y1: u32, width: u32, height: u32, img2: &[u8]) -> bool {
    let x0 = x1.saturating_sub(1);
    let y0 = y1.saturating_sub(1);
    let x2 = (x1 + 1).min(width - 1);
    let y2 = (y1 + 1).min(height - 1);
    let pos = pixel_offset(x1, y1, width);

    let mut zeroes = u32::from(x1 == x0 || x1 == x2 || y1 == y0 || y1 == y2);
    let mut min = 0.0;
    let mut max = 0.0;
    let mut min_at = (0, 0);
    let mut max_at = (0, 0);

    for x in x0..=x2 {
        for y in y0..=y2 {
            if x == x1 && y == y1 {
                continue;
            }

            let delta = color_delta(img, img, pos, pixel_offset(x, y, width), true);
            if delta == 0.0 {
                zeroes += 1;
                if zeroes > 2 {
                    return false;
                }
            } else if delta < min {
                min = delta;
                min_at = (x, y);
            } else if delta > max {
                max = delta;
                max_at = (x, y);
            }
        }
    }

    if min == 0.0 || max == 0.0 {
        return false;
    }

    (has_many_siblings(img, min_at.0, min_at.1, width, height)
        && has_many_siblings(img2, min_at.0, min_at.1, width, height))
        || (has_many_siblings(img, max_at.0, max_at.1, width, height)
            && has_many_siblings(img2, max_at.0, max_at.1, width, height))
}

/// More than two neighbours share the exact same RGBA value
fn has_many_siblings(img: &[u8], x1: u32, y1: u32, width: u32, height: u32) -> bool {
    let x0 = x1.saturating_sub(1);
    let y0 = y1.saturating_sub(1);
    let x2 = (x1 + 1).min(width - 1);
    let y2 = (y1 + 1).min(height - 1);
    let pos = pixel_offset(x1, y1, width);
    let pixel = &img[pos..pos + 4];

    let mut zeroes = u32::from(x1 == x0 || x1 == x2 || y1 == y0 || y1 == y2);

    for x in x0..=x2 {
        for y in y0..=y2 {
            if x == x1 && y == y1 {
                continue;
            }
            let other = pixel_offset(x, y, width);
            if pixel == &img[other..other + 4] {
                zeroes += 1;
            }
            if zeroes > 2 {
                return true;
            }
        }
    }

    false
}

/// Squared YIQ distance between pixel `k` of `img1` and pixel `m` of `img2`.
/// Negative when the first pixel is brighter. With `y_only` set, returns the
/// signed luminance difference instead.
fn color_delta(img1: &[u8], img2: &[u8], k: usize, m: usize, y_only: bool) -> f64 {
    let p1 = &img1[k..k + 4];
    let p2 = &img2[m..m + 4];
    if p1 == p2 {
        return 0.0;
    }

    let (r1, g1, b1) = blend_over_white(p1);
    let (r2, g2, b2) = blend_over_white(p2);

    let y1 = rgb2y(r1, g1, b1);
    let y2 = rgb2y(r2, g2, b2);
    let y = y1 - y2;

    if y_only {
        return y;
    }

    let i = rgb2i(r1, g1, b1) - rgb2i(r2, g2, b2);
    let q = rgb2q(r1, g1, b1) - rgb2q(r2, g2, b2);
    let delta = 0.5053 * y * y + 0.299 * i * i + 0.1957 * q * q;

    if y1 > y2 {
        -delta
    } else {
        delta
    }
}

fn blend_over_white(px: &[u8]) -> (f64, f64, f64) {
    let (r, g, b, a) = (f64::from(px[0]), f64::from(px[1]), f64::from(px[2]), px[3]);
    if a == 255 {
        return (r, g, b);
    }
    let a = f64::from(a) / 255.0;
    let blend = |c: f64| 255.0 + (c - 255.0) * a;
    (blend(r), blend(g), blend(b))
}

fn rgb2y(r: f64, g: f64, b: f64) -> f64 {
    r * 0.29889531 + g * 0.58662247 + b * 0.11448223
}

fn rgb2i(r: f64, g: f64, b: f64) -> f64 {
    r * 0.59597799 - g * 0.27417610 - b * 0.32180189
}

fn rgb2q(r: f64, g: f64, b: f64) -> f64 {
    r * 0.21147017 - g * 0.52261711 + b * 0.31114694
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn solid(w: u32, h: u32, rgba: [u8; 4]) -> RgbaImage {
        RgbaImage::from_pixel(w, h, Rgba(rgba))
    }

    /// Deterministic noise so the tests never depend on a RNG crate
    fn noise(w: u32, h: u32, seed: u32) -> RgbaImage {
        let mut state = seed;
        RgbaImage::from_fn(w, h, |_, _| {
            state = state.wrapping_mul(1_103_515_245).wrapping_add(12345);
            let v = (state >> 8).to_le_bytes();
            Rgba([v[0], v[1], v[2], 255])
        })
    }

    #[test]
    fn identical_images_score_exactly_100() {
        let a = noise(64, 48, 7);
        let res = compare_images(&a, &a, &CompareOptions::default()).unwrap();
        assert_eq!(res.diff_pixels, 0);
        assert_eq!(res.score, 100.0);
    }

    #[test]
    fn maximally_different_images_score_exactly_0() {
        let black = solid(40, 30, [0, 0, 0, 255]);
        let white = solid(40, 30, [255, 255, 255, 255]);
        let res = compare_images(&black, &white, &CompareOptions::default()).unwrap();
        assert_eq!(res.diff_pixels, 1200);
        assert_eq!(res.score, 0.0);
    }

    #[test]
    fn red_versus_blue_scores_zero() {
        let red = solid(400, 300, [255, 0, 0, 255]);
        let blue = solid(400, 300, [0, 0, 255, 255]);
        let res = compare_images(&red, &blue, &CompareOptions::default()).unwrap();
        assert_eq!(res.score, 0.0);
    }

    #[test]
    fn score_is_symmetric() {
        let a = noise(50, 40, 1);
        let b = noise(50, 40, 2);
        let opts = CompareOptions::default();
        let ab = compare_images(&a, &b, &opts).unwrap();
        let ba = compare_images(&b, &a, &opts).unwrap();
        assert_eq!(ab.diff_pixels, ba.diff_pixels);
        assert_eq!(ab.score, ba.score);
    }

    #[test]
    fn score_stays_in_range() {
        for seed in 0..8 {
            let a = noise(23, 17, seed);
            let b = noise(23, 17, seed + 100);
            for include_aa in [false, true] {
                let opts = CompareOptions { threshold: 0.1, include_aa };
                let res = compare_images(&a, &b, &opts).unwrap();
                assert!((0.0..=100.0).contains(&res.score), "score {}", res.score);
                assert!(res.diff_pixels <= 23 * 17);
            }
        }
    }

    #[test]
    fn dimension_mismatch_is_an_error() {
        let a = solid(400, 300, [255, 0, 0, 255]);
        let b = solid(300, 400, [255, 0, 0, 255]);
        let err = compare_images(&a, &b, &CompareOptions::default()).unwrap_err();
        match err {
            Error::DimensionMismatch { expected, actual } => {
                assert_eq!(expected, (300, 400));
                assert_eq!(actual, (400, 300));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn empty_images_are_rejected() {
        let a = RgbaImage::new(0, 0);
        let err = compare_images(&a, &a, &CompareOptions::default()).unwrap_err();
        assert!(matches!(err, Error::EmptyImage));
    }

    #[test]
    fn small_colour_shift_is_within_tolerance() {
        let a = solid(10, 10, [200, 0, 0, 255]);
        let b = solid(10, 10, [203, 2, 1, 255]);
        let res = compare_images(&a, &b, &CompareOptions::default()).unwrap();
        assert_eq!(res.score, 100.0);

        // Zero tolerance classifies any change as a difference.
        let strict = CompareOptions { threshold: 0.0, include_aa: false };
        let res = compare_images(&a, &b, &strict).unwrap();
        assert_eq!(res.score, 0.0);
    }

    #[test]
    fn transparent_pixels_blend_over_white() {
        let clear = solid(4, 4, [0, 0, 0, 0]);
        let white = solid(4, 4, [255, 255, 255, 255]);
        let res = compare_images(&clear, &white, &CompareOptions::default()).unwrap();
        assert_eq!(res.score, 100.0);
    }

    #[test]
    fn antialiased_edge_pixel_is_ignored_unless_requested() {
        // Left half black, right half white, with a one pixel grey column
        // between them in the first image only.
        let edge = |grey: bool| {
            RgbaImage::from_fn(9, 9, move |x, _| match x {
                0..=3 => Rgba([0, 0, 0, 255]),
                4 if grey => Rgba([128, 128, 128, 255]),
                4 => Rgba([0, 0, 0, 255]),
                _ => Rgba([255, 255, 255, 255]),
            })
        };
        let a = edge(true);
        let b = edge(false);

        let res = compare_images(&a, &b, &CompareOptions::default()).unwrap();
        assert_eq!(res.diff_pixels, 0);

        let with_aa = CompareOptions { threshold: 0.1, include_aa: true };
        let res = compare_images(&a, &b, &with_aa).unwrap();
        assert_eq!(res.diff_pixels, 9);
    }

    #[test]
    fn invalid_threshold_is_rejected() {
        let a = solid(2, 2, [0, 0, 0, 255]);
        let opts = CompareOptions { threshold: -0.5, include_aa: false };
        assert!(matches!(compare_images(&a, &a, &opts), Err(Error::ConfigError(_))));
    }

    #[test]
    fn load_png_rejects_garbage() {
        let err = load_png(b"definitely not a png").unwrap_err();
        assert!(err.is_comparison_failure());
    }

    #[tokio::test]
    async fn compare_files_reads_pngs_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.png");
        let b = dir.path().join("b.png");
        solid(8, 8, [10, 20, 30, 255]).save_with_format(&a, ImageFormat::Png).unwrap();
        solid(8, 8, [10, 20, 30, 255]).save_with_format(&b, ImageFormat::Png).unwrap();

        let res = compare_files(&a, &b, &CompareOptions::default()).await.unwrap();
        assert_eq!(res.score, 100.0);

        let missing = dir.path().join("missing.png");
        let err = compare_files(&a, &missing, &CompareOptions::default()).await.unwrap_err();
        assert!(matches!(err, Error::DecodeError(_)));
    }
}
