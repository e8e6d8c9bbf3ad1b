//! ASCII plotting for terminal output.
//!
//! This is intentionally "dumb" (fixed-size grid), optimized for:
//! - quick visual sanity checks at the acquisition terminal
//! - deterministic output (helpful for golden tests)
//!
//! Plot elements:
//! - usable samples: `o`
//! - masked samples (saturated, outside the calibration): `x`
//! - fitted curve: `-` line

use crate::domain::{FitResult, Spectrum};
use crate::fit::fitted_curve;
use crate::io::result::SpectrumCurve;
use crate::math::linspace;

/// Render a corrected spectrum with the optional fitted curve overlaid.
pub fn render_spectrum_plot(spectrum: &Spectrum, fit: Option<&FitResult>, width: usize, height: usize) -> String {
    let points: Vec<Point> = (0..spectrum.len())
        .map(|i| Point {
            x: spectrum.wavelength()[i],
            y: spectrum.intensity()[i],
            usable: spectrum.is_usable(i),
        })
        .collect();

    let (x_min, x_max) = spectrum.wavelength_range().unwrap_or((0.0, 1.0));
    let curve = fit.map(|r| {
        let grid = linspace(x_min, x_max, width.max(2));
        let y = fitted_curve(r, &grid);
        grid.into_iter().zip(y).collect::<Vec<_>>()
    });
    render_plot(&points, curve.as_deref(), x_min, x_max, width, height)
}

/// Render a plot from a saved report curve.
pub fn render_report_curve(curve: &SpectrumCurve, width: usize, height: usize) -> String {
    let points: Vec<Point> = curve
        .wavelength
        .iter()
        .zip(&curve.corrected)
        .zip(&curve.usable)
        .filter_map(|((&x, y), &usable)| y.map(|y| Point { x, y, usable }))
        .collect();
    let curve_points: Vec<(f64, f64)> = curve
        .wavelength
        .iter()
        .zip(&curve.fitted)
        .map(|(&x, &y)| (x, y))
        .collect();

    let x_min = curve.wavelength.first().copied().unwrap_or(0.0);
    let x_max = curve.wavelength.last().copied().unwrap_or(1.0);
    render_plot(&points, Some(&curve_points), x_min, x_max, width, height)
}

struct Point {
    x: f64,
    y: f64,
    usable: bool,
}

fn render_plot(
    points: &[Point],
    curve_points: Option<&[(f64, f64)]>,
    x_min: f64,
    x_max: f64,
    width: usize,
    height: usize,
) -> String {
    let width = width.max(10);
    let height = height.max(5);
    let (x_min, x_max) = if x_max > x_min { (x_min, x_max) } else { (x_min, x_min + 1.0) };

    let (y_min, y_max) = y_range(points, curve_points).unwrap_or((0.0, 1.0));
    let (y_min, y_max) = pad_range(y_min, y_max, 0.05);

    let mut grid = vec![vec![' '; width]; height];

    // Curve first so samples overlay it.
    if let Some(curve) = curve_points {
        draw_curve(&mut grid, curve, x_min, x_max, y_min, y_max);
    }

    for p in points.iter().filter(|p| p.y.is_finite()) {
        let x = map_x(p.x, x_min, x_max, width);
        let y = map_y(p.y, y_min, y_max, height);
        grid[y][x] = if p.usable { 'o' } else { 'x' };
    }

    let mut out = String::new();
    out.push_str(&format!(
        "Plot: wavelength=[{x_min:.1}, {x_max:.1}] nm | intensity=[{y_min:.3e}, {y_max:.3e}]\n"
    ));

    for row in grid {
        out.push_str(&row.into_iter().collect::<String>());
        out.push('\n');
    }

    out
}

fn y_range(points: &[Point], curve: Option<&[(f64, f64)]>) -> Option<(f64, f64)> {
    let ys = points
        .iter()
        .map(|p| p.y)
        .chain(curve.into_iter().flatten().map(|&(_, y)| y))
        .filter(|y| y.is_finite());

    let (min_y, max_y) = ys.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), y| (lo.min(y), hi.max(y)));
    if min_y.is_finite() && max_y.is_finite() && max_y > min_y {
        Some((min_y, max_y))
    } else {
        None
    }
}

fn pad_range(min: f64, max: f64, frac: f64) -> (f64, f64) {
    let span = (max - min).abs();
    let pad = (span * frac).max(1e-12);
    (min - pad, max + pad)
}

fn map_x(x: f64, x_min: f64, x_max: f64, width: usize) -> usize {
    let width = width.max(2);
    let u = ((x - x_min) / (x_max - x_min)).clamp(0.0, 1.0);
    (u * (width as f64 - 1.0)).round() as usize
}

fn map_y(y: f64, y_min: f64, y_max: f64, height: usize) -> usize {
    let height = height.max(2);
    let u = ((y - y_min) / (y_max - y_min)).clamp(0.0, 1.0);
    // y=top is max -> row 0
    (height as f64 - 1.0 - (u * (height as f64 - 1.0))).round() as usize
}

fn draw_curve(grid: &mut [Vec<char>], curve: &[(f64, f64)], x_min: f64, x_max: f64, y_min: f64, y_max: f64) {
    if curve.len() < 2 {
        return;
    }
    let height = grid.len();
    let width = grid[0].len();

    let mut prev = None;
    for &(x, y) in curve.iter().filter(|(_, y)| y.is_finite()) {
        let col = map_x(x, x_min, x_max, width);
        let row = map_y(y, y_min, y_max, height);
        match prev {
            Some((c0, r0)) => draw_line(grid, c0, r0, col, row, '-'),
            None => grid[row][col] = '-',
        }
        prev = Some((col, row));
    }
}

/// Integer line drawing (Bresenham).
fn draw_line(grid: &mut [Vec<char>], x0: usize, y0: usize, x1: usize, y1: usize, ch: char) {
    let mut x0 = x0 as isize;
    let mut y0 = y0 as isize;
    let x1 = x1 as isize;
    let y1 = y1 as isize;

    let dx = (x1 - x0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let dy = -(y1 - y0).abs();
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;

    loop {
        if y0 >= 0
            && (y0 as usize) < grid.len()
            && x0 >= 0
            && (x0 as usize) < grid[0].len()
            && grid[y0 as usize][x0 as usize] == ' '
        {
            grid[y0 as usize][x0 as usize] = ch;
        }

        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x0 += sx;
        }
        if e2 <= dx {
            err += dx;
            y0 += sy;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SpectrumMeta;

    #[test]
    fn plot_golden_snapshot_small() {
        let s = Spectrum::new(vec![500.0, 900.0], vec![1.0, 2.0], SpectrumMeta::default()).unwrap();
        let txt = render_spectrum_plot(&s, None, 10, 5);
        let expected = concat!(
            "Plot: wavelength=[500.0, 900.0] nm | intensity=[9.500e-1, 2.050e0]\n",
            "         o\n",
            "          \n",
            "          \n",
            "          \n",
            "o         \n",
        );
        assert_eq!(txt, expected);
    }

    #[test]
    fn masked_samples_are_marked() {
        let s = Spectrum::new(vec![500.0, 700.0, 900.0], vec![1.0, 3.0, 2.0], SpectrumMeta::default())
            .unwrap()
            .with_mask(vec![true, false, true])
            .unwrap();
        let txt = render_spectrum_plot(&s, None, 11, 5);
        let lines: Vec<&str> = txt.lines().collect();
        assert_eq!(lines[1], "     x     ");
    }

    #[test]
    fn report_curve_skips_null_samples() {
        let curve = SpectrumCurve {
            wavelength: vec![500.0, 700.0, 900.0],
            corrected: vec![Some(1.0), None, Some(1.0)],
            usable: vec![true, false, true],
            fitted: vec![1.0, 1.0, 1.0],
        };
        let txt = render_report_curve(&curve, 10, 5);
        let body: String = txt.lines().skip(1).collect();
        assert!(!body.contains('x'));
        assert_eq!(body.matches('o').count(), 2);
    }
}
