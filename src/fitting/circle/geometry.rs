//! Circle fitting in the complex plane and periodic angle helpers.
//!
//! The algebraic fit follows Chernov & Lesort, "Least squares fitting of circles", J. Math.
//! Imaging Vis. 23, 239 (2005): the circle `A0 (x^2 + y^2) + A1 x + A2 y + A3 = 0` minimizing the
//! algebraic distance under the Pratt constraint `A1^2 + A2^2 - 4 A0 A3 = 1` is the generalized
//! eigenvector of the moment matrix belonging to the smallest root of a quartic.
use crate::fitting::circle::fitstruct::Circle;
use crate::fitting::common::error::FittingError;
use crate::fitting::common::least_squares::{FitSession, SolverConfig};
use itertools::Itertools;
use nalgebra::Matrix4;
use num_complex::Complex64;
use std::f64::consts::PI;
use tracing::warn;

type Result<T> = std::result::Result<T, FittingError>;

pub const MIN_CIRCLE_POINTS: usize = 3;
const QUARTIC_MAX_ITER: usize = 100;
const QUARTIC_RTOL: f64 = 1e-12;

/// Fits a circle to points in the complex plane.
///
/// The algebraic solution is closed-form apart from a scalar Newton solve and a 4x4 SVD. With
/// `refine` set it is followed by a geometric least squares pass on `(xc, yc, r0)` and a
/// radially weighted pass on `r0`, which reduces the bias from uneven angular sampling.
///
/// Ill-conditioned input (e.g. collinear points) does not fail; the returned circle may then be
/// meaningless and a warning is logged.
///
/// # Errors
/// Will return `Err` for fewer than three points.
pub fn fit_circle(points: &[Complex64], refine: bool) -> Result<Circle> {
    if points.len() < MIN_CIRCLE_POINTS {
        Err(FittingError::InsufficientData {
            needed: MIN_CIRCLE_POINTS,
            got: points.len(),
        })?
    }
    let circle = algebraic_circle(points);
    if !refine {
        return Ok(circle);
    }
    let iterative = fit_circle_iter(points, circle, SolverConfig::default())?;
    let r0 = fit_circle_iter_radialweight(points, iterative, SolverConfig::default())?;
    Ok(Circle { r0, ..iterative })
}

pub(crate) fn algebraic_circle(points: &[Complex64]) -> Circle {
    let moments = calc_moments(points);
    let m = |i: usize, j: usize| moments[(i, j)];

    let a0 = ((m(2, 0) * m(3, 2) - m(2, 2) * m(3, 0)) * m(1, 1)
        - m(1, 2) * m(2, 0) * m(3, 1)
        - m(1, 0) * m(2, 1) * m(3, 2)
        + m(1, 0) * m(2, 2) * m(3, 1)
        + m(1, 2) * m(2, 1) * m(3, 0))
        * m(0, 3)
        + (m(0, 2) * m(2, 3) * m(3, 0) - m(0, 2) * m(2, 0) * m(3, 3)
            + m(0, 0) * m(2, 2) * m(3, 3)
            - m(0, 0) * m(2, 3) * m(3, 2))
            * m(1, 1)
        + (m(0, 1) * m(1, 3) * m(3, 0)
            - m(0, 1) * m(1, 0) * m(3, 3)
            - m(0, 0) * m(1, 3) * m(3, 1))
            * m(2, 2)
        + (-m(0, 1) * m(1, 2) * m(2, 3) - m(0, 2) * m(1, 3) * m(2, 1)) * m(3, 0)
        + ((m(2, 3) * m(3, 1) - m(2, 1) * m(3, 3)) * m(1, 2) + m(2, 1) * m(3, 2) * m(1, 3))
            * m(0, 0)
        + (m(1, 0) * m(2, 3) * m(3, 2) + m(2, 0) * (m(1, 2) * m(3, 3) - m(1, 3) * m(3, 2)))
            * m(0, 1)
        + ((m(2, 1) * m(3, 3) - m(2, 3) * m(3, 1)) * m(1, 0) + m(1, 3) * m(2, 0) * m(3, 1))
            * m(0, 2);
    let a1 = ((m(3, 0) - 2.0 * m(2, 2)) * m(1, 1) - m(1, 0) * m(3, 1)
        + m(2, 2) * m(3, 0)
        + 2.0 * m(1, 2) * m(2, 1)
        - m(2, 0) * m(3, 2))
        * m(0, 3)
        + (2.0 * m(2, 0) * m(3, 2) - m(0, 0) * m(3, 3) - 2.0 * m(2, 2) * m(3, 0)
            + 2.0 * m(0, 2) * m(2, 3))
            * m(1, 1)
        + (-m(0, 0) * m(3, 3) + 2.0 * m(0, 1) * m(1, 3) + 2.0 * m(1, 0) * m(3, 1)) * m(2, 2)
        + (-m(0, 1) * m(1, 3) + 2.0 * m(1, 2) * m(2, 1) - m(0, 2) * m(2, 3)) * m(3, 0)
        + (m(1, 3) * m(3, 1) + m(2, 3) * m(3, 2)) * m(0, 0)
        + (m(1, 0) * m(3, 3) - 2.0 * m(1, 2) * m(2, 3)) * m(0, 1)
        + (m(2, 0) * m(3, 3) - 2.0 * m(1, 3) * m(2, 1)) * m(0, 2)
        - 2.0 * m(1, 2) * m(2, 0) * m(3, 1)
        - 2.0 * m(1, 0) * m(2, 1) * m(3, 2);
    let a2 = (2.0 * m(1, 1) - m(3, 0) + 2.0 * m(2, 2)) * m(0, 3)
        + (2.0 * m(3, 0) - 4.0 * m(2, 2)) * m(1, 1)
        - 2.0 * m(2, 0) * m(3, 2)
        + 2.0 * m(2, 2) * m(3, 0)
        + m(0, 0) * m(3, 3)
        + 4.0 * m(1, 2) * m(2, 1)
        - 2.0 * m(0, 1) * m(1, 3)
        - 2.0 * m(1, 0) * m(3, 1)
        - 2.0 * m(0, 2) * m(2, 3);
    let a3 = -2.0 * m(3, 0) + 4.0 * m(1, 1) + 4.0 * m(2, 2) - 2.0 * m(0, 3);
    let a4 = -4.0;

    let eta = smallest_quartic_root([a0, a1, a2, a3, a4]);

    let mut shifted = moments;
    shifted[(3, 0)] += 2.0 * eta;
    shifted[(0, 3)] += 2.0 * eta;
    shifted[(1, 1)] -= eta;
    shifted[(2, 2)] -= eta;

    let svd = shifted.svd(false, true);
    let Some(v_t) = svd.v_t else {
        warn!("SVD of the circle moment matrix failed, returning a degenerate circle");
        return Circle {
            xc: f64::NAN,
            yc: f64::NAN,
            r0: f64::NAN,
        };
    };
    let smallest = svd
        .singular_values
        .iter()
        .position_min_by(|a, b| a.total_cmp(b))
        .unwrap_or(3);
    let a = v_t.row(smallest);

    let xc = -a[1] / (2.0 * a[0]);
    let yc = -a[2] / (2.0 * a[0]);
    // Recompute the constraint instead of assuming it equals one after the SVD
    let r0 = (a[1] * a[1] + a[2] * a[2] - 4.0 * a[0] * a[3]).sqrt() / (2.0 * a[0].abs());

    let circle = Circle { xc, yc, r0 };
    if !circle.is_finite() || r0 <= 0.0 {
        warn!(
            ?circle,
            num_points = points.len(),
            "algebraic circle fit is degenerate, points may be collinear"
        );
    }
    circle
}

/// Moment matrix of `(x^2 + y^2, x, y, 1)`
fn calc_moments(points: &[Complex64]) -> Matrix4<f64> {
    let (mut zz, mut xz, mut yz, mut z) = (0.0, 0.0, 0.0, 0.0);
    let (mut xx, mut xy, mut x, mut yy, mut y) = (0.0, 0.0, 0.0, 0.0, 0.0);
    for p in points {
        let zi = p.norm_sqr();
        zz += zi * zi;
        xz += p.re * zi;
        yz += p.im * zi;
        z += zi;
        xx += p.re * p.re;
        xy += p.re * p.im;
        x += p.re;
        yy += p.im * p.im;
        y += p.im;
    }
    let n = points.len() as f64;
    Matrix4::new(
        zz, xz, yz, z, //
        xz, xx, xy, x, //
        yz, xy, yy, y, //
        z, x, y, n,
    )
}

/// Newton iteration on `a0 + a1 x + a2 x^2 + a3 x^3 + a4 x^4`, started at zero.
///
/// No check is made that the root found is the smallest one.
fn smallest_quartic_root(a: [f64; 5]) -> f64 {
    let func = |x: f64| a[0] + x * (a[1] + x * (a[2] + x * (a[3] + x * a[4])));
    let d_func = |x: f64| a[1] + x * (2.0 * a[2] + x * (3.0 * a[3] + x * 4.0 * a[4]));

    let mut x = 0.0;
    for _ in 0..QUARTIC_MAX_ITER {
        let fx = func(x);
        let dfx = d_func(x);
        if fx == 0.0 {
            return x;
        }
        if dfx == 0.0 || !dfx.is_finite() {
            break;
        }
        let step = fx / dfx;
        x -= step;
        if step.abs() <= QUARTIC_RTOL * x.abs() {
            return x;
        }
    }
    if !x.is_finite() {
        warn!("quartic root solve diverged, using zero");
        return 0.0;
    }
    warn!(root = x, "quartic root solve did not converge");
    x
}

const CIRCLE_PARAMS: &[&str] = &["xc", "yc", "r0"];
const RADIUS_PARAM: &[&str] = &["r0"];

/// Geometric fit minimizing `sum (r0 - |z - zc|)^2`, seeded from `circle`
pub fn fit_circle_iter(
    points: &[Complex64],
    circle: Circle,
    config: SolverConfig,
) -> Result<Circle> {
    let session = FitSession::new("circle geometric refinement", CIRCLE_PARAMS).with_config(config);
    let fit = session.solve(
        points.len(),
        &[circle.xc, circle.yc, circle.r0],
        |p, deviates| {
            let zc = Complex64::new(p[0], p[1]);
            for (d, z) in deviates.iter_mut().zip(points) {
                *d = p[2] - (z - zc).norm();
            }
        },
    )?;
    Ok(Circle {
        xc: fit.params[0],
        yc: fit.params[1],
        r0: fit.params[2],
    })
}

/// Refits the radius alone with each point weighted by `1 / |z - zc|`.
///
/// The centre is much less affected by noise than the radius, so it is kept fixed.
pub fn fit_circle_iter_radialweight(
    points: &[Complex64],
    circle: Circle,
    config: SolverConfig,
) -> Result<f64> {
    let zc = circle.center();
    let distances: Vec<f64> = points.iter().map(|z| (z - zc).norm()).collect();
    let session = FitSession::new("circle radial weighting", RADIUS_PARAM).with_config(config);
    let fit = session.solve(points.len(), &[circle.r0], |p, deviates| {
        for (d, &dist) in deviates.iter_mut().zip(&distances) {
            let weight = if dist > 0.0 { 1.0 / dist } else { 1.0 };
            *d = (p[0] - dist) * weight;
        }
    })?;
    Ok(fit.params[0])
}

/// Translates every point by `-zc`
pub fn center(points: &[Complex64], zc: Complex64) -> Vec<Complex64> {
    points.iter().map(|z| z - zc).collect()
}

/// Magnitude of an angle difference folded into `[0, pi]`, so that 359 deg vs 1 deg counts as 2 deg.
pub fn periodic_angle_distance(x: f64) -> f64 {
    let x = x.abs();
    if x > PI {
        2.0 * PI - x
    } else {
        x
    }
}

/// Signed counterpart of [`periodic_angle_distance`]: `x` mapped into `(-pi, pi]`, with
/// `wrap_angle(x).abs() == periodic_angle_distance(x)`. Least squares residuals use this form so
/// the numerical Jacobian keeps its sign near a perfect fit.
pub fn wrap_angle(x: f64) -> f64 {
    let wrapped = (x + PI).rem_euclid(2.0 * PI) - PI;
    if wrapped == -PI {
        PI
    } else {
        wrapped
    }
}

/// `fmod(x, bound) - trunc(x / bound) * bound`, a 2 pi equivalent representative of `x` for `bound = pi`
pub fn periodic_boundary(x: f64, bound: f64) -> f64 {
    x % bound - (x / bound).trunc() * bound
}
