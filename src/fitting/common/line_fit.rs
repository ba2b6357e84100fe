use std::iter::zip;

/// Straight line fitted by ordinary least squares
#[derive(Default, Debug, Clone, Copy, PartialEq)]
pub struct LineFit {
    pub sum: f64,
    pub sum_x: f64,
    pub sum_y: f64,
    pub sum_xx: f64,
    pub sum_xy: f64,
    pub delta: f64,
    pub intercept: f64,
    pub slope: f64,
    /// Standard error of the slope, from the scatter about the line
    pub slope_err: f64,
}

impl LineFit {
    /// Unweighted two parameter fit of `y = intercept + slope * x`.
    ///
    /// `x` and `y` must have equal length; extra entries of the longer slice are ignored.
    pub fn fit(x_vals: &[f64], y_vals: &[f64]) -> LineFit {
        let mut lsq = LineFit::default();
        // Centering keeps the normal equations well conditioned for GHz abscissae
        let num = x_vals.len().min(y_vals.len());
        if num == 0 {
            return lsq;
        }
        let x_mean = x_vals[..num].iter().sum::<f64>() / num as f64;
        for (x, y) in zip(x_vals.iter(), y_vals.iter()) {
            let dx = x - x_mean;
            lsq.sum += 1.0;
            lsq.sum_x += dx;
            lsq.sum_y += y;
            lsq.sum_xx += dx * dx;
            lsq.sum_xy += dx * y;
        }

        lsq.delta = lsq.sum * lsq.sum_xx - lsq.sum_x * lsq.sum_x;
        lsq.slope = (lsq.sum * lsq.sum_xy - lsq.sum_x * lsq.sum_y) / lsq.delta;
        let centered_intercept = (lsq.sum_xx * lsq.sum_y - lsq.sum_x * lsq.sum_xy) / lsq.delta;
        lsq.intercept = centered_intercept - lsq.slope * x_mean;

        if num > 2 {
            let chi_squared: f64 = zip(x_vals.iter(), y_vals.iter())
                .map(|(x, y)| {
                    let r = y - lsq.intercept - lsq.slope * x;
                    r * r
                })
                .sum();
            lsq.slope_err = (chi_squared / (num - 2) as f64 / lsq.sum_xx).sqrt();
        }
        lsq
    }
}
