//! Geometry refinement
//!
//! Levenberg-Marquardt least squares of the 2θ residuals of the control points with
//! respect to the distance, the PONI and the detector tilts. The wavelength and `rot3` are
//! held fixed, the latter having no effect on 2θ.

use super::{extract::ControlPoint, CalibrationError, Result};
use crate::geometry::Geometry;
use nalgebra::{Matrix5, Vector5};

/// Finite difference steps of [Geometry::params]
const JACOBIAN_STEPS: [f64; 5] = [1e-6, 1e-7, 1e-7, 1e-6, 1e-6];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RefineOptions {
    pub max_iterations: usize,
    pub initial_lambda: f64,
    /// relative decrease of the cost below which the refinement stops
    pub tolerance: f64,
}
impl Default for RefineOptions {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            initial_lambda: 1e-3,
            tolerance: 1e-12,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RefinementOutcome {
    pub geometry: Geometry,
    /// root mean square 2θ residual before refinement [rad]
    pub rms_initial: f64,
    /// root mean square 2θ residual after refinement [rad]
    pub rms_final: f64,
    pub iterations: usize,
}

/// 2θ residual of every control point
pub fn residuals(geometry: &Geometry, points: &[ControlPoint], ring_two_theta: &[f64]) -> Vec<f64> {
    let rotation = geometry.rotation();
    points
        .iter()
        .map(|cp| {
            geometry.position_with(&rotation, cp.row, cp.col).two_theta - ring_two_theta[cp.ring]
        })
        .collect()
}

fn cost(residuals: &[f64]) -> f64 {
    residuals.iter().map(|r| r * r).sum()
}

fn rms(cost: f64, n: usize) -> f64 {
    (cost / n as f64).sqrt()
}

/// Normal equations `JᵀJ` and `Jᵀr` from a central difference Jacobian
fn normal_equations(
    geometry: &Geometry,
    points: &[ControlPoint],
    ring_two_theta: &[f64],
    r: &[f64],
) -> (Matrix5<f64>, Vector5<f64>) {
    let params = geometry.params();
    let columns: Vec<Vec<f64>> = (0..5)
        .map(|k| {
            let mut plus = params;
            let mut minus = params;
            plus[k] += JACOBIAN_STEPS[k];
            minus[k] -= JACOBIAN_STEPS[k];
            let r_plus = residuals(&geometry.with_params(plus), points, ring_two_theta);
            let r_minus = residuals(&geometry.with_params(minus), points, ring_two_theta);
            r_plus
                .iter()
                .zip(&r_minus)
                .map(|(p, m)| (p - m) / (2. * JACOBIAN_STEPS[k]))
                .collect()
        })
        .collect();
    let mut h = Matrix5::<f64>::zeros();
    let mut g = Vector5::<f64>::zeros();
    for (i, &ri) in r.iter().enumerate() {
        let j = Vector5::from_fn(|k, _| columns[k][i]);
        h += j * j.transpose();
        g += j * ri;
    }
    (h, g)
}

/// Refines the distance, PONI and tilts of `geometry` to fit the control points
///
/// `ring_two_theta` is indexed by [ControlPoint::ring].
pub fn refine(
    geometry: &Geometry,
    points: &[ControlPoint],
    ring_two_theta: &[f64],
    options: &RefineOptions,
) -> Result<RefinementOutcome> {
    if points.len() < 5 {
        return Err(CalibrationError::NotEnoughControlPoints(points.len()));
    }
    if let Some(cp) = points.iter().find(|cp| cp.ring >= ring_two_theta.len()) {
        return Err(CalibrationError::Refinement(format!(
            "control point on unknown ring #{}",
            cp.ring
        )));
    }
    let n = points.len();
    let mut current = *geometry;
    let mut r = residuals(&current, points, ring_two_theta);
    let mut current_cost = cost(&r);
    if !current_cost.is_finite() {
        return Err(CalibrationError::Refinement(
            "non-finite initial residuals".into(),
        ));
    }
    let rms_initial = rms(current_cost, n);
    let mut lambda = options.initial_lambda;
    let mut iterations = 0;

    'outer: while iterations < options.max_iterations {
        iterations += 1;
        let (h, g) = normal_equations(&current, points, ring_two_theta, &r);
        loop {
            let mut damped = h;
            for k in 0..5 {
                damped[(k, k)] += lambda * h[(k, k)].max(1e-12);
            }
            let step = damped.lu().solve(&(-g)).ok_or_else(|| {
                CalibrationError::Refinement("singular normal equations".into())
            })?;
            if step.iter().any(|x| !x.is_finite()) {
                return Err(CalibrationError::Refinement(
                    "non-finite parameter update".into(),
                ));
            }
            let mut params = current.params();
            params.iter_mut().zip(step.iter()).for_each(|(p, s)| *p += s);
            let candidate = current.with_params(params);
            let candidate_r = residuals(&candidate, points, ring_two_theta);
            let candidate_cost = cost(&candidate_r);
            if candidate.dist > 0. && candidate_cost.is_finite() && candidate_cost < current_cost {
                let decrease = (current_cost - candidate_cost) / current_cost.max(f64::MIN_POSITIVE);
                current = candidate;
                r = candidate_r;
                current_cost = candidate_cost;
                lambda = (lambda / 10.).max(1e-12);
                if decrease < options.tolerance {
                    break 'outer;
                }
                break;
            }
            lambda *= 10.;
            if lambda > 1e12 {
                break 'outer;
            }
        }
    }
    let rms_final = rms(current_cost, n);
    log::debug!(
        "refinement: {} iterations, rms 2θ {:.3e} -> {:.3e} rad",
        iterations,
        rms_initial,
        rms_final
    );
    Ok(RefinementOutcome {
        geometry: current,
        rms_initial,
        rms_final,
        iterations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Detector, Fit2d};

    fn truth() -> Geometry {
        let mut geometry =
            Geometry::from_fit2d(Detector::new(1e-4, 1e-4), Fit2d::new(100., 256., 256.))
                .wavelength(5e-11);
        geometry.rot1 = 2e-3;
        geometry.rot2 = -1e-3;
        geometry
    }

    /// Points sampled exactly on rings of the true geometry
    fn ring_points(geometry: &Geometry, radii_px: &[f64]) -> (Vec<ControlPoint>, Vec<f64>) {
        let mut points = vec![];
        let mut rings = vec![];
        for (ring, &radius) in radii_px.iter().enumerate() {
            let (row, col) = (256. + radius, 256.);
            rings.push(geometry.position(row, col).two_theta);
            for k in 0..24 {
                let phi = k as f64 * std::f64::consts::PI / 12.;
                // Newton steps along the radial direction onto the ring
                let mut rho = radius;
                for _ in 0..50 {
                    let p = geometry.position(256. + rho * phi.sin(), 256. + rho * phi.cos());
                    let q = geometry.position(
                        256. + (rho + 1e-3) * phi.sin(),
                        256. + (rho + 1e-3) * phi.cos(),
                    );
                    let slope = (q.two_theta - p.two_theta) / 1e-3;
                    rho -= (p.two_theta - rings[ring]) / slope;
                }
                points.push(ControlPoint {
                    row: 256. + rho * phi.sin(),
                    col: 256. + rho * phi.cos(),
                    ring,
                    intensity: 1.,
                });
            }
        }
        (points, rings)
    }

    #[test]
    fn recovers_the_true_geometry() {
        let truth = truth();
        let (points, rings) = ring_points(&truth, &[60., 120., 180.]);
        let mut guess = truth;
        guess.dist += 3e-3;
        guess.poni1 += 2e-4;
        guess.poni2 -= 3e-4;
        guess.rot1 = 0.;
        guess.rot2 = 0.;
        let outcome = refine(&guess, &points, &rings, &RefineOptions::default()).unwrap();
        assert!(outcome.rms_final < 1e-7);
        assert!(outcome.rms_final < outcome.rms_initial);
        assert!((outcome.geometry.dist - truth.dist).abs() < 1e-5);
        assert!((outcome.geometry.poni1 - truth.poni1).abs() < 1e-5);
        assert!((outcome.geometry.poni2 - truth.poni2).abs() < 1e-5);
        assert_eq!(outcome.geometry.rot3, truth.rot3);
        assert_eq!(outcome.geometry.wavelength, truth.wavelength);
    }

    #[test]
    fn noisy_control_points() {
        use rand::{rngs::StdRng, Rng, SeedableRng};
        let truth = truth();
        let (mut points, rings) = ring_points(&truth, &[60., 120., 180.]);
        let mut rng = StdRng::seed_from_u64(42);
        for point in points.iter_mut() {
            point.row += rng.gen_range(-0.1..0.1);
            point.col += rng.gen_range(-0.1..0.1);
        }
        let mut guess = truth;
        guess.dist += 3e-3;
        guess.rot1 = 0.;
        let outcome = refine(&guess, &points, &rings, &RefineOptions::default()).unwrap();
        assert!(outcome.rms_final < outcome.rms_initial);
        // residuals at the level of the 0.1 pixel noise
        assert!(outcome.rms_final < 1e-4, "{}", outcome.rms_final);
        // the PONI and the tilts are correlated, the beam centre and distance are not
        let (fit2d, expected) = (outcome.geometry.to_fit2d(), truth.to_fit2d());
        assert!((fit2d.direct_dist - expected.direct_dist).abs() < 0.1, "{fit2d:?}");
        assert!((fit2d.center_x - expected.center_x).abs() < 0.3, "{fit2d:?}");
        assert!((fit2d.center_y - expected.center_y).abs() < 0.3, "{fit2d:?}");
    }

    #[test]
    fn too_few_points() {
        let truth = truth();
        let (points, rings) = ring_points(&truth, &[60.]);
        assert!(matches!(
            refine(&truth, &points[..3], &rings, &RefineOptions::default()),
            Err(CalibrationError::NotEnoughControlPoints(3))
        ));
    }
}
