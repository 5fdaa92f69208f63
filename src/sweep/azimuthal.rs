//! 1D azimuthal integration sweep
//!
//! Every frame is integrated over the full azimuth into 2θ bins and saved as a two
//! column `.xy` table: radial position and intensity.

use super::{Result, SweepLayout, SweepPlan, SweepSummary};
use crate::{
    image::Mask,
    integrator::{Integrate1dOptions, Integrator},
    units::Unit,
};
use ndarray::Array2;

pub const SUBFOLDER: &str = "azimuthal-integration-test";
pub const EXTENSION: &str = "xy";

/// Integration options of the sweep: 2θ in degrees over (-180°,180°), solid angle and
/// polarization (0.99) corrections
pub fn sweep_options() -> Integrate1dOptions {
    Integrate1dOptions {
        unit: Unit::TwoThetaDeg,
        azimuth_range: (-180., 180.),
        correct_solid_angle: true,
        polarization_factor: Some(0.99),
    }
}

/// Integrates every frame of the plan into `n_points` 2θ bins
pub fn azimuthal_integration<I: Integrator + ?Sized>(
    plan: &SweepPlan,
    integrator: &I,
    mask: Option<&Mask>,
    n_points: usize,
) -> Result<SweepSummary> {
    azimuthal_integration_with(plan, integrator, mask, n_points, &sweep_options())
}

/// Same as [azimuthal_integration] with other integration options
pub fn azimuthal_integration_with<I: Integrator + ?Sized>(
    plan: &SweepPlan,
    integrator: &I,
    mask: Option<&Mask>,
    n_points: usize,
    options: &Integrate1dOptions,
) -> Result<SweepSummary> {
    let layout = SweepLayout {
        output_root: plan.output_path().to_path_buf(),
        subfolder: SUBFOLDER,
        extension: EXTENSION,
    };
    plan.run(&layout, |data| {
        let result = integrator.integrate1d(data, n_points, mask, options)?;
        Ok(Array2::from_shape_fn((result.radial.len(), 2), |(i, j)| {
            if j == 0 {
                result.radial[i]
            } else {
                result.intensity[i]
            }
        }))
    })
}
