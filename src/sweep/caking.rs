//! Caking sweeps
//!
//! Every frame is integrated into `n_cakes` azimuthal sectors ("cakes") and saved as a
//! `.dat` table whose first column is the radial axis followed by one intensity column
//! per cake. The detector is first rotated by half a cake so that the cardinal
//! directions fall at the centre of the cakes, and the cakes are ordered clockwise.
//!
//! Two outputs are supported: 2θ in degrees for xrdfit and pixel units for MAUD.

use super::{Result, SweepError, SweepLayout, SweepPlan, SweepSummary};
use crate::{
    image::Mask,
    integrator::{Integrate2dOptions, Integrator},
    units::Unit,
};
use ndarray::{s, Array1, Array2};

/// Caking output flavour
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CakingVariant {
    /// 2θ in degrees, written to `caking-test`
    Xrdfit,
    /// radial distance in pixels, written to `texture-maud`
    Maud {
        /// pixel size [mm]
        pixel_size: f64,
    },
}
impl CakingVariant {
    pub fn unit(&self) -> Unit {
        match self {
            CakingVariant::Xrdfit => Unit::TwoThetaDeg,
            CakingVariant::Maud { .. } => Unit::RadiusMm,
        }
    }
    pub fn subfolder(&self) -> &'static str {
        match self {
            CakingVariant::Xrdfit => "caking-test",
            CakingVariant::Maud { .. } => "texture-maud",
        }
    }
}

pub const EXTENSION: &str = "dat";

/// Detector rotation [rad] that centres the first cake on the horizontal axis
pub fn half_cake_rotation(n_cakes: usize) -> Result<f64> {
    if n_cakes == 0 {
        return Err(SweepError::InvalidCakeCount);
    }
    Ok((360. / n_cakes as f64 / 2.).to_radians())
}

/// Reverses the order of the cakes (rows) from anticlockwise to clockwise
pub fn clockwise_sectors(intensity: &Array2<f64>) -> Array2<f64> {
    intensity.slice(s![..;-1, ..]).to_owned()
}

fn check_pixel_size(pixel_size: f64) -> Result<()> {
    if pixel_size.is_finite() && pixel_size > 0. {
        Ok(())
    } else {
        Err(SweepError::InvalidPixelSize(pixel_size))
    }
}

/// Converts a radial axis in millimetres into pixels
pub fn radial_mm_to_pixels(radial: &Array1<f64>, pixel_size: f64) -> Result<Array1<f64>> {
    check_pixel_size(pixel_size)?;
    Ok(radial / pixel_size)
}

/// Radial column followed by the clockwise ordered cake columns
pub fn caked_table(radial: &Array1<f64>, intensity: &Array2<f64>) -> Array2<f64> {
    let cakes = clockwise_sectors(intensity);
    let (n_cakes, n_radial) = cakes.dim();
    Array2::from_shape_fn((n_radial, n_cakes + 1), |(i, j)| {
        if j == 0 {
            radial[i]
        } else {
            cakes[[j - 1, i]]
        }
    })
}

/// Integration options of the sweep: solid angle and polarization (0.99) corrections
pub fn sweep_options() -> Integrate2dOptions {
    Integrate2dOptions {
        unit: Unit::TwoThetaDeg,
        correct_solid_angle: true,
        polarization_factor: Some(0.99),
    }
}

/// Cakes every frame of the plan into `n_cakes` sectors of `n_points` radial bins
///
/// The integrator is left rotated by [half_cake_rotation].
pub fn caking<I: Integrator + ?Sized>(
    plan: &SweepPlan,
    integrator: &mut I,
    mask: Option<&Mask>,
    n_points: usize,
    n_cakes: usize,
    variant: CakingVariant,
) -> Result<SweepSummary> {
    caking_with(
        plan,
        integrator,
        mask,
        n_points,
        n_cakes,
        variant,
        &sweep_options(),
    )
}

/// Same as [caking] with other corrections, the radial unit is set by the variant
pub fn caking_with<I: Integrator + ?Sized>(
    plan: &SweepPlan,
    integrator: &mut I,
    mask: Option<&Mask>,
    n_points: usize,
    n_cakes: usize,
    variant: CakingVariant,
    options: &Integrate2dOptions,
) -> Result<SweepSummary> {
    let rot3 = half_cake_rotation(n_cakes)?;
    if let CakingVariant::Maud { pixel_size } = variant {
        check_pixel_size(pixel_size)?;
    }
    integrator.set_rot3(rot3);
    log::info!(
        "Detector rotated by {:.6} rad for {} cakes",
        integrator.rot3(),
        n_cakes
    );
    let options = Integrate2dOptions {
        unit: variant.unit(),
        ..*options
    };
    let layout = SweepLayout {
        output_root: plan.output_path().to_path_buf(),
        subfolder: variant.subfolder(),
        extension: EXTENSION,
    };
    let integrator: &I = integrator;
    plan.run(&layout, |data| {
        let result = integrator.integrate2d(data, n_points, n_cakes, mask, &options)?;
        let radial = match variant {
            CakingVariant::Xrdfit => result.radial,
            CakingVariant::Maud { pixel_size } => radial_mm_to_pixels(&result.radial, pixel_size)?,
        };
        Ok(caked_table(&radial, &result.intensity))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        integrator::{
            Integrate1dOptions, Integrate1dResult, Integrate2dResult, IntegrationError,
        },
        sweep::tests::frames,
    };
    use ndarray::array;
    use std::{cell::RefCell, fs};

    /// Integrator returning cake `k` filled with `k`, on a radial axis 1, 2, ...
    #[derive(Default)]
    struct Recording {
        rot3: f64,
        calls: RefCell<Vec<(usize, usize, Unit, Option<f64>, f64)>>,
    }
    impl Integrator for Recording {
        fn integrate1d(
            &self,
            _: &Array2<f64>,
            _: usize,
            _: Option<&Mask>,
            _: &Integrate1dOptions,
        ) -> std::result::Result<Integrate1dResult, IntegrationError> {
            Err(IntegrationError::NoBins)
        }
        fn integrate2d(
            &self,
            _: &Array2<f64>,
            npt_rad: usize,
            npt_azim: usize,
            _: Option<&Mask>,
            options: &Integrate2dOptions,
        ) -> std::result::Result<Integrate2dResult, IntegrationError> {
            self.calls.borrow_mut().push((
                npt_rad,
                npt_azim,
                options.unit,
                options.polarization_factor,
                self.rot3,
            ));
            Ok(Integrate2dResult {
                radial: Array1::from_shape_fn(npt_rad, |i| (i + 1) as f64),
                azimuthal: Array1::from_shape_fn(npt_azim, |k| {
                    -180. + (k as f64 + 0.5) * 360. / npt_azim as f64
                }),
                intensity: Array2::from_shape_fn((npt_azim, npt_rad), |(k, _)| k as f64),
                unit: options.unit,
            })
        }
        fn rot3(&self) -> f64 {
            self.rot3
        }
        fn set_rot3(&mut self, rot3: f64) {
            self.rot3 = rot3;
        }
    }

    fn read_table(path: std::path::PathBuf) -> Vec<Vec<f64>> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|line| line.split(' ').map(|x| x.parse().unwrap()).collect())
            .collect()
    }

    #[test]
    fn rotation_of_36_cakes() {
        assert!((half_cake_rotation(36).unwrap() - 0.0872665).abs() < 1e-6);
        assert!((half_cake_rotation(4).unwrap() - std::f64::consts::FRAC_PI_4).abs() < 1e-12);
        assert!(matches!(
            half_cake_rotation(0),
            Err(SweepError::InvalidCakeCount)
        ));
    }

    #[test]
    fn cakes_are_flipped_clockwise() {
        let intensity = array![[0., 0.], [1., 1.], [2., 2.], [3., 3.]];
        assert_eq!(
            clockwise_sectors(&intensity),
            array![[3., 3.], [2., 2.], [1., 1.], [0., 0.]]
        );
        let table = caked_table(&array![10., 20.], &intensity);
        assert_eq!(table, array![[10., 3., 2., 1., 0.], [20., 3., 2., 1., 0.]]);
    }

    #[test]
    fn millimetres_to_pixels() {
        let pixels = radial_mm_to_pixels(&array![10.0], 0.2).unwrap();
        assert_eq!(pixels[0], 50.0);
        assert!(matches!(
            radial_mm_to_pixels(&array![10.0], 0.),
            Err(SweepError::InvalidPixelSize(_))
        ));
    }

    #[test]
    fn xrdfit_sweep() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("raw");
        frames(input.join("sample"), 2);
        let output = dir.path().join("reduced");
        let plan = SweepPlan::new(&input, &output)
            .experiments(["sample"], ["sample"])
            .progress(false);
        let mut integrator = Recording::default();

        let summary = caking(&plan, &mut integrator, None, 3, 4, CakingVariant::Xrdfit).unwrap();
        assert_eq!(summary.files_written, 2);
        let calls = integrator.calls.borrow();
        assert_eq!(calls.len(), 2);
        for &(npt_rad, npt_azim, unit, polarization, rot3) in calls.iter() {
            assert_eq!((npt_rad, npt_azim, unit), (3, 4, Unit::TwoThetaDeg));
            assert_eq!(polarization, Some(0.99));
            assert!((rot3 - std::f64::consts::FRAC_PI_4).abs() < 1e-12);
        }
        let rows = read_table(output.join("sample/caking-test/img000.dat"));
        assert_eq!(
            rows,
            vec![
                vec![1., 3., 2., 1., 0.],
                vec![2., 3., 2., 1., 0.],
                vec![3., 3., 2., 1., 0.]
            ]
        );
    }

    #[test]
    fn maud_sweep() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("raw");
        frames(input.join("sample"), 1);
        let output = dir.path().join("reduced");
        let plan = SweepPlan::new(&input, &output)
            .experiments(["sample"], ["texture"])
            .progress(false);
        let mut integrator = Recording::default();

        caking(
            &plan,
            &mut integrator,
            None,
            2,
            36,
            CakingVariant::Maud { pixel_size: 0.5 },
        )
        .unwrap();
        assert_eq!(integrator.calls.borrow()[0].2, Unit::RadiusMm);
        assert!((integrator.rot3() - 0.0872665).abs() < 1e-6);
        let rows = read_table(output.join("texture/texture-maud/img000.dat"));
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].len(), 37);
        assert_eq!((rows[0][0], rows[1][0]), (2., 4.));
        assert_eq!((rows[0][1], rows[0][36]), (35., 0.));
    }

    #[test]
    fn invalid_pixel_size_leaves_the_integrator_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let plan = SweepPlan::new(dir.path(), dir.path()).progress(false);
        let mut integrator = Recording::default();
        assert!(caking(
            &plan,
            &mut integrator,
            None,
            2,
            36,
            CakingVariant::Maud { pixel_size: -1. },
        )
        .is_err());
        assert_eq!(integrator.rot3(), 0.);
    }
}
