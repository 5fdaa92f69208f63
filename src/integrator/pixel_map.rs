use crate::geometry::Geometry;
use crate::units::Unit;
use ndarray::{Array2, Zip};

/// Per-pixel scattering geometry of a detector frame
#[derive(Debug, Clone)]
pub struct PixelMap {
    /// 2θ [rad]
    pub two_theta: Array2<f64>,
    /// azimuth χ [rad]
    pub chi: Array2<f64>,
    /// distance to the beam [m]
    pub radius: Array2<f64>,
    /// solid angle relative to the PONI pixel
    pub solid_angle: Array2<f64>,
}
impl PixelMap {
    pub fn new(geometry: &Geometry, shape: (usize, usize)) -> Self {
        let rotation = geometry.rotation();
        let mut two_theta = Array2::zeros(shape);
        let mut chi = Array2::zeros(shape);
        let mut radius = Array2::zeros(shape);
        let mut solid_angle = Array2::zeros(shape);
        Zip::indexed(&mut two_theta)
            .and(&mut chi)
            .and(&mut radius)
            .and(&mut solid_angle)
            .for_each(|(row, col), tth, chi, r, sa| {
                let p = geometry.position_with(&rotation, row as f64 + 0.5, col as f64 + 0.5);
                *tth = p.two_theta;
                *chi = p.chi;
                *r = p.radius;
                *sa = p.cos_incidence.powi(3);
            });
        Self {
            two_theta,
            chi,
            radius,
            solid_angle,
        }
    }
    /// Shape (rows, columns)
    pub fn shape(&self) -> (usize, usize) {
        self.two_theta.dim()
    }
    /// Radial position of every pixel in the given unit
    pub fn radial(&self, unit: Unit, wavelength: f64) -> Array2<f64> {
        Zip::from(&self.two_theta)
            .and(&self.radius)
            .map_collect(|&tth, &r| unit.convert(tth, r, wavelength))
    }
    /// Polarization correction of every pixel
    ///
    /// A factor of 0 is an unpolarized beam, 1 a beam fully polarized along the
    /// horizontal (χ=0) direction.
    pub fn polarization(&self, factor: f64) -> Array2<f64> {
        Zip::from(&self.two_theta)
            .and(&self.chi)
            .map_collect(|&tth, &chi| {
                let cos2_tth = tth.cos().powi(2);
                0.5 * (1. + cos2_tth - factor * (2. * chi).cos() * (1. - cos2_tth))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Detector, Fit2d};

    #[test]
    fn centred_beam_symmetry() {
        let geometry = Geometry::from_fit2d(Detector::new(1e-4, 1e-4), Fit2d::new(50., 8., 8.));
        let map = PixelMap::new(&geometry, (16, 16));
        assert_eq!(map.shape(), (16, 16));
        // pixels mirrored about the beam centre scatter at the same angle
        assert!((map.two_theta[[2, 5]] - map.two_theta[[13, 10]]).abs() < 1e-12);
        assert!((map.two_theta[[2, 5]] - map.two_theta[[5, 2]]).abs() < 1e-12);
        assert!(map.solid_angle.iter().all(|&sa| sa > 0. && sa <= 1.));
    }

    #[test]
    fn polarization_without_factor() {
        let geometry = Geometry::from_fit2d(Detector::new(1e-4, 1e-4), Fit2d::new(50., 8., 8.));
        let map = PixelMap::new(&geometry, (16, 16));
        let pol = map.polarization(0.);
        Zip::from(&pol).and(&map.two_theta).for_each(|&p, &tth| {
            assert!((p - 0.5 * (1. + tth.cos().powi(2))).abs() < 1e-12);
        });
    }
}
