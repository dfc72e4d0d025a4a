use super::{
    aop::{Aop, AngleConvention},
    dop::Dop,
};
use crate::error::{Error, Result};
use nalgebra::{Matrix3, Vector3};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use uom::si::{
    angle::{degree, radian},
    f64::Angle,
};

/// Describes the linear polarization of light with unnormalised Stokes parameters.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct StokesVec {
    i: f64,
    q: f64,
    u: f64,
}

impl StokesVec {
    pub fn new(i: f64, q: f64, u: f64) -> Self {
        Self { i, q, u }
    }

    /// Total intensity.
    pub fn i(&self) -> f64 {
        self.i
    }

    pub fn q(&self) -> f64 {
        self.q
    }

    pub fn u(&self) -> f64 {
        self.u
    }

    /// Compute the DoLP of the light.
    pub fn dop(&self) -> Dop {
        Dop::from_stokes(self)
    }

    /// Compute the AoLP of the light.
    pub fn aop(&self) -> Aop {
        Aop::from_stokes(self)
    }

    /// AoLP in degrees following `convention`.
    pub fn aop_degrees(&self, convention: AngleConvention) -> f64 {
        self.aop().degrees(convention)
    }

    /// Intensity transmitted by an ideal linear polariser with its axis at `angle`.
    ///
    /// ```text
    /// I(θ) = I/2 + Q/2 cos(2θ) + U/2 sin(2θ)
    /// ```
    pub fn transmitted(&self, angle: Angle) -> f64 {
        let two_theta = 2.0 * angle.get::<radian>();
        0.5 * (self.i + self.q * two_theta.cos() + self.u * two_theta.sin())
    }
}

/// Fits Stokes vectors to intensities measured through a fixed set of linear polarisers.
#[derive(Clone, Debug, PartialEq)]
pub struct StokesSolver {
    kind: SolverKind,
}

#[derive(Clone, Debug, PartialEq)]
enum SolverKind {
    /// Positions of the 0, 45, 90 and 135 degree measurements.
    Canonical([usize; 4]),

    /// One column of the least-squares pseudo-inverse per measurement.
    LeastSquares(Vec<Vector3<f64>>),
}

impl StokesSolver {
    /// Creates a solver for measurements taken at `angles`.
    ///
    /// The closed form is used when `angles` are 0, 45, 90 and 135 degrees (modulo 180) in any
    /// order, otherwise the ordinary least-squares solution is precomputed.
    pub fn new(angles: &[Angle]) -> Result<Self> {
        match canonical_positions(angles) {
            Some(positions) => Ok(Self {
                kind: SolverKind::Canonical(positions),
            }),
            None => Self::least_squares(angles),
        }
    }

    /// Creates a solver that always uses the least-squares fit.
    pub fn least_squares(angles: &[Angle]) -> Result<Self> {
        if angles.len() < 3 {
            return Err(Error::InsufficientSamples {
                required: 3,
                found: angles.len(),
                context: "a Stokes fit",
            });
        }

        let rows: Vec<Vector3<f64>> = angles
            .iter()
            .map(|angle| {
                let two_theta = 2.0 * angle.get::<radian>();
                Vector3::new(0.5, 0.5 * two_theta.cos(), 0.5 * two_theta.sin())
            })
            .collect();

        let normal: Matrix3<f64> = rows.iter().map(|row| row * row.transpose()).sum();
        let singular = normal.singular_values();
        let largest = singular.iter().copied().fold(0.0, f64::max);
        let smallest = singular.iter().copied().fold(f64::INFINITY, f64::min);
        if smallest <= largest * 1e-12 {
            return Err(Error::DegenerateInput(format!(
                "polariser angles {:?} deg do not constrain Q and U",
                angles.iter().map(|a| a.get::<degree>()).collect::<Vec<_>>()
            )));
        }

        let inverse = normal.try_inverse().ok_or_else(|| {
            Error::DegenerateInput("normal matrix of the Stokes fit is singular".into())
        })?;

        Ok(Self {
            kind: SolverKind::LeastSquares(rows.iter().map(|row| inverse * row).collect()),
        })
    }

    /// Number of measurements the solver expects per pixel.
    pub fn len(&self) -> usize {
        match &self.kind {
            SolverKind::Canonical(_) => 4,
            SolverKind::LeastSquares(columns) => columns.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Solves for a Stokes vector where `measurement(p)` is the intensity behind polariser `p`.
    ///
    /// The closed form for the canonical angles is:
    /// ```text
    /// I = (I_0 + I_45 + I_90 + I_135) / 2
    /// Q = I_0 - I_90
    /// U = I_45 - I_135
    /// ```
    pub fn solve(&self, measurement: impl Fn(usize) -> f64) -> StokesVec {
        match &self.kind {
            SolverKind::Canonical([i000, i045, i090, i135]) => {
                let (m000, m045, m090, m135) = (
                    measurement(*i000),
                    measurement(*i045),
                    measurement(*i090),
                    measurement(*i135),
                );
                StokesVec::new(
                    (m000 + m045 + m090 + m135) / 2.,
                    m000 - m090,
                    m045 - m135,
                )
            }
            SolverKind::LeastSquares(columns) => {
                let s: Vector3<f64> = columns
                    .iter()
                    .enumerate()
                    .map(|(p, column)| column * measurement(p))
                    .sum();
                StokesVec::new(s.x, s.y, s.z)
            }
        }
    }
}

/// Returns where the 0, 45, 90 and 135 degree measurements sit in `angles`, if they are exactly
/// those four.
fn canonical_positions(angles: &[Angle]) -> Option<[usize; 4]> {
    if angles.len() != 4 {
        return None;
    }

    let mut positions = [None; 4];
    for (p, angle) in angles.iter().enumerate() {
        let reduced = angle.get::<degree>().rem_euclid(180.0);
        let slot = [0.0, 45.0, 90.0, 135.0, 180.0]
            .iter()
            .position(|canonical| (reduced - canonical).abs() < 1e-9)?
            % 4;
        if positions[slot].replace(p).is_some() {
            return None;
        }
    }

    Some([positions[0]?, positions[1]?, positions[2]?, positions[3]?])
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use quickcheck_macros::quickcheck;
    use rstest::rstest;

    fn a(angle: f64) -> Angle {
        Angle::new::<degree>(angle)
    }

    fn canonical() -> Vec<Angle> {
        vec![a(0.0), a(45.0), a(90.0), a(135.0)]
    }

    #[test]
    fn closed_form() {
        let solver = StokesSolver::new(&canonical()).unwrap();
        let m = [10.0, 7.0, 4.0, 3.0];
        let sv = solver.solve(|p| m[p]);

        assert_eq!(sv, StokesVec::new(12.0, 6.0, 4.0));
    }

    #[rstest]
    #[case(vec![a(90.0), a(45.0), a(135.0), a(0.0)], [3, 1, 0, 2])]
    #[case(vec![a(180.0), a(225.0), a(270.0), a(315.0)], [0, 1, 2, 3])]
    #[case(vec![a(-180.0), a(45.0), a(90.0), a(-45.0)], [0, 1, 2, 3])]
    fn canonical_angles_detected(#[case] angles: Vec<Angle>, #[case] positions: [usize; 4]) {
        assert_eq!(canonical_positions(&angles), Some(positions));
    }

    #[rstest]
    #[case(vec![a(0.0), a(45.0), a(90.0)])]
    #[case(vec![a(0.0), a(45.0), a(90.0), a(90.0)])]
    #[case(vec![a(0.0), a(60.0), a(90.0), a(135.0)])]
    fn non_canonical_angles(#[case] angles: Vec<Angle>) {
        assert_eq!(canonical_positions(&angles), None);
    }

    #[quickcheck]
    fn least_squares_agrees_with_closed_form(m: (u16, u16, u16, u16)) -> bool {
        let m = [m.0 as f64, m.1 as f64, m.2 as f64, m.3 as f64];
        let closed = StokesSolver::new(&canonical()).unwrap().solve(|p| m[p]);
        let fitted = StokesSolver::least_squares(&canonical())
            .unwrap()
            .solve(|p| m[p]);

        approx::relative_eq!(closed.i(), fitted.i(), epsilon = 1e-9, max_relative = 1e-9)
            && approx::relative_eq!(closed.q(), fitted.q(), epsilon = 1e-9, max_relative = 1e-9)
            && approx::relative_eq!(closed.u(), fitted.u(), epsilon = 1e-9, max_relative = 1e-9)
    }

    #[test]
    fn least_squares_recovers_forward_model() {
        let truth = StokesVec::new(100.0, 20.0, -35.0);
        let angles = vec![a(0.0), a(30.0), a(60.0), a(90.0), a(120.0), a(150.0)];
        let solver = StokesSolver::new(&angles).unwrap();
        assert_eq!(solver.len(), 6);

        let sv = solver.solve(|p| truth.transmitted(angles[p]));
        assert_relative_eq!(sv.i(), truth.i(), epsilon = 1e-9);
        assert_relative_eq!(sv.q(), truth.q(), epsilon = 1e-9);
        assert_relative_eq!(sv.u(), truth.u(), epsilon = 1e-9);
    }

    #[test]
    fn too_few_angles() {
        assert_eq!(
            StokesSolver::new(&[a(0.0), a(90.0)]),
            Err(Error::InsufficientSamples {
                required: 3,
                found: 2,
                context: "a Stokes fit"
            })
        );
    }

    #[test]
    fn degenerate_angles() {
        // Parallel polarisers cannot separate Q from U.
        let result = StokesSolver::new(&[a(0.0), a(90.0), a(180.0)]);
        assert!(matches!(result, Err(Error::DegenerateInput(_))));
    }
}
