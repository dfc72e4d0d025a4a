use super::stokes::StokesVec;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use uom::si::{
    angle::{degree, radian},
    f64::Angle,
};

/// How AoLP values are reported.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum AngleConvention {
    /// The e-vector orientation ψ on [0, 180) degrees.
    #[default]
    HalfTurn,

    /// The doubled orientation 2ψ on [0, 360) degrees, for cyclic colour maps.
    FullTurn,
}

/// Describes the e-vector orientation of linearly polarized light.
///
/// The angle is measured from the 0 degree polariser axis and always lies on [0, 180).
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Aop {
    angle: Angle,
}

impl Aop {
    /// Creates a new `Aop` from `angle`.
    ///
    /// Returns `None` if `angle` is not on [0, 180).
    pub fn from_angle(angle: Angle) -> Option<Self> {
        if !is_valid(angle) {
            return None;
        }

        Some(Self { angle })
    }

    /// Creates a new `Aop` from `angle` reduced modulo 180 degrees.
    pub fn from_angle_wrapped(angle: Angle) -> Self {
        let mut rad = angle.get::<radian>().rem_euclid(PI);

        // rem_euclid rounds tiny negative angles up to exactly PI.
        if rad >= PI {
            rad = 0.0;
        }

        Self {
            angle: Angle::new::<radian>(rad),
        }
    }

    /// Computes ψ = atan2(U, Q) / 2 from a Stokes vector.
    ///
    /// Unpolarized light (Q = U = 0) has no orientation and is assigned 0 degrees.
    pub fn from_stokes(sv: &StokesVec) -> Self {
        if sv.q() == 0.0 && sv.u() == 0.0 {
            return Self::zero();
        }

        Self::from_angle_wrapped(Angle::new::<radian>(sv.u().atan2(sv.q()) / 2.))
    }

    pub fn zero() -> Self {
        Self {
            angle: Angle::new::<radian>(0.0),
        }
    }

    /// Returns the angle in degrees following `convention`.
    pub fn degrees(&self, convention: AngleConvention) -> f64 {
        let deg = self.angle.get::<degree>();
        match convention {
            AngleConvention::HalfTurn => deg,
            AngleConvention::FullTurn => 2. * deg,
        }
    }

    pub fn into_inner(self) -> Angle {
        self.angle
    }
}

impl Default for Aop {
    fn default() -> Self {
        Self::zero()
    }
}

/// Returns `true` if `angle` is on [0, 180), `false` otherwise.
fn is_valid(angle: Angle) -> bool {
    (0.0..PI).contains(&angle.get::<radian>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use quickcheck::quickcheck;
    use rstest::rstest;

    fn a(angle: f64) -> Angle {
        Angle::new::<degree>(angle)
    }

    quickcheck! {
        fn aop_wrapped_in_range(angle: i32) -> bool {
            is_valid(Aop::from_angle_wrapped(a(angle as f64 / 7.)).into_inner())
        }
    }

    #[rstest]
    #[case(a(180.5))]
    #[case(a(-0.5))]
    #[case(a(270.0))]
    fn invalid_aop(#[case] angle: Angle) {
        assert_eq!(Aop::from_angle(angle), None);
    }

    #[rstest]
    #[case(a(-90.0), 90.0)]
    #[case(a(181.0), 1.0)]
    #[case(a(-1e-15), 0.0)]
    #[case(a(359.0), 179.0)]
    #[case(a(45.0), 45.0)]
    fn wrapped_aop(#[case] angle: Angle, #[case] expected: f64) {
        assert_relative_eq!(
            Aop::from_angle_wrapped(angle).degrees(AngleConvention::HalfTurn),
            expected,
            epsilon = 1e-9
        );
    }

    #[rstest]
    #[case(StokesVec::new(1.0, 1.0, 0.0), 0.0)]
    #[case(StokesVec::new(1.0, 0.0, 1.0), 45.0)]
    #[case(StokesVec::new(1.0, -1.0, 0.0), 90.0)]
    #[case(StokesVec::new(1.0, 0.0, -1.0), 135.0)]
    #[case(StokesVec::new(0.0, 0.0, 0.0), 0.0)]
    #[case(StokesVec::new(0.0, -0.0, -0.0), 0.0)]
    fn aop_from_stokes(#[case] sv: StokesVec, #[case] expected: f64) {
        assert_relative_eq!(
            Aop::from_stokes(&sv).degrees(AngleConvention::HalfTurn),
            expected,
            epsilon = 1e-9
        );
    }

    #[test]
    fn full_turn_doubles() {
        let aop = Aop::from_stokes(&StokesVec::new(1.0, 0.0, -1.0));
        assert_relative_eq!(aop.degrees(AngleConvention::FullTurn), 270.0, epsilon = 1e-9);
    }
}
