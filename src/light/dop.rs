use super::stokes::StokesVec;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Describes the intensity ratio of linearly polarized light.
///
/// The degree is not clamped to 1.0 since sensor noise can push it slightly above.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Dop {
    degree: f64,
}

impl Dop {
    /// Computes sqrt(Q² + U²) / I from a Stokes vector.
    ///
    /// Light without positive intensity has a DoLP of zero rather than a division by zero.
    pub fn from_stokes(sv: &StokesVec) -> Self {
        if !(sv.i() > 0.0) {
            return Self::zero();
        }

        Self {
            degree: sv.q().hypot(sv.u()) / sv.i(),
        }
    }

    /// Create a new `Dop` of zero.
    pub fn zero() -> Self {
        Self { degree: 0. }
    }

    /// Returns `true` if the degree is physically attainable, ie at most 1.0.
    pub fn is_physical(&self) -> bool {
        self.degree <= 1.0
    }

    pub fn into_inner(self) -> f64 {
        self.degree
    }
}

impl Default for Dop {
    fn default() -> Self {
        Self::zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use quickcheck_macros::quickcheck;
    use rstest::rstest;

    #[rstest]
    #[case(StokesVec::new(0.0, 0.0, 0.0), 0.0)]
    #[case(StokesVec::new(0.0, 3.0, 4.0), 0.0)]
    #[case(StokesVec::new(-2.0, 3.0, 4.0), 0.0)]
    #[case(StokesVec::new(10.0, 3.0, 4.0), 0.5)]
    #[case(StokesVec::new(4.0, 3.0, 4.0), 1.25)]
    fn dop_from_stokes(#[case] sv: StokesVec, #[case] expected: f64) {
        assert_relative_eq!(Dop::from_stokes(&sv).into_inner(), expected);
    }

    #[quickcheck]
    fn dop_is_never_negative_or_nan(i: i16, q: i16, u: i16) -> bool {
        let dop = Dop::from_stokes(&StokesVec::new(i as f64, q as f64, u as f64)).into_inner();
        !dop.is_nan() && dop >= 0.0
    }

    #[test]
    fn noise_can_exceed_one() {
        assert!(!Dop::from_stokes(&StokesVec::new(4.0, 3.0, 4.0)).is_physical());
    }
}
