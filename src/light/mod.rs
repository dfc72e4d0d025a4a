pub mod aop;
pub mod dop;
pub mod stokes;
