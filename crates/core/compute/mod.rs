//! Distance math, spherical bounds, and input validation.

pub mod spatial;
pub mod validation;
