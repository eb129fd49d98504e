mod dummy_calculator;
pub use self::dummy_calculator::DummyExpansion;

pub mod soap;
pub use self::soap::{SphericalExpansion, SphericalExpansionParameters};
pub use self::soap::SphericalExpansionByPair;
pub use self::soap::{SphericalExpansionAutograd, DifferentiableSphericalExpansion};
pub use self::soap::compute_power_spectrum;

#[cfg(test)]
pub(crate) mod tests_utils;
