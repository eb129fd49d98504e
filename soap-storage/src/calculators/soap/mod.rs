//! Builders transforming the raw output of an external spherical expansion
//! calculator into a block-sparse [`metatensor::TensorMap`], and the SOAP power
//! spectrum built on top of them.

mod reindex;
pub use self::reindex::GlobalAtomIndex;

mod spherical_expansion;
pub use self::spherical_expansion::{SphericalExpansion, SphericalExpansionParameters};

mod spherical_expansion_pair;
pub use self::spherical_expansion_pair::SphericalExpansionByPair;

mod autograd;
pub use self::autograd::{Differentiable, RequiredGradients, SystemGradients};
pub use self::autograd::{DifferentiableSystem, ExpansionContext, ExpansionTape};
pub use self::autograd::{SphericalExpansionAutograd, DifferentiableSphericalExpansion};

mod power_spectrum;
pub use self::power_spectrum::compute_power_spectrum;
