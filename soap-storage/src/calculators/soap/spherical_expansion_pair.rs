use ndarray::{Array3, Axis, s};

use metatensor::{LabelsBuilder, TensorBlock, TensorMap};

use crate::{Error, System, SimpleSystem};
use crate::{ExpansionCalculator, ExpansionHypers};

use super::spherical_expansion::{features_as_4d, spherical_harmonics_m, radial_properties};
use super::SphericalExpansionParameters;

/// Spherical expansion coefficients for each pair of atoms `i-j` inside a
/// structure, stored in one block for each `spherical_harmonics_l`.
///
/// Each atom is given a different pseudo-species (its index in the
/// structure) before calling the external calculator, so that the species
/// channels of the expansion around atom `i` contain the contribution of
/// each neighbor `j` separately. Samples are `(structure, center_i,
/// center_j)`, and only contain the pairs with a non-negligible
/// contribution.
///
/// Gradients are not supported.
pub struct SphericalExpansionByPair {
    calculator: Box<dyn ExpansionCalculator>,
    parameters: SphericalExpansionParameters,
}

impl std::fmt::Debug for SphericalExpansionByPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SphericalExpansionByPair({}, {:?})", self.calculator.name(), self.parameters)
    }
}

impl SphericalExpansionByPair {
    pub fn new(
        calculator: Box<dyn ExpansionCalculator>,
        parameters: SphericalExpansionParameters,
    ) -> Result<SphericalExpansionByPair, Error> {
        parameters.validate()?;
        return Ok(SphericalExpansionByPair { calculator, parameters });
    }

    pub fn parameters(&self) -> &SphericalExpansionParameters {
        &self.parameters
    }

    #[time_graph::instrument(name = "SphericalExpansionByPair::compute")]
    pub fn compute(&mut self, systems: &[Box<dyn System>]) -> Result<TensorMap, Error> {
        if self.parameters.gradients {
            return Err(Error::InvalidParameter(
                "gradients are not implemented for the pair expansion".into()
            ));
        }

        let mut max_atoms = 0;
        for system in systems {
            max_atoms = usize::max(max_atoms, system.size()?);
        }

        let pseudo_species = (0..max_atoms as i32).collect::<Vec<_>>();
        let hypers = self.parameters.hypers(pseudo_species.clone(), false);

        let max_radial = self.parameters.max_radial;
        let angular_size = hypers.angular_size();

        let mut samples = LabelsBuilder::new(vec!["structure", "center_i", "center_j"]);
        // coefficients for each pair, as [pair, n, (l, m)]
        let mut pairs = Vec::new();
        for (structure_i, system) in systems.iter().enumerate() {
            let n_atoms = system.size()?;
            let system = SimpleSystem::try_from(&**system)?;
            let system = system.with_species(pseudo_species[..n_atoms].to_vec())?;

            let expansion = self.calculator.compute(&[Box::new(system) as Box<dyn System>], &hypers)?;
            expansion.validate(&hypers)?;

            if expansion.values.nrows() != n_atoms {
                return Err(Error::Calculator(format!(
                    "expected {} centers in the output of the calculator, got {}",
                    n_atoms, expansion.values.nrows()
                )));
            }

            let values = features_as_4d(expansion.values.view(), &hypers)?;
            for (center_i, center) in values.outer_iter().enumerate() {
                for (center_j, pair) in center.outer_iter().enumerate() {
                    let norm2 = pair.iter().map(|v| v * v).sum::<f64>();
                    if norm2 > self.parameters.zero_threshold {
                        samples.add(&[structure_i, center_i, center_j]);
                        pairs.push(pair.to_owned());
                    }
                }
            }
        }

        let samples = samples.finish();
        let components = (0..=self.parameters.max_angular).map(spherical_harmonics_m).collect::<Vec<_>>();
        let properties = radial_properties(max_radial);

        let mut keys = LabelsBuilder::new(vec!["spherical_harmonics_l"]);
        let mut blocks = Vec::new();
        for l in 0..=self.parameters.max_angular {
            keys.add(&[l]);

            let lm_range = ExpansionHypers::angular_range(l);

            let mut values = Array3::zeros((pairs.len(), 2 * l + 1, max_radial));
            for (mut value, pair) in values.axis_iter_mut(Axis(0)).zip(&pairs) {
                debug_assert_eq!(pair.shape(), [max_radial, angular_size]);
                // [n, m] => [m, n]
                value.assign(&pair.slice(s![.., lm_range.clone()]).t());
            }

            blocks.push(TensorBlock::new(
                values.into_dyn(),
                &samples,
                &components[l..=l],
                &properties,
            )?);
        }

        return Ok(TensorMap::new(keys.finish(), blocks)?);
    }
}
