use std::collections::{BTreeMap, BTreeSet};

use indexmap::IndexMap;
use log::warn;
use ndarray::{Array3, Array4, ArrayD, ArrayView2, ArrayView4, Axis, s};

use metatensor::{Labels, LabelsBuilder, TensorBlock, TensorMap};

use crate::{Error, System};
use crate::{ExpansionCalculator, ExpansionHypers, RawExpansion, SpeciesExpansion};

use super::GlobalAtomIndex;

fn default_zero_threshold() -> f64 {
    1e-20
}

/// Parameters for the spherical expansion builders.
///
/// Any additional parameter is forwarded to the external calculator as part
/// of [`ExpansionHypers::extra`].
#[derive(Debug, Clone, PartialEq)]
#[derive(serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
pub struct SphericalExpansionParameters {
    /// Number of radial basis function to use
    pub max_radial: usize,
    /// Maximal angular momentum `l` to use
    pub max_angular: usize,
    /// Should we also compute gradients with respect to positions?
    #[serde(default)]
    pub gradients: bool,
    /// Pairs of atoms with a squared norm of the coefficients below this
    /// threshold are removed from the pair expansion
    #[serde(default = "default_zero_threshold")]
    pub zero_threshold: f64,
    /// Parameters specific to the external calculator
    #[serde(flatten)]
    pub calculator: serde_json::Map<String, serde_json::Value>,
}

impl SphericalExpansionParameters {
    /// Create parameters with the default values for everything except
    /// `max_radial` and `max_angular`
    pub fn new(max_radial: usize, max_angular: usize) -> SphericalExpansionParameters {
        SphericalExpansionParameters {
            max_radial,
            max_angular,
            gradients: false,
            zero_threshold: default_zero_threshold(),
            calculator: serde_json::Map::new(),
        }
    }

    /// Read the parameters from a JSON string
    pub fn from_json(json: &str) -> Result<SphericalExpansionParameters, Error> {
        let parameters = serde_json::from_str::<SphericalExpansionParameters>(json)?;
        parameters.validate()?;
        return Ok(parameters);
    }

    pub(crate) fn validate(&self) -> Result<(), Error> {
        if self.max_radial == 0 {
            return Err(Error::InvalidParameter("max_radial must be at least 1".into()));
        }

        if !(self.zero_threshold >= 0.0 && self.zero_threshold.is_finite()) {
            return Err(Error::InvalidParameter(format!(
                "zero_threshold must be a positive number, got {}", self.zero_threshold
            )));
        }

        Ok(())
    }

    /// Get the hyper-parameters for the external calculator
    pub(crate) fn hypers(&self, global_species: Vec<i32>, compute_gradients: bool) -> ExpansionHypers {
        ExpansionHypers {
            max_radial: self.max_radial,
            max_angular: self.max_angular,
            global_species: global_species,
            expansion_by_species_method: SpeciesExpansion::UserDefined,
            compute_gradients: compute_gradients,
            extra: self.calculator.clone(),
        }
    }
}

/// Spherical expansion coefficients, stored in blocks indexed by
/// `(spherical_harmonics_l, species_center, species_neighbor)`.
///
/// The coefficients are computed by an external [`ExpansionCalculator`] for
/// all structures at once, and then moved around to follow the block
/// storage. Inside each block, samples are `(structure, center)` pairs, where
/// `center` is the index of the atom inside its structure; components are
/// `spherical_harmonics_m` and properties are the radial index `n`.
///
/// A block `(l, species_center, species_neighbor)` only contains the centers
/// with at least one non-zero coefficient for `species_neighbor`, so blocks
/// with the same center species can have different samples.
///
/// When gradients are requested, each block also contains a `"positions"`
/// gradient, with samples `(sample, structure, atom)`.
///
/// **Warning**: gradient rows which are exactly zero are removed, and the
/// derivative of the coefficients in a neighbor species channel with respect
/// to the position of a center of a different species are dropped. This
/// means that the gradients are only complete for single species structures,
/// and will not match finite differences in general.
pub struct SphericalExpansion {
    calculator: Box<dyn ExpansionCalculator>,
    parameters: SphericalExpansionParameters,
}

impl std::fmt::Debug for SphericalExpansion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SphericalExpansion({}, {:?})", self.calculator.name(), self.parameters)
    }
}

impl SphericalExpansion {
    pub fn new(
        calculator: Box<dyn ExpansionCalculator>,
        parameters: SphericalExpansionParameters,
    ) -> Result<SphericalExpansion, Error> {
        parameters.validate()?;
        return Ok(SphericalExpansion { calculator, parameters });
    }

    pub fn parameters(&self) -> &SphericalExpansionParameters {
        &self.parameters
    }

    /// Compute the spherical expansion of all `systems`
    #[time_graph::instrument(name = "SphericalExpansion::compute")]
    pub fn compute(&mut self, systems: &[Box<dyn System>]) -> Result<TensorMap, Error> {
        let global_species = global_species(systems)?;
        if global_species.is_empty() {
            // no atoms, and so no keys
            let keys = species_keys(self.parameters.max_angular, &global_species);
            return Ok(TensorMap::new(keys, Vec::new())?);
        }

        let hypers = self.parameters.hypers(global_species.clone(), self.parameters.gradients);

        if self.parameters.gradients {
            warn!(
                "gradients of the spherical expansion built from raw calculator \
                output are incomplete, and will not match finite differences for \
                structures with multiple species"
            );
        }

        let expansion = self.calculator.compute(systems, &hypers)?;
        expansion.validate(&hypers)?;

        if self.parameters.gradients && !expansion.has_gradients() {
            return Err(Error::MissingGradients(format!(
                "gradients were requested, but the {} calculator did not compute them",
                self.calculator.name()
            )));
        }

        let atom_index = GlobalAtomIndex::new(systems)?;
        let values = features_as_4d(expansion.values.view(), &hypers)?;
        let channels = ChannelsMask::new(&values);

        let gradients = if self.parameters.gradients {
            Some(GradientsLookup::new(&expansion, &hypers)?)
        } else {
            None
        };

        let keys = species_keys(self.parameters.max_angular, &global_species);
        let properties = radial_properties(self.parameters.max_radial);
        let mut blocks = Vec::with_capacity(keys.count());
        for &[l, species_center, species_neighbor] in keys.iter_fixed_size() {
            let l = l.usize();
            let species_center = species_center.i32();
            let species_neighbor = species_neighbor.i32();
            let neighbor_i = species_position(&global_species, species_neighbor)?;

            let centers = channels.centers(&expansion.info, species_center, neighbor_i);

            let mut samples = LabelsBuilder::new(vec!["structure", "center"]);
            for &center in &centers {
                let structure = expansion.info[[center, 0]];
                let global_atom = checked_index(expansion.info[[center, 1]])?;
                let (atom_structure, local_atom) = atom_index.structure_and_local(global_atom)?;
                if atom_structure as i32 != structure {
                    return Err(Error::Calculator(format!(
                        "atom {} is in structure {} according to the calculator, but in structure {} according to the systems",
                        global_atom, structure, atom_structure
                    )));
                }
                samples.add(&[structure, local_atom as i32]);
            }

            let components = [spherical_harmonics_m(l)];
            let mut block = TensorBlock::new(
                expansion_values(&values, &centers, l, neighbor_i),
                &samples.finish(),
                &components,
                &properties,
            )?;

            if let Some(ref gradients) = gradients {
                let (data, gradient_samples) = gradients.block_gradients(
                    &expansion.info, &atom_index, &centers, l, neighbor_i, species_neighbor
                )?;

                block.add_gradient("positions", TensorBlock::new(
                    data,
                    &gradient_samples,
                    &[direction(), components[0].clone()],
                    &properties,
                )?)?;
            }

            blocks.push(block);
        }

        return Ok(TensorMap::new(keys, blocks)?);
    }
}

/// Get the sorted list of all species in these systems
pub(super) fn global_species(systems: &[Box<dyn System>]) -> Result<Vec<i32>, Error> {
    let mut all_species = BTreeSet::new();
    for system in systems {
        all_species.extend(system.species()?.iter().copied());
    }
    return Ok(all_species.into_iter().collect());
}

/// Keys for all `(l, species_center, species_neighbor)` combinations
pub(super) fn species_keys(max_angular: usize, species: &[i32]) -> Labels {
    let mut keys = LabelsBuilder::new(vec!["spherical_harmonics_l", "species_center", "species_neighbor"]);
    for l in 0..=max_angular {
        for &species_center in species {
            for &species_neighbor in species {
                keys.add(&[l as i32, species_center, species_neighbor]);
            }
        }
    }
    return keys.finish();
}

pub(super) fn species_position(species: &[i32], value: i32) -> Result<usize, Error> {
    species.iter().position(|&s| s == value).ok_or_else(|| Error::Internal(format!(
        "species {} is missing from the global species list", value
    )))
}

pub(super) fn spherical_harmonics_m(l: usize) -> Labels {
    let l = l as i32;
    let mut component = LabelsBuilder::new(vec!["spherical_harmonics_m"]);
    for m in -l..=l {
        component.add(&[m]);
    }
    return component.finish();
}

pub(super) fn radial_properties(max_radial: usize) -> Labels {
    let mut properties = LabelsBuilder::new(vec!["n"]);
    for n in 0..max_radial {
        properties.add(&[n]);
    }
    return properties.finish();
}

pub(super) fn direction() -> Labels {
    Labels::new(["direction"], &[[0], [1], [2]])
}

pub(super) fn checked_index(value: i32) -> Result<usize, Error> {
    usize::try_from(value).map_err(|_| Error::Calculator(format!(
        "got a negative atom index ({}) from the calculator", value
    )))
}

/// View the features of a raw expansion as `[rows, species, n, (l, m)]`
pub(super) fn features_as_4d<'a>(features: ArrayView2<'a, f64>, hypers: &ExpansionHypers) -> Result<ArrayView4<'a, f64>, Error> {
    let shape = (
        features.nrows(),
        hypers.global_species.len(),
        hypers.max_radial,
        hypers.angular_size(),
    );
    return Ok(features.into_shape_with_order(shape)?);
}

/// Extract the values for `l` in the neighbor channel `neighbor_i`, for the
/// given `centers`, as an array of shape `[centers, 2l + 1, n]`
pub(super) fn expansion_values(values: &ArrayView4<f64>, centers: &[usize], l: usize, neighbor_i: usize) -> ArrayD<f64> {
    let lm_start = ExpansionHypers::angular_range(l).start;
    let max_radial = values.shape()[2];

    let array = Array3::from_shape_fn((centers.len(), 2 * l + 1, max_radial), |(sample, m, n)| {
        values[[centers[sample], neighbor_i, n, lm_start + m]]
    });

    return array.into_dyn();
}

/// Track which centers have non-zero coefficients for each neighbor species
/// channel
pub(super) struct ChannelsMask {
    /// `non_zero[center][species]`
    non_zero: Vec<Vec<bool>>,
}

impl ChannelsMask {
    pub(super) fn new(values: &ArrayView4<f64>) -> ChannelsMask {
        let non_zero = values.outer_iter().map(|center| {
            center.outer_iter().map(|channel| channel.iter().any(|&v| v != 0.0)).collect()
        }).collect();

        ChannelsMask { non_zero }
    }

    /// Get all the rows in `info` for centers of species `species_center`
    /// with a non-zero contribution in the `neighbor_i` channel
    pub(super) fn centers(&self, info: &ndarray::Array2<i32>, species_center: i32, neighbor_i: usize) -> Vec<usize> {
        info.outer_iter()
            .enumerate()
            .filter(|(row, info)| info[2] == species_center && self.non_zero[*row][neighbor_i])
            .map(|(row, _)| row)
            .collect()
    }
}

/// Pre-computed lookup from `(structure, global center, neighbor species)` to
/// the corresponding rows in the raw gradients
struct GradientsLookup<'a> {
    gradients: ArrayView4<'a, f64>,
    gradients_info: &'a ndarray::Array2<i32>,
    rows: BTreeMap<(i32, i32, i32), Vec<usize>>,
    max_radial: usize,
}

impl<'a> GradientsLookup<'a> {
    fn new(expansion: &'a RawExpansion, hypers: &ExpansionHypers) -> Result<GradientsLookup<'a>, Error> {
        let mut rows = BTreeMap::<_, Vec<usize>>::new();
        for (grad_i, info) in expansion.gradients_info.outer_iter().enumerate() {
            rows.entry((info[0], info[1], info[4])).or_default().push(grad_i);
        }

        Ok(GradientsLookup {
            gradients: features_as_4d(expansion.gradients.view(), hypers)?,
            gradients_info: &expansion.gradients_info,
            rows: rows,
            max_radial: hypers.max_radial,
        })
    }

    /// Collect the gradients for a single block
    fn block_gradients(
        &self,
        info: &ndarray::Array2<i32>,
        atom_index: &GlobalAtomIndex,
        centers: &[usize],
        l: usize,
        neighbor_i: usize,
        species_neighbor: i32,
    ) -> Result<(ArrayD<f64>, Labels), Error> {
        let lm_range = ExpansionHypers::angular_range(l);

        // the same (sample, structure, atom) can appear multiple times if the
        // calculator reports multiple periodic images of the same neighbor
        let mut accumulated = IndexMap::<[i32; 3], Array3<f64>>::new();
        for (sample_i, &center) in centers.iter().enumerate() {
            let structure = info[[center, 0]];
            let global_center = info[[center, 1]];

            let grad_rows = match self.rows.get(&(structure, global_center, species_neighbor)) {
                Some(rows) => rows,
                None => continue,
            };

            for &grad_i in grad_rows {
                let gradient = self.gradients.slice(s![
                    (3 * grad_i)..(3 * grad_i + 3), neighbor_i, .., lm_range.clone()
                ]);

                if gradient.iter().all(|&v| v == 0.0) {
                    continue;
                }

                let neighbor = atom_index.local(checked_index(self.gradients_info[[grad_i, 2]])?)?;
                let gradient_sample = [sample_i as i32, structure, neighbor as i32];

                let entry = accumulated.entry(gradient_sample).or_insert_with(|| {
                    Array3::zeros((3, 2 * l + 1, self.max_radial))
                });
                // gradient is stored as [xyz, n, m], we want [xyz, m, n]
                *entry += &gradient.permuted_axes([0, 2, 1]);
            }
        }

        let mut samples = LabelsBuilder::new(vec!["sample", "structure", "atom"]);
        let mut data = Array4::zeros((accumulated.len(), 3, 2 * l + 1, self.max_radial));
        for (row, (gradient_sample, gradient)) in accumulated.iter().enumerate() {
            samples.add(gradient_sample);
            data.index_axis_mut(Axis(0), row).assign(gradient);
        }

        return Ok((data.into_dyn(), samples.finish()));
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use ndarray::{Axis, s};

    use metatensor::LabelValue;

    use crate::systems::test_utils::{test_systems, test_system};
    use crate::calculators::DummyExpansion;
    use crate::calculators::tests_utils::{block_for_key, finite_differences, FinalDifferenceOptions};
    use crate::{Error, System, SimpleSystem, UnitCell};

    use super::{SphericalExpansion, SphericalExpansionParameters};

    fn v(i: i32) -> LabelValue { LabelValue::new(i) }

    fn builder(gradients: bool) -> SphericalExpansion {
        let mut parameters = SphericalExpansionParameters::new(3, 1);
        parameters.gradients = gradients;
        parameters.calculator.insert("cutoff".into(), 3.5.into());
        SphericalExpansion::new(Box::new(DummyExpansion), parameters).unwrap()
    }

    #[test]
    fn parameters() {
        let parameters = SphericalExpansionParameters::from_json(r#"{
            "max_radial": 4,
            "max_angular": 1,
            "cutoff": 2.5
        }"#).unwrap();

        assert_eq!(parameters.max_radial, 4);
        assert_eq!(parameters.max_angular, 1);
        assert!(!parameters.gradients);
        assert_eq!(parameters.zero_threshold, 1e-20);
        assert_eq!(parameters.calculator["cutoff"], 2.5);

        let hypers = parameters.hypers(vec![1, 8], true);
        assert_eq!(hypers.global_species, [1, 8]);
        assert!(hypers.compute_gradients);
        assert_eq!(hypers.extra["cutoff"], 2.5);

        let error = SphericalExpansionParameters::from_json(r#"{
            "max_radial": 0,
            "max_angular": 1
        }"#).unwrap_err();
        assert_eq!(error.to_string(), "invalid parameter: max_radial must be at least 1");

        let error = SphericalExpansionParameters::from_json(r#"{"max_angular": 1}"#).unwrap_err();
        assert!(matches!(error, Error::Json(_)));
    }

    #[test]
    fn keys_and_shapes() {
        let mut builder = builder(false);
        let descriptor = builder.compute(&test_systems(&["water"])).unwrap();

        assert_eq!(descriptor.keys().names(), ["spherical_harmonics_l", "species_center", "species_neighbor"]);
        assert_eq!(descriptor.keys().count(), 8);
        assert_eq!(descriptor.keys()[0], [v(0), v(-42), v(-42)]);
        assert_eq!(descriptor.keys()[7], [v(1), v(1), v(1)]);

        for (key, block) in descriptor.iter() {
            let l = key[0].usize();
            assert_eq!(block.samples().names(), ["structure", "center"]);
            assert_eq!(block.components().len(), 1);
            assert_eq!(block.components()[0].names(), ["spherical_harmonics_m"]);
            assert_eq!(block.components()[0].count(), 2 * l + 1);
            assert_eq!(block.properties().names(), ["n"]);
            assert_eq!(block.properties().count(), 3);
            assert_eq!(block.values().to_array().shape(), [block.samples().count(), 2 * l + 1, 3]);
            assert!(block.gradient("positions").is_none());
        }

        let block = block_for_key(&descriptor, &[1, 1, 1]).unwrap();
        assert_eq!(block.samples().iter().collect::<Vec<_>>(), [[v(0), v(1)], [v(0), v(2)]]);

        let block = block_for_key(&descriptor, &[0, -42, 1]).unwrap();
        assert_eq!(block.samples().iter().collect::<Vec<_>>(), [[v(0), v(0)]]);
    }

    #[test]
    fn multiple_structures() {
        let mut builder = builder(false);
        let descriptor = builder.compute(&test_systems(&["H", "O"])).unwrap();

        assert_eq!(descriptor.keys().count(), 8);

        // cross species blocks are empty, while blocks with the same center
        // species and another neighbor species contain the isolated atom
        for species in [[1, 8], [8, 1]] {
            for l in 0..=1 {
                let block = block_for_key(&descriptor, &[l, species[0], species[1]]).unwrap();
                assert_eq!(block.samples().count(), 0);
                assert_eq!(block.values().to_array().shape(), [0, 2 * l as usize + 1, 3]);

                let block = block_for_key(&descriptor, &[l, species[0], species[0]]).unwrap();
                assert_eq!(block.samples().count(), 1);
            }
        }

        let block = block_for_key(&descriptor, &[0, 1, 1]).unwrap();
        assert_eq!(block.samples().iter().collect::<Vec<_>>(), [[v(0), v(0)]]);
        // isolated atom only see itself
        for &value in block.values().to_array() {
            assert_relative_eq!(value, 0.28209479177387814);
        }

        let block = block_for_key(&descriptor, &[1, 8, 8]).unwrap();
        assert_eq!(block.samples().iter().collect::<Vec<_>>(), [[v(1), v(0)]]);
        for &value in block.values().to_array() {
            assert_eq!(value, 0.0);
        }
    }

    #[test]
    fn no_atoms() {
        let empty = SimpleSystem::new(UnitCell::infinite());
        let systems = [Box::new(empty) as Box<dyn System>];

        for gradients in [false, true] {
            let mut builder = builder(gradients);

            let descriptor = builder.compute(&[]).unwrap();
            assert_eq!(descriptor.keys().names(), ["spherical_harmonics_l", "species_center", "species_neighbor"]);
            assert_eq!(descriptor.keys().count(), 0);

            let descriptor = builder.compute(&systems).unwrap();
            assert_eq!(descriptor.keys().count(), 0);
        }
    }

    #[test]
    fn gradients() {
        let mut builder = builder(true);
        let descriptor = builder.compute(&test_systems(&["water"])).unwrap();

        for block in descriptor.blocks() {
            let gradient = block.gradient("positions").unwrap();
            assert_eq!(gradient.samples().names(), ["sample", "structure", "atom"]);
            assert_eq!(gradient.components().len(), 2);
            assert_eq!(gradient.components()[0].names(), ["direction"]);
            assert_eq!(gradient.components()[1], block.components()[0]);

            let data = gradient.values().to_array();
            for (grad_i, grad_sample) in gradient.samples().iter().enumerate() {
                assert!(grad_sample[0].usize() < block.samples().count());
                let data = data.index_axis(Axis(0), grad_i);
                assert!(data.iter().any(|&v| v != 0.0));
            }
        }

        // H centers with O neighbors get the derivative with respect to the
        // position of the O atom
        let block = block_for_key(&descriptor, &[0, 1, -42]).unwrap();
        let gradient = block.gradient("positions").unwrap();
        assert_eq!(
            gradient.samples().iter().collect::<Vec<_>>(),
            [[v(0), v(0), v(0)], [v(1), v(0), v(0)]]
        );

        // the dummy radial functions are decreasing, and the O atom is above
        // both H atoms, so moving it up decreases the l = 0 coefficients of H
        let data = gradient.values().to_array();
        for n in 0..3 {
            assert!(data[[0, 2, 0, n]] < 0.0);
            assert!(data[[1, 2, 0, n]] < 0.0);
        }
        assert_relative_eq!(
            data.slice(s![0, 2, .., ..]),
            data.slice(s![1, 2, .., ..]),
            max_relative=1e-12
        );
    }

    #[test]
    fn finite_differences_single_species() {
        let mut builder = builder(true);
        let system = test_system("H2");
        finite_differences(
            |systems| builder.compute(systems).unwrap(),
            &system,
            FinalDifferenceOptions::default(),
        );
    }

    #[test]
    fn missing_gradients() {
        use crate::ExpansionCalculator;

        struct NoGradients;
        impl ExpansionCalculator for NoGradients {
            fn name(&self) -> String {
                "no gradients".into()
            }

            fn compute(
                &mut self,
                systems: &[Box<dyn crate::System>],
                hypers: &crate::ExpansionHypers,
            ) -> Result<crate::RawExpansion, Error> {
                let mut hypers = hypers.clone();
                hypers.compute_gradients = false;
                DummyExpansion.compute(systems, &hypers)
            }
        }

        let mut parameters = SphericalExpansionParameters::new(2, 0);
        parameters.gradients = true;
        let mut builder = SphericalExpansion::new(Box::new(NoGradients), parameters).unwrap();
        let error = builder.compute(&test_systems(&["H2"])).unwrap_err();
        assert_eq!(
            error.to_string(),
            "missing gradients: gradients were requested, but the no gradients calculator did not compute them"
        );
    }
}
