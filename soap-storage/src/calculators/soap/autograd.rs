use std::collections::{BTreeMap, BTreeSet};

use ndarray::{Array2, Axis, Ix3, concatenate};
use rayon::prelude::*;

use metatensor::{LabelsBuilder, TensorBlock, TensorMap};

use crate::{Error, System, SimpleSystem, Vector3D, UnitCell};
use crate::{ExpansionCalculator, ExpansionHypers};

use super::SphericalExpansionParameters;
use super::spherical_expansion::{ChannelsMask, species_keys, species_position, expansion_values};
use super::spherical_expansion::{features_as_4d, spherical_harmonics_m, radial_properties, checked_index};

/// A function with a hand-written backward pass.
///
/// `evaluate` computes the output of the function, together with a context
/// containing everything required to later compute the gradients of the
/// inputs from the gradients of the output in `backpropagate`.
pub trait Differentiable {
    type Input;
    type Output;
    type Context;
    type OutputGradient;
    type InputGradient;

    fn evaluate(&mut self, input: &Self::Input) -> Result<(Self::Output, Self::Context), Error>;

    fn backpropagate(context: &Self::Context, output_gradient: &Self::OutputGradient) -> Result<Self::InputGradient, Error>;
}

/// Which inputs of a [`DifferentiableSystem`] should get gradients during
/// backpropagation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequiredGradients {
    pub calculator: bool,
    pub positions: bool,
    pub cell: bool,
    pub species: bool,
}

/// A single structure used as input of [`SphericalExpansionAutograd`]
#[derive(Debug, Clone)]
pub struct DifferentiableSystem {
    pub positions: Vec<Vector3D>,
    pub cell: UnitCell,
    pub species: Vec<i32>,
    pub required: RequiredGradients,
}

impl DifferentiableSystem {
    pub fn new(system: &dyn System, required: RequiredGradients) -> Result<DifferentiableSystem, Error> {
        Ok(DifferentiableSystem {
            positions: system.positions()?.to_vec(),
            cell: system.cell()?,
            species: system.species()?.to_vec(),
            required: required,
        })
    }

    fn to_system(&self) -> Result<SimpleSystem, Error> {
        if self.positions.len() != self.species.len() {
            return Err(Error::InvalidParameter(format!(
                "got {} positions but {} species", self.positions.len(), self.species.len()
            )));
        }

        let mut system = SimpleSystem::new(self.cell);
        for (&species, &position) in self.species.iter().zip(&self.positions) {
            system.add_atom(species, position);
        }
        return Ok(system);
    }
}

/// Data saved during [`SphericalExpansionAutograd::evaluate`]
#[derive(Debug, Clone)]
pub struct ExpansionContext {
    /// raw gradients from the calculator, `[3 * n_gradients, features]`
    pub gradients: Array2<f64>,
    /// `[structure, center, neighbor, center species, neighbor species]`
    pub gradients_info: Array2<i32>,
    pub n_atoms: usize,
    pub required: RequiredGradients,
}

/// Gradients with respect to the inputs of [`SphericalExpansionAutograd`]
#[derive(Debug, Clone, Default)]
pub struct SystemGradients {
    /// `[n_atoms, 3]`
    pub positions: Option<Array2<f64>>,
}

/// Spherical expansion of a single structure as a [`Differentiable`]
/// function.
///
/// The output is the raw metadata (`[structure, center, species]`) and the
/// dense coefficients for all centers. The backward pass uses the gradients
/// computed by the calculator during the forward pass, so `hypers` must
/// have `compute_gradients` set when position gradients are required.
pub struct SphericalExpansionAutograd<'a> {
    calculator: &'a mut dyn ExpansionCalculator,
    hypers: &'a ExpansionHypers,
}

impl<'a> SphericalExpansionAutograd<'a> {
    pub fn new(calculator: &'a mut dyn ExpansionCalculator, hypers: &'a ExpansionHypers) -> Self {
        SphericalExpansionAutograd { calculator, hypers }
    }
}

impl Differentiable for SphericalExpansionAutograd<'_> {
    type Input = DifferentiableSystem;
    type Output = (Array2<i32>, Array2<f64>);
    type Context = ExpansionContext;
    type OutputGradient = Array2<f64>;
    type InputGradient = SystemGradients;

    fn evaluate(&mut self, input: &DifferentiableSystem) -> Result<(Self::Output, ExpansionContext), Error> {
        let system = input.to_system()?;
        let n_atoms = system.size()?;

        let expansion = self.calculator.compute(&[Box::new(system) as Box<dyn System>], self.hypers)?;
        expansion.validate(self.hypers)?;

        let context = ExpansionContext {
            gradients: expansion.gradients,
            gradients_info: expansion.gradients_info,
            n_atoms: n_atoms,
            required: input.required,
        };

        return Ok(((expansion.info, expansion.values), context));
    }

    fn backpropagate(context: &ExpansionContext, output_gradient: &Array2<f64>) -> Result<SystemGradients, Error> {
        let required = context.required;
        if required.calculator {
            return Err(Error::UnsupportedGradient("can not compute gradients with respect to the calculator".into()));
        }

        if required.cell {
            return Err(Error::UnsupportedGradient("can not compute gradients with respect to the cell".into()));
        }

        if required.species {
            return Err(Error::UnsupportedGradient("can not compute gradients with respect to the atomic species".into()));
        }

        let mut gradients = SystemGradients::default();
        if required.positions {
            if context.gradients.ncols() == 0 {
                return Err(Error::MissingGradients(
                    "the calculator did not compute gradients, set `compute_gradients` to true".into()
                ));
            }

            if output_gradient.ncols() != context.gradients.ncols() {
                return Err(Error::InvalidParameter(format!(
                    "expected {} features in the output gradient, got {}",
                    context.gradients.ncols(), output_gradient.ncols()
                )));
            }

            let mut positions = Array2::zeros((context.n_atoms, 3));
            for (grad_i, info) in context.gradients_info.outer_iter().enumerate() {
                let center = checked_index(info[1])?;
                let neighbor = checked_index(info[2])?;
                if center >= output_gradient.nrows() || neighbor >= context.n_atoms {
                    return Err(Error::Calculator(format!(
                        "invalid gradient metadata: center {} and neighbor {}", center, neighbor
                    )));
                }

                let grad_output = output_gradient.row(center);
                for direction in 0..3 {
                    let gradient = context.gradients.row(3 * grad_i + direction);
                    positions[[neighbor, direction]] += grad_output.dot(&gradient);
                }
            }
            gradients.positions = Some(positions);
        }

        return Ok(gradients);
    }
}

/// Values saved by [`DifferentiableSphericalExpansion::forward`], used by
/// [`DifferentiableSphericalExpansion::backward`]
#[derive(Debug, Clone)]
pub struct ExpansionTape {
    pub contexts: Vec<ExpansionContext>,
    /// for each structure, map from center index to row in the raw values
    rows: Vec<BTreeMap<i32, usize>>,
    global_species: Vec<i32>,
    hypers: ExpansionHypers,
}

/// Spherical expansion of multiple structures, computed one structure at a
/// time with [`SphericalExpansionAutograd`], and stored in the same format as
/// [`super::SphericalExpansion`].
///
/// Instead of storing gradients inside the blocks, this builder records a
/// tape during the forward pass, and can then propagate the gradient of some
/// loss with respect to the coefficients back to the positions of all atoms.
/// Contrary to the gradients of [`super::SphericalExpansion`], the gradients
/// obtained this way are complete.
pub struct DifferentiableSphericalExpansion {
    calculator: Box<dyn ExpansionCalculator>,
    parameters: SphericalExpansionParameters,
}

impl std::fmt::Debug for DifferentiableSphericalExpansion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DifferentiableSphericalExpansion({}, {:?})", self.calculator.name(), self.parameters)
    }
}

impl DifferentiableSphericalExpansion {
    pub fn new(
        calculator: Box<dyn ExpansionCalculator>,
        parameters: SphericalExpansionParameters,
    ) -> Result<DifferentiableSphericalExpansion, Error> {
        parameters.validate()?;
        return Ok(DifferentiableSphericalExpansion { calculator, parameters });
    }

    /// Compute the spherical expansion of all `systems`, and record the data
    /// needed for the backward pass.
    #[time_graph::instrument(name = "DifferentiableSphericalExpansion::forward")]
    pub fn forward(&mut self, systems: &[DifferentiableSystem]) -> Result<(TensorMap, ExpansionTape), Error> {
        let global_species = systems.iter()
            .flat_map(|system| system.species.iter().copied())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect::<Vec<_>>();

        let compute_gradients = self.parameters.gradients || systems.iter().any(|s| s.required.positions);
        let hypers = self.parameters.hypers(global_species.clone(), compute_gradients);

        let mut all_info = Vec::new();
        let mut all_values = Vec::new();
        let mut contexts = Vec::new();
        let mut rows = Vec::new();
        for (structure_i, system) in systems.iter().enumerate() {
            let mut function = SphericalExpansionAutograd::new(&mut *self.calculator, &hypers);
            let ((mut info, values), context) = function.evaluate(system)?;

            info.column_mut(0).fill(structure_i as i32);
            rows.push(info.column(1).iter().enumerate().map(|(row, &center)| (center, row)).collect());

            all_info.push(info);
            all_values.push(values);
            contexts.push(context);
        }

        let n_features = hypers.features_size();
        let info = if all_info.is_empty() {
            Array2::zeros((0, 3))
        } else {
            concatenate(Axis(0), &all_info.iter().map(|a| a.view()).collect::<Vec<_>>())?
        };
        let values = if all_values.is_empty() {
            Array2::zeros((0, n_features))
        } else {
            concatenate(Axis(0), &all_values.iter().map(|a| a.view()).collect::<Vec<_>>())?
        };

        let values = features_as_4d(values.view(), &hypers)?;
        let channels = ChannelsMask::new(&values);

        let keys = species_keys(self.parameters.max_angular, &global_species);
        let properties = radial_properties(self.parameters.max_radial);
        let mut blocks = Vec::with_capacity(keys.count());
        for &[l, species_center, species_neighbor] in keys.iter_fixed_size() {
            let l = l.usize();
            let neighbor_i = species_position(&global_species, species_neighbor.i32())?;
            let centers = channels.centers(&info, species_center.i32(), neighbor_i);

            let mut samples = LabelsBuilder::new(vec!["structure", "center"]);
            for &center in &centers {
                samples.add(&[info[[center, 0]], info[[center, 1]]]);
            }

            blocks.push(TensorBlock::new(
                expansion_values(&values, &centers, l, neighbor_i),
                &samples.finish(),
                &[spherical_harmonics_m(l)],
                &properties,
            )?);
        }

        let tape = ExpansionTape {
            contexts,
            rows,
            global_species,
            hypers,
        };

        return Ok((TensorMap::new(keys, blocks)?, tape));
    }

    /// Propagate the gradient of some loss with respect to the coefficients
    /// (stored in `output_gradient` with the same keys, samples, components
    /// and properties as the output of `forward`) to the inputs of every
    /// structure.
    #[time_graph::instrument(name = "DifferentiableSphericalExpansion::backward")]
    pub fn backward(tape: &ExpansionTape, output_gradient: &TensorMap) -> Result<Vec<SystemGradients>, Error> {
        if output_gradient.keys().names() != ["spherical_harmonics_l", "species_center", "species_neighbor"] {
            return Err(Error::InvalidParameter(format!(
                "invalid keys for the output gradient: {:?}", output_gradient.keys().names()
            )));
        }

        let hypers = &tape.hypers;
        let mut dense = tape.rows.iter()
            .map(|rows| Array2::<f64>::zeros((rows.len(), hypers.features_size())))
            .collect::<Vec<_>>();

        for (key, block) in output_gradient.iter() {
            let l = key[0].usize();
            let neighbor_i = species_position(&tape.global_species, key[2].i32())?;
            let lm_start = ExpansionHypers::angular_range(l).start;
            let values = block.values().to_array().view().into_dimensionality::<Ix3>()?;

            for (sample, sample_values) in block.samples().iter().zip(values.outer_iter()) {
                let structure = sample[0].usize();
                let rows = tape.rows.get(structure).ok_or_else(|| Error::InvalidParameter(format!(
                    "structure {} is out of bounds in the output gradient", structure
                )))?;
                let row = *rows.get(&sample[1].i32()).ok_or_else(|| Error::InvalidParameter(format!(
                    "center {} of structure {} is not part of the forward pass", sample[1].i32(), structure
                )))?;

                let mut dense_row = dense[structure].row_mut(row);
                for ((m, n), &value) in sample_values.indexed_iter() {
                    let feature = (neighbor_i * hypers.max_radial + n) * hypers.angular_size() + lm_start + m;
                    dense_row[feature] += value;
                }
            }
        }

        return tape.contexts.par_iter()
            .zip(&dense)
            .map(|(context, grad_output)| SphericalExpansionAutograd::backpropagate(context, grad_output))
            .collect();
    }
}
