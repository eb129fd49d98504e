use ndarray::{ArrayD, Axis};

use approx::assert_relative_eq;

use metatensor::{LabelValue, TensorBlockRef, TensorMap};

use crate::{System, SimpleSystem};

/// Get the block corresponding to `key` in `tensor`, if any
pub fn block_for_key<'a>(tensor: &'a TensorMap, key: &[i32]) -> Option<TensorBlockRef<'a>> {
    let key = key.iter().copied().map(LabelValue::new).collect::<Vec<_>>();
    let position = tensor.keys().position(&key)?;
    return Some(tensor.block_by_id(position));
}

/// Options for the finite differences check
#[derive(Debug, Clone, Copy)]
pub struct FinalDifferenceOptions {
    /// distance each atom is displaced by
    pub displacement: f64,
    /// maximal relative error
    pub max_relative: f64,
    /// absolute error under which values are considered equal
    pub epsilon: f64,
}

impl Default for FinalDifferenceOptions {
    fn default() -> Self {
        FinalDifferenceOptions {
            displacement: 1e-6,
            max_relative: 1e-5,
            epsilon: 1e-8,
        }
    }
}

fn compute_moved(
    compute: &mut impl FnMut(&[Box<dyn System>]) -> TensorMap,
    system: &SimpleSystem,
    atom: usize,
    direction: usize,
    delta: f64,
) -> TensorMap {
    let mut moved = system.clone();
    moved.positions_mut()[atom][direction] += delta;
    return compute(&[Box::new(moved) as Box<dyn System>]);
}

/// Check that the `"positions"` gradients in the output of `compute` agree
/// with a centered finite differences calculation, for all atoms in `system`.
///
/// The samples of every block must not change when displacing atoms.
pub fn finite_differences(
    mut compute: impl FnMut(&[Box<dyn System>]) -> TensorMap,
    system: &SimpleSystem,
    options: FinalDifferenceOptions,
) {
    let reference = compute(&[Box::new(system.clone()) as Box<dyn System>]);
    let delta = options.displacement;

    for atom in 0..system.size().unwrap() {
        for direction in 0..3 {
            let plus = compute_moved(&mut compute, system, atom, direction, delta);
            let minus = compute_moved(&mut compute, system, atom, direction, -delta);

            for (block_i, block) in reference.blocks().iter().enumerate() {
                let block_plus = plus.block_by_id(block_i);
                let block_minus = minus.block_by_id(block_i);
                assert_eq!(block.samples(), block_plus.samples());
                assert_eq!(block.samples(), block_minus.samples());

                let mut finite_difference = block_plus.values().to_array() - block_minus.values().to_array();
                finite_difference /= 2.0 * delta;

                // dense version of the analytical gradient for this atom and
                // direction
                let gradient = block.gradient("positions").expect("missing positions gradients");
                let gradient_data = gradient.values().to_array();
                let mut expected = ArrayD::zeros(block.values().to_array().shape());
                for (grad_i, grad_sample) in gradient.samples().iter().enumerate() {
                    if grad_sample[2].usize() != atom {
                        continue;
                    }

                    let sample = grad_sample[0].usize();
                    let data = gradient_data.index_axis(Axis(0), grad_i);
                    let data = data.index_axis(Axis(0), direction);
                    expected.index_axis_mut(Axis(0), sample).assign(&data);
                }

                assert_eq!(expected.shape(), finite_difference.shape());
                assert_relative_eq!(
                    finite_difference, expected,
                    epsilon=options.epsilon,
                    max_relative=options.max_relative,
                );
            }
        }
    }
}
