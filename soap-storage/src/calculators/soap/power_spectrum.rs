use log::debug;
use ndarray::{Array2, Array3, Axis, Ix3, Ix4, s};
use ndarray::parallel::prelude::*;

use metatensor::{Labels, LabelsBuilder, LabelValue, TensorBlock, TensorBlockRef, TensorMap};

use crate::Error;
use crate::blocks::slice_samples;

const EXPANSION_KEYS: [&str; 3] = ["spherical_harmonics_l", "species_center", "species_neighbor"];

fn check_keys(spherical_expansion: &TensorMap) -> Result<(), Error> {
    if spherical_expansion.keys().names() != EXPANSION_KEYS {
        return Err(Error::InvalidParameter(format!(
            "expected spherical expansion keys to be [{}], got [{}]",
            EXPANSION_KEYS.join(", "),
            spherical_expansion.keys().names().join(", "),
        )));
    }
    Ok(())
}

/// Compute the SOAP power spectrum, combining the coefficients of
/// `spherical_expansion_1` and `spherical_expansion_2` (or
/// `spherical_expansion_1` with itself if `spherical_expansion_2` is `None`).
///
/// Both spherical expansions must have keys `(spherical_harmonics_l,
/// species_center, species_neighbor)`. For each pair of blocks with the same
/// `l` and center species, the coefficients are contracted over the
/// `spherical_harmonics_m` component for the samples present in both blocks.
/// When combining an expansion with itself, only `species_neighbor_1 <=
/// species_neighbor_2` is computed, and the cross-species invariants are
/// multiplied by `sqrt(2)` to compensate. All values are divided by
/// `sqrt(2l + 1)`.
///
/// The output is keyed by `(species_center, species_neighbor_1,
/// species_neighbor_2)`, with properties `(spherical_harmonics_l, n_1, n_2)`.
/// `"positions"` gradients are computed if both expansions contain them.
#[time_graph::instrument(name = "compute_power_spectrum")]
pub fn compute_power_spectrum(
    spherical_expansion_1: &TensorMap,
    spherical_expansion_2: Option<&TensorMap>,
) -> Result<TensorMap, Error> {
    check_keys(spherical_expansion_1)?;

    let same_expansions = spherical_expansion_2.is_none();
    let spherical_expansion_2 = match spherical_expansion_2 {
        Some(spherical_expansion_2) => {
            check_keys(spherical_expansion_2)?;
            spherical_expansion_2
        }
        None => spherical_expansion_1,
    };

    let mut keys = LabelsBuilder::new(vec![
        "spherical_harmonics_l", "species_center", "species_neighbor_1", "species_neighbor_2"
    ]);
    let mut blocks = Vec::new();
    for (key_1, block_1) in spherical_expansion_1.iter() {
        let (l, species_center, species_neighbor_1) = (key_1[0], key_1[1], key_1[2]);

        for (key_2, block_2) in spherical_expansion_2.iter() {
            let species_neighbor_2 = key_2[2];
            if key_2[0] != l || key_2[1] != species_center {
                continue;
            }

            // (n1, n2) and (n2, n1) give the same invariants
            if same_expansions && species_neighbor_1.i32() > species_neighbor_2.i32() {
                continue;
            }

            let l_factor = f64::sqrt((2 * l.usize() + 1) as f64);
            let factor = if species_neighbor_1 == species_neighbor_2 {
                1.0 / l_factor
            } else {
                std::f64::consts::SQRT_2 / l_factor
            };

            let contracted = match common_samples(&block_1, &block_2)? {
                Some((sliced_1, sliced_2)) => contract_blocks(&sliced_1.as_ref(), &sliced_2.as_ref(), factor)?,
                None => contract_blocks(&block_1, &block_2, factor)?,
            };

            match contracted {
                Some(block) => {
                    keys.add(&[l, species_center, species_neighbor_1, species_neighbor_2]);
                    blocks.push(block);
                }
                None => {
                    debug!(
                        "skipping power spectrum block for l={}, species_center={}, \
                        species_neighbor_1={}, species_neighbor_2={}: one of the \
                        positions gradients is empty",
                        l.i32(), species_center.i32(), species_neighbor_1.i32(), species_neighbor_2.i32()
                    );
                }
            }
        }
    }

    if blocks.is_empty() {
        let keys = Labels::empty(vec!["species_center", "species_neighbor_1", "species_neighbor_2"]);
        return Ok(TensorMap::new(keys, blocks)?);
    }

    let power_spectrum = TensorMap::new(keys.finish(), blocks)?;
    let keys_to_move = Labels::empty(vec!["spherical_harmonics_l"]);
    return Ok(power_spectrum.keys_to_properties(&keys_to_move, /* sort_samples */ true)?);
}

/// Restrict both blocks to the samples they have in common. This returns
/// `None` if the blocks already have the same samples.
fn common_samples(
    block_1: &TensorBlockRef<'_>,
    block_2: &TensorBlockRef<'_>,
) -> Result<Option<(TensorBlock, TensorBlock)>, Error> {
    let samples_1 = block_1.samples();
    let samples_2 = block_2.samples();
    if samples_1 == samples_2 {
        return Ok(None);
    }

    let common = samples_1.intersection(&samples_2, None, None)?;
    return Ok(Some((
        slice_samples(block_1, &common)?,
        slice_samples(block_2, &common)?,
    )));
}

/// Union of the gradient samples of two blocks, sorted
fn sorted_union(samples_1: &Labels, samples_2: &Labels) -> Result<Labels, Error> {
    let union = samples_1.union(samples_2, None, None)?;

    let mut rows = union.iter()
        .map(|row| row.iter().map(|v| v.i32()).collect::<Vec<_>>())
        .collect::<Vec<_>>();
    rows.sort_unstable();

    let mut builder = LabelsBuilder::new(union.names());
    for row in &rows {
        builder.add(row);
    }
    return Ok(builder.finish());
}

fn product_properties(properties_1: &Labels, properties_2: &Labels) -> Labels {
    let names_1 = properties_1.names().iter().map(|name| format!("{}_1", name)).collect::<Vec<_>>();
    let names_2 = properties_2.names().iter().map(|name| format!("{}_2", name)).collect::<Vec<_>>();

    let names = names_1.iter().chain(&names_2).map(|name| &**name).collect();
    let mut properties = LabelsBuilder::new(names);
    let mut row = Vec::<LabelValue>::with_capacity(properties_1.size() + properties_2.size());
    for property_1 in properties_1.iter() {
        for property_2 in properties_2.iter() {
            row.clear();
            row.extend_from_slice(property_1);
            row.extend_from_slice(property_2);
            properties.add(&row);
        }
    }
    return properties.finish();
}

/// Contract two blocks with the same samples over their
/// `spherical_harmonics_m` component. This returns `None` if both blocks have
/// positions gradients, but one of them has no gradient samples.
fn contract_blocks(
    block_1: &TensorBlockRef<'_>,
    block_2: &TensorBlockRef<'_>,
    factor: f64,
) -> Result<Option<TensorBlock>, Error> {
    let samples = block_1.samples();
    debug_assert_eq!(samples, block_2.samples());

    let values_1 = block_1.values().to_array().view().into_dimensionality::<Ix3>()?;
    let values_2 = block_2.values().to_array().view().into_dimensionality::<Ix3>()?;
    if values_1.shape()[1] != values_2.shape()[1] {
        return Err(Error::InvalidParameter(format!(
            "can not combine blocks with {} and {} spherical harmonics components",
            values_1.shape()[1], values_2.shape()[1]
        )));
    }

    let properties = product_properties(&block_1.properties(), &block_2.properties());
    let n_properties_2 = block_2.properties().count();

    let mut values = Array2::zeros((samples.count(), properties.count()));
    values.axis_iter_mut(Axis(0))
        .into_par_iter()
        .enumerate()
        .for_each(|(sample_i, mut value)| {
            let value_1 = values_1.index_axis(Axis(0), sample_i);
            let value_2 = values_2.index_axis(Axis(0), sample_i);

            let product = value_1.t().dot(&value_2);
            for ((property_1, property_2), &v) in product.indexed_iter() {
                value[property_1 * n_properties_2 + property_2] = factor * v;
            }
        });

    let mut block = TensorBlock::new(values.into_dyn(), &samples, &[], &properties)?;

    let (gradient_1, gradient_2) = match (block_1.gradient("positions"), block_2.gradient("positions")) {
        (Some(gradient_1), Some(gradient_2)) => (gradient_1, gradient_2),
        _ => return Ok(Some(block)),
    };

    let gradient_samples_1 = gradient_1.samples();
    let gradient_samples_2 = gradient_2.samples();
    if gradient_samples_1.is_empty() || gradient_samples_2.is_empty() {
        return Ok(None);
    }

    let components_1 = gradient_1.components();
    let direction = &components_1[0];
    if direction.names() != ["direction"] || gradient_2.components()[0] != *direction {
        return Err(Error::InvalidParameter(
            "the first component of positions gradients must be 'direction'".into()
        ));
    }

    let gradient_samples = sorted_union(&gradient_samples_1, &gradient_samples_2)?;
    // each gradient sample is present at most once in each block
    let rows_1 = gradient_samples.iter().map(|s| gradient_samples_1.position(s)).collect::<Vec<_>>();
    let rows_2 = gradient_samples.iter().map(|s| gradient_samples_2.position(s)).collect::<Vec<_>>();
    let parents = gradient_samples.iter().map(|s| s[0].usize()).collect::<Vec<_>>();

    let data_1 = gradient_1.values().to_array().view().into_dimensionality::<Ix4>()?;
    let data_2 = gradient_2.values().to_array().view().into_dimensionality::<Ix4>()?;

    let mut data = Array3::zeros((gradient_samples.count(), 3, properties.count()));
    data.axis_iter_mut(Axis(0))
        .into_par_iter()
        .enumerate()
        .for_each(|(grad_i, mut gradient)| {
            let sample = parents[grad_i];

            if let Some(row_1) = rows_1[grad_i] {
                let value_2 = values_2.index_axis(Axis(0), sample);
                for (xyz, mut gradient_xyz) in gradient.outer_iter_mut().enumerate() {
                    let grad_1 = data_1.slice(s![row_1, xyz, .., ..]);
                    let product = grad_1.t().dot(&value_2);
                    for ((property_1, property_2), &v) in product.indexed_iter() {
                        gradient_xyz[property_1 * n_properties_2 + property_2] += factor * v;
                    }
                }
            }

            if let Some(row_2) = rows_2[grad_i] {
                let value_1 = values_1.index_axis(Axis(0), sample);
                for (xyz, mut gradient_xyz) in gradient.outer_iter_mut().enumerate() {
                    let grad_2 = data_2.slice(s![row_2, xyz, .., ..]);
                    let product = value_1.t().dot(&grad_2);
                    for ((property_1, property_2), &v) in product.indexed_iter() {
                        gradient_xyz[property_1 * n_properties_2 + property_2] += factor * v;
                    }
                }
            }
        });

    block.add_gradient("positions", TensorBlock::new(
        data.into_dyn(),
        &gradient_samples,
        &[direction.clone()],
        &properties,
    )?)?;

    return Ok(Some(block));
}
