//! Operations on metatensor blocks which are not provided by metatensor
//! itself.

use ndarray::Axis;

use metatensor::{Labels, LabelsBuilder, LabelValue, TensorBlock, TensorBlockRef};

use crate::Error;

/// Get a new block containing only the samples of `block` which are also in
/// `selection`.
///
/// The new samples follow the order of `selection`, skipping entries which
/// are not present in the block. Gradient rows are kept if their parent
/// sample is kept, and their `sample` dimension is updated to point to the
/// new position of the parent sample.
pub fn slice_samples(block: &TensorBlockRef<'_>, selection: &Labels) -> Result<TensorBlock, Error> {
    let samples = block.samples();
    if selection.names() != samples.names() {
        return Err(Error::InvalidParameter(format!(
            "can not select samples with names [{}] in a block with samples [{}]",
            selection.names().join(", "), samples.names().join(", ")
        )));
    }

    let mut kept = Vec::new();
    let mut new_samples = LabelsBuilder::new(samples.names());
    for selected in selection.iter() {
        if let Some(position) = samples.position(selected) {
            kept.push(position);
            new_samples.add(selected);
        }
    }

    let mut new_positions = vec![None; samples.count()];
    for (new, &old) in kept.iter().enumerate() {
        new_positions[old] = Some(new);
    }

    let mut sliced = TensorBlock::new(
        block.values().to_array().select(Axis(0), &kept),
        &new_samples.finish(),
        &block.components(),
        &block.properties(),
    )?;

    for parameter in block.gradient_list() {
        let gradient = block.gradient(parameter).ok_or_else(|| Error::Internal(format!(
            "missing {} gradient in block", parameter
        )))?;
        let gradient_samples = gradient.samples();

        let mut kept_rows = Vec::new();
        let mut new_gradient_samples = LabelsBuilder::new(gradient_samples.names());
        let mut row = Vec::with_capacity(gradient_samples.size());
        for (row_i, gradient_sample) in gradient_samples.iter().enumerate() {
            if let Some(new_sample) = new_positions[gradient_sample[0].usize()] {
                row.clear();
                row.push(LabelValue::from(new_sample));
                row.extend_from_slice(&gradient_sample[1..]);

                new_gradient_samples.add(&row);
                kept_rows.push(row_i);
            }
        }

        sliced.add_gradient(parameter, TensorBlock::new(
            gradient.values().to_array().select(Axis(0), &kept_rows),
            &new_gradient_samples.finish(),
            &gradient.components(),
            &gradient.properties(),
        )?)?;
    }

    return Ok(sliced);
}
