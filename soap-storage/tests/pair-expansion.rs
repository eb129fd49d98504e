use approx::assert_relative_eq;
use ndarray::{Array2, s};

use soap_storage::System;
use soap_storage::calculators::DummyExpansion;
use soap_storage::calculators::soap::{SphericalExpansion, SphericalExpansionByPair};

mod data;

#[test]
fn pairs_samples() {
    let systems = data::molecules();
    let mut builder = SphericalExpansionByPair::new(
        Box::new(DummyExpansion),
        data::parameters(2, 1, false),
    ).unwrap();
    let descriptor = builder.compute(&systems).unwrap();

    assert_eq!(descriptor.keys().names(), ["spherical_harmonics_l"]);
    assert_eq!(descriptor.keys().count(), 2);

    let block = data::block_for_key(&descriptor, &[0]);
    assert_eq!(block.samples().names(), ["structure", "center_i", "center_j"]);
    // all atoms are within the cutoff of each other
    assert_eq!(block.samples().count(), 3 * 3 + 4 * 4 + 2 * 2);

    for sample in block.samples().iter() {
        let n_atoms = systems[sample[0].usize()].size().unwrap();
        assert!(sample[1].usize() < n_atoms);
        assert!(sample[2].usize() < n_atoms);
    }
}

#[test]
fn sum_over_pairs_gives_expansion() {
    let systems = data::molecules();

    let mut pair_builder = SphericalExpansionByPair::new(
        Box::new(DummyExpansion),
        data::parameters(2, 1, false),
    ).unwrap();
    let pairs = pair_builder.compute(&systems).unwrap();

    let mut builder = SphericalExpansion::new(Box::new(DummyExpansion), data::parameters(2, 1, false)).unwrap();
    let expansion = builder.compute(&systems).unwrap();

    for (key, block) in expansion.iter() {
        let l = key[0].usize();
        let species_neighbor = key[2].i32();
        let pair_block = data::block_for_key(&pairs, &[key[0].i32()]);
        let pair_values = pair_block.values().to_array();

        for (sample_i, sample) in block.samples().iter().enumerate() {
            let structure = sample[0].usize();
            let species = systems[structure].species().unwrap();

            let mut sum = Array2::<f64>::zeros((2 * l + 1, 2));
            for (pair_i, pair) in pair_block.samples().iter().enumerate() {
                if pair[0] == sample[0] && pair[1] == sample[1] && species[pair[2].usize()] == species_neighbor {
                    sum += &pair_values.slice(s![pair_i, .., ..]);
                }
            }

            assert_relative_eq!(
                sum, block.values().to_array().slice(s![sample_i, .., ..]),
                epsilon=1e-14, max_relative=1e-12
            );
        }
    }
}

#[test]
fn zero_threshold() {
    let mut parameters = data::parameters(2, 1, false);
    parameters.zero_threshold = 1e300;
    let mut builder = SphericalExpansionByPair::new(Box::new(DummyExpansion), parameters).unwrap();

    let systems: Vec<Box<dyn System>> = vec![Box::new(data::water())];
    let descriptor = builder.compute(&systems).unwrap();
    for block in descriptor.blocks() {
        assert_eq!(block.samples().count(), 0);
    }
}

#[test]
fn gradients_are_rejected() {
    let mut builder = SphericalExpansionByPair::new(
        Box::new(DummyExpansion),
        data::parameters(2, 1, true),
    ).unwrap();

    let error = builder.compute(&data::molecules()).unwrap_err();
    assert_eq!(error.to_string(), "invalid parameter: gradients are not implemented for the pair expansion");
}
