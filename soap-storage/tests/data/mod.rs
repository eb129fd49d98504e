#![allow(dead_code)]

use metatensor::{LabelValue, TensorBlockRef, TensorMap};

use soap_storage::{SimpleSystem, System, Vector3D, Matrix3};
use soap_storage::systems::UnitCell;
use soap_storage::calculators::soap::SphericalExpansionParameters;

pub fn parameters(max_radial: usize, max_angular: usize, gradients: bool) -> SphericalExpansionParameters {
    let json = format!(r#"{{
        "max_radial": {},
        "max_angular": {},
        "gradients": {},
        "cutoff": 4.0,
        "gaussian_width": 0.4
    }}"#, max_radial, max_angular, gradients);

    SphericalExpansionParameters::from_json(&json).expect("invalid parameters")
}

pub fn single_atom(species: i32) -> SimpleSystem {
    let mut system = SimpleSystem::new(UnitCell::infinite());
    system.add_atom(species, Vector3D::new(0.0, 0.0, 0.0));
    return system;
}

pub fn water() -> SimpleSystem {
    let mut system = SimpleSystem::new(UnitCell::infinite());
    system.add_atom(8, Vector3D::new(0.0, 0.0, 0.0));
    system.add_atom(1, Vector3D::new(0.0, 0.75545, -0.58895));
    system.add_atom(1, Vector3D::new(0.0, -0.75545, -0.58895));
    return system;
}

pub fn formaldehyde() -> SimpleSystem {
    let mut system = SimpleSystem::new(UnitCell::infinite());
    system.add_atom(6, Vector3D::new(0.0, 0.0, 0.0));
    system.add_atom(8, Vector3D::new(0.0, 0.0, 1.2050));
    system.add_atom(1, Vector3D::new(0.0, 0.9429, -0.5876));
    system.add_atom(1, Vector3D::new(0.0, -0.9429, -0.5876));
    return system;
}

pub fn salt_pair() -> SimpleSystem {
    let mut system = SimpleSystem::new(UnitCell::infinite());
    system.add_atom(11, Vector3D::new(0.1, -0.2, 0.3));
    system.add_atom(17, Vector3D::new(1.5, 1.2, 0.9));
    return system;
}

pub fn molecules() -> Vec<Box<dyn System>> {
    vec![
        Box::new(water()) as Box<dyn System>,
        Box::new(formaldehyde()),
        Box::new(salt_pair()),
    ]
}

pub fn rotated(system: &SimpleSystem, rotation: Matrix3) -> SimpleSystem {
    let mut rotated = system.clone();
    for position in rotated.positions_mut() {
        *position = rotation * *position;
    }
    return rotated;
}

pub fn block_for_key<'a>(tensor: &'a TensorMap, key: &[i32]) -> TensorBlockRef<'a> {
    let key = key.iter().copied().map(LabelValue::new).collect::<Vec<_>>();
    let position = tensor.keys().position(&key).expect("missing key");
    return tensor.block_by_id(position);
}
