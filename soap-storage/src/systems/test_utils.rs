use crate::{System, Vector3D};
use super::{UnitCell, SimpleSystem};

pub fn test_systems(names: &[&str]) -> Vec<Box<dyn System>> {
    return names.iter()
        .map(|&name| Box::new(test_system(name)) as Box<dyn System>)
        .collect();
}

pub fn test_system(name: &str) -> SimpleSystem {
    match name {
        "methane" => get_methane(),
        "water" => get_water(),
        "CH" => get_ch(),
        "H2" => get_h2(),
        "H" => get_single("H"),
        "O" => get_single("O"),
        _ => panic!("unknown test system {}", name)
    }
}

fn get_methane() -> SimpleSystem {
    let mut system = SimpleSystem::new(UnitCell::cubic(5.0));
    system.add_atom(6, Vector3D::new(5.0000, 5.0000, 5.0000));
    system.add_atom(1, Vector3D::new(5.5288, 5.1610, 5.9359));
    system.add_atom(1, Vector3D::new(5.2051, 5.8240, 4.3214));
    system.add_atom(1, Vector3D::new(5.3345, 4.0686, 4.5504));
    system.add_atom(1, Vector3D::new(3.9315, 4.9463, 5.1921));
    return system;
}

fn get_water() -> SimpleSystem {
    let mut system = SimpleSystem::new(UnitCell::cubic(10.0));
    // species do not have to be atomic number
    system.add_atom(-42, Vector3D::new(0.0, 0.0, 0.0));
    system.add_atom(1, Vector3D::new(0.0, 0.75545, -0.58895));
    system.add_atom(1, Vector3D::new(0.0, -0.75545, -0.58895));
    return system;
}

fn get_ch() -> SimpleSystem {
    let mut system = SimpleSystem::new(UnitCell::cubic(10.0));
    system.add_atom(6, Vector3D::new(0.0, 0.0, 0.0));
    system.add_atom(1, Vector3D::new(0.0, 1.2, 0.0));
    return system;
}

fn get_h2() -> SimpleSystem {
    let mut system = SimpleSystem::new(UnitCell::infinite());
    system.add_atom(1, Vector3D::new(0.0, 0.0, 0.0));
    system.add_atom(1, Vector3D::new(0.3, 0.5, 0.4));
    return system;
}

fn get_single(element: &str) -> SimpleSystem {
    let species = match element {
        "H" => 1,
        "O" => 8,
        _ => unreachable!(),
    };

    let mut system = SimpleSystem::new(UnitCell::infinite());
    system.add_atom(species, Vector3D::new(0.0, 0.0, 0.0));
    return system;
}
