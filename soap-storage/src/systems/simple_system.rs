use crate::{Error, Vector3D};

use super::{UnitCell, System};

/// A simple implementation of `System` to use when no other is available
#[derive(Clone, Debug)]
pub struct SimpleSystem {
    cell: UnitCell,
    species: Vec<i32>,
    positions: Vec<Vector3D>,
}

impl SimpleSystem {
    /// Create a new empty system with the given unit cell
    pub fn new(cell: UnitCell) -> SimpleSystem {
        SimpleSystem {
            cell: cell,
            species: Vec::new(),
            positions: Vec::new(),
        }
    }

    /// Add an atom with the given species and position to this system
    pub fn add_atom(&mut self, species: i32, position: Vector3D) {
        self.species.push(species);
        self.positions.push(position);
    }

    /// Get a copy of this system where the atomic species are replaced by
    /// `species`, keeping positions and cell unchanged.
    pub fn with_species(&self, species: Vec<i32>) -> Result<SimpleSystem, Error> {
        if species.len() != self.species.len() {
            return Err(Error::InvalidParameter(format!(
                "expected {} species for this system, got {}",
                self.species.len(), species.len()
            )));
        }

        Ok(SimpleSystem {
            cell: self.cell,
            species: species,
            positions: self.positions.clone(),
        })
    }

    /// Get mutable access to the positions of the atoms in this system
    pub fn positions_mut(&mut self) -> &mut [Vector3D] {
        &mut self.positions
    }
}

impl System for SimpleSystem {
    fn size(&self) -> Result<usize, Error> {
        Ok(self.species.len())
    }

    fn positions(&self) -> Result<&[Vector3D], Error> {
        Ok(&self.positions)
    }

    fn species(&self) -> Result<&[i32], Error> {
        Ok(&self.species)
    }

    fn cell(&self) -> Result<UnitCell, Error> {
        Ok(self.cell)
    }
}

impl std::convert::TryFrom<&dyn System> for SimpleSystem {
    type Error = Error;

    fn try_from(system: &dyn System) -> Result<SimpleSystem, Error> {
        let mut new = SimpleSystem::new(system.cell()?);
        for (&species, &position) in system.species()?.iter().zip(system.positions()?) {
            new.add_atom(species, position);
        }
        return Ok(new);
    }
}
