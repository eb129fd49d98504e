use crate::{Error, Vector3D};

mod cell;
pub use self::cell::{UnitCell, CellShape};

mod simple_system;
pub use self::simple_system::SimpleSystem;

#[cfg(test)]
pub(crate) mod test_utils;

/// A `System` deals with the storage of atoms and related information.
///
/// This is the interface used to pass structures to the external spherical
/// expansion calculators.
pub trait System: Send + Sync {
    /// Get the unit cell for this system
    fn cell(&self) -> Result<UnitCell, Error>;

    /// Get the number of atoms in this system
    fn size(&self) -> Result<usize, Error>;

    /// Get the atomic species for all atoms in this system. The returned
    /// value must be a slice of length `self.size()`, where each different
    /// atomic species is identified with a different integer value. These
    /// values are usually the atomic number, but don't have to be.
    fn species(&self) -> Result<&[i32], Error>;

    /// Get the positions for all atoms in this system. The returned value must
    /// be a slice of length `self.size()` containing the Cartesian coordinates
    /// of all atoms in the system.
    fn positions(&self) -> Result<&[Vector3D], Error>;
}
