use crate::{Error, System};

/// Conversion from the global atom indexes used by external calculators (all
/// atoms in all structures numbered contiguously) to `(structure, atom)`
/// pairs, where the atom index is local to the structure.
#[derive(Debug, Clone)]
pub struct GlobalAtomIndex {
    /// global index of the first atom in each structure
    starts: Vec<usize>,
    /// total number of atoms
    n_atoms: usize,
}

impl GlobalAtomIndex {
    pub fn new(systems: &[Box<dyn System>]) -> Result<GlobalAtomIndex, Error> {
        let mut sizes = Vec::with_capacity(systems.len());
        for system in systems {
            sizes.push(system.size()?);
        }
        Ok(GlobalAtomIndex::from_sizes(&sizes))
    }

    /// Create the index from the number of atoms in each structure
    pub fn from_sizes(sizes: &[usize]) -> GlobalAtomIndex {
        let mut starts = Vec::with_capacity(sizes.len());
        let mut n_atoms = 0;
        for &size in sizes {
            starts.push(n_atoms);
            n_atoms += size;
        }

        GlobalAtomIndex { starts, n_atoms }
    }

    /// Get the structure containing the atom with the given `global` index,
    /// and the index of this atom inside the structure.
    pub fn structure_and_local(&self, global: usize) -> Result<(usize, usize), Error> {
        if global >= self.n_atoms {
            return Err(Error::Internal(format!(
                "global atom index {} is out of bounds, there are only {} atoms",
                global, self.n_atoms
            )));
        }

        // empty structures share their start with the next one, so we look
        // for the last structure starting at or before `global`
        let structure = self.starts.partition_point(|&start| start <= global) - 1;
        return Ok((structure, global - self.starts[structure]));
    }

    /// Get the index of the atom with the given `global` index inside its
    /// structure
    pub fn local(&self, global: usize) -> Result<usize, Error> {
        self.structure_and_local(global).map(|(_, local)| local)
    }
}
