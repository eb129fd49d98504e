use std::ops::Range;

use ndarray::Array2;

use crate::{Error, System};

/// How the external calculator should associate neighbor species with the
/// expansion channels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[derive(serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
pub enum SpeciesExpansion {
    /// One channel for each species present around the current center
    #[serde(rename = "environment wise")]
    EnvironmentWise,
    /// One channel for each species present in the current structure
    #[serde(rename = "structure wise")]
    StructureWise,
    /// One channel for each species in `global_species`, in this order
    #[serde(rename = "user defined")]
    UserDefined,
}

/// Hyper-parameters sent to an [`ExpansionCalculator`].
///
/// The builders in this crate always use
/// [`SpeciesExpansion::UserDefined`], with an explicit list of species.
#[derive(Debug, Clone, PartialEq)]
#[derive(serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
pub struct ExpansionHypers {
    /// Number of radial basis functions
    pub max_radial: usize,
    /// Maximal angular momentum `l` in the expansion
    pub max_angular: usize,
    /// Species to use for the neighbor channels
    pub global_species: Vec<i32>,
    /// How neighbor species are mapped to channels
    pub expansion_by_species_method: SpeciesExpansion,
    /// Should the calculator also compute gradients with respect to positions?
    pub compute_gradients: bool,
    /// Additional, calculator-specific parameters (cutoff, gaussian width, ...)
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ExpansionHypers {
    /// Number of `(l, m)` pairs in the expansion
    pub fn angular_size(&self) -> usize {
        (self.max_angular + 1) * (self.max_angular + 1)
    }

    /// Number of features for a single center, all neighbor species included
    pub fn features_size(&self) -> usize {
        self.global_species.len() * self.max_radial * self.angular_size()
    }

    /// Range of the `(l, m)` features corresponding to `l`, for all values
    /// of `m` from `-l` to `l`.
    pub fn angular_range(l: usize) -> Range<usize> {
        (l * l)..((l + 1) * (l + 1))
    }
}

/// Raw output of an [`ExpansionCalculator`], for all the structures in one
/// call.
///
/// Atom indexes in `info` and `gradients_info` are global: atoms are numbered
/// contiguously across all the structures, in order.
#[derive(Debug, Clone)]
pub struct RawExpansion {
    /// Expansion coefficients, with shape `[n_centers, n_species * max_radial
    /// * (max_angular + 1)^2]`. The features are stored as `[species, n,
    /// (l, m)]` in row-major order.
    pub values: Array2<f64>,
    /// Metadata for the rows of `values`: `[structure, global atom, center
    /// species]`
    pub info: Array2<i32>,
    /// Gradients of the coefficients with respect to the neighbor positions,
    /// with shape `[3 * n_gradients, features]`. Rows `3 * g + x` contains the
    /// derivative along direction `x` for the `g`-th entry in
    /// `gradients_info`. This has zero columns if gradients were not computed.
    pub gradients: Array2<f64>,
    /// Metadata for gradients: `[structure, global center, global neighbor,
    /// center species, neighbor species]`
    pub gradients_info: Array2<i32>,
}

impl RawExpansion {
    /// Does this expansion contains gradients?
    pub fn has_gradients(&self) -> bool {
        self.gradients.ncols() != 0
    }

    /// Check that all the arrays have shapes consistent with `hypers`.
    pub fn validate(&self, hypers: &ExpansionHypers) -> Result<(), Error> {
        let n_features = hypers.features_size();
        if self.values.ncols() != n_features {
            return Err(Error::Calculator(format!(
                "expected {} features per center, got {}",
                n_features, self.values.ncols()
            )));
        }

        if self.info.nrows() != self.values.nrows() || self.info.ncols() < 3 {
            return Err(Error::Calculator(format!(
                "invalid shape for the centers metadata: expected [{}, 3], got {:?}",
                self.values.nrows(), self.info.shape()
            )));
        }

        if self.has_gradients() {
            if self.gradients.ncols() != n_features {
                return Err(Error::Calculator(format!(
                    "expected {} features per gradient row, got {}",
                    n_features, self.gradients.ncols()
                )));
            }

            if self.gradients_info.ncols() < 5 || 3 * self.gradients_info.nrows() != self.gradients.nrows() {
                return Err(Error::Calculator(format!(
                    "invalid shape for the gradients metadata: expected [{}, 5], got {:?}",
                    self.gradients.nrows() / 3, self.gradients_info.shape()
                )));
            }
        }

        Ok(())
    }
}

/// Interface for external calculators of spherical expansion coefficients.
///
/// Implementations are treated as pure functions: calling `compute` twice with
/// the same inputs must give the same results.
pub trait ExpansionCalculator {
    /// Get the name of this calculator
    fn name(&self) -> String;

    /// Compute the spherical expansion for all `systems`, using the given
    /// hyper-parameters.
    fn compute(&mut self, systems: &[Box<dyn System>], hypers: &ExpansionHypers) -> Result<RawExpansion, Error>;
}
