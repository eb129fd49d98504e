use std::f64::consts::PI;

use log::{info, warn};
use ndarray::Array2;

use crate::{Error, System, Vector3D};
use crate::{ExpansionCalculator, ExpansionHypers, RawExpansion, SpeciesExpansion};

/// A simple spherical expansion used to test the builders in this crate, and
/// to run examples without an external calculator.
///
/// For each pair of atoms `i-j` closer than the cutoff (including the `i-i`
/// pair), the coefficients of center `i` in the channel of the species of `j`
/// receive
///
/// `R_n(r_ij) S_lm(r_ij)`, where `R_n(r) = exp(-r^2 / (2 (σ (n + 1))^2)) f_c(r)`
///
/// `f_c` is a cosine cutoff function and `S_lm` are the real solid harmonics.
/// Only `l <= 1` is supported. Periodic boundary conditions are ignored.
///
/// Gradients follow the same layout as librascal: for each center, there is a
/// first `center-center` row containing the derivative with respect to the
/// position of the center, and then one row for each neighbor.
#[doc(hidden)]
#[derive(Debug, Clone, Default)]
pub struct DummyExpansion;

/// Parameters read from `ExpansionHypers::extra`
struct DummyParameters {
    cutoff: f64,
    gaussian_width: f64,
}

impl DummyParameters {
    fn from_hypers(hypers: &ExpansionHypers) -> Result<DummyParameters, Error> {
        let get = |name: &str, default: f64| -> Result<f64, Error> {
            match hypers.extra.get(name) {
                None => Ok(default),
                Some(value) => value.as_f64().ok_or_else(|| Error::InvalidParameter(format!(
                    "expected '{}' to be a number, got {}", name, value
                ))),
            }
        };

        let cutoff = get("cutoff", 3.0)?;
        let gaussian_width = get("gaussian_width", 0.5)?;
        if !(cutoff > 0.0 && cutoff.is_finite()) {
            return Err(Error::InvalidParameter(format!("cutoff must be a positive number, got {}", cutoff)));
        }

        if !(gaussian_width > 0.0 && gaussian_width.is_finite()) {
            return Err(Error::InvalidParameter(format!("gaussian_width must be a positive number, got {}", gaussian_width)));
        }

        Ok(DummyParameters { cutoff, gaussian_width })
    }

    fn cutoff_function(&self, r: f64) -> (f64, f64) {
        if r >= self.cutoff {
            return (0.0, 0.0);
        }
        let s = PI * r / self.cutoff;
        (0.5 * (1.0 + f64::cos(s)), -0.5 * PI / self.cutoff * f64::sin(s))
    }

    /// Get the value and derivative of the radial function `n` at `r`
    fn radial(&self, n: usize, r: f64) -> (f64, f64) {
        let sigma = self.gaussian_width * (n + 1) as f64;
        let gaussian = f64::exp(-r * r / (2.0 * sigma * sigma));
        let (fc, dfc) = self.cutoff_function(r);

        (gaussian * fc, gaussian * dfc - r / (sigma * sigma) * gaussian * fc)
    }
}

const Y_00: f64 = 0.28209479177387814;
const Y_1M: f64 = 0.4886025119029199;

/// Real solid harmonics for `l <= 1`, in the (l, m) order, and their gradient
fn solid_harmonics(r: Vector3D) -> ([f64; 4], [Vector3D; 4]) {
    let values = [Y_00, Y_1M * r[1], Y_1M * r[2], Y_1M * r[0]];
    let gradients = [
        Vector3D::zero(),
        Vector3D::new(0.0, Y_1M, 0.0),
        Vector3D::new(0.0, 0.0, Y_1M),
        Vector3D::new(Y_1M, 0.0, 0.0),
    ];
    (values, gradients)
}

impl ExpansionCalculator for DummyExpansion {
    fn name(&self) -> String {
        "dummy spherical expansion".into()
    }

    #[time_graph::instrument(name = "DummyExpansion::compute")]
    fn compute(&mut self, systems: &[Box<dyn System>], hypers: &ExpansionHypers) -> Result<RawExpansion, Error> {
        if hypers.expansion_by_species_method != SpeciesExpansion::UserDefined {
            return Err(Error::InvalidParameter(
                "the dummy expansion only supports 'user defined' species expansion".into()
            ));
        }

        if hypers.max_angular > 1 {
            return Err(Error::InvalidParameter(format!(
                "the dummy expansion only supports max_angular <= 1, got {}", hypers.max_angular
            )));
        }

        let parameters = DummyParameters::from_hypers(hypers)?;

        let n_angular = hypers.angular_size();
        let max_radial = hypers.max_radial;
        let feature = |species_i: usize, n: usize, lm: usize| {
            (species_i * max_radial + n) * n_angular + lm
        };

        let mut n_centers = 0;
        for system in systems {
            n_centers += system.size()?;
        }
        if n_centers > 1000 {
            info!("running the dummy expansion on {} centers, this will be slow", n_centers);
        }

        let mut values = Array2::zeros((n_centers, hypers.features_size()));
        let mut info = Array2::zeros((n_centers, 3));
        let mut gradients_rows = Vec::new();
        let mut gradients_info = Vec::new();

        let mut global_offset = 0;
        for (structure_i, system) in systems.iter().enumerate() {
            let species = system.species()?;
            let positions = system.positions()?;
            if !system.cell()?.is_infinite() {
                warn!("the dummy expansion ignores periodic boundary conditions");
            }

            let mut species_index = Vec::with_capacity(species.len());
            for &s in species {
                let index = hypers.global_species.iter().position(|&g| g == s).ok_or_else(|| {
                    Error::InvalidParameter(format!("species {} is missing from global_species", s))
                })?;
                species_index.push(index);
            }

            for center in 0..species.len() {
                let row = global_offset + center;
                info[[row, 0]] = structure_i as i32;
                info[[row, 1]] = row as i32;
                info[[row, 2]] = species[center];

                // gradient with respect to the center position is the opposite
                // of the sum of all neighbor contributions
                let mut self_gradient = Array2::zeros((3, hypers.features_size()));
                let mut neighbor_gradients = Vec::new();

                for neighbor in 0..species.len() {
                    let vector = positions[neighbor] - positions[center];
                    let distance = vector.norm();
                    if neighbor != center && distance >= parameters.cutoff {
                        continue;
                    }

                    let (harmonics, harmonics_gradients) = solid_harmonics(vector);

                    let mut gradient = Array2::zeros((3, hypers.features_size()));
                    for n in 0..max_radial {
                        let (radial, radial_derivative) = parameters.radial(n, distance);
                        for lm in 0..n_angular {
                            let f = feature(species_index[neighbor], n, lm);
                            values[[row, f]] += radial * harmonics[lm];

                            if neighbor != center && hypers.compute_gradients {
                                let direction = vector * (1.0 / distance);
                                let derivative = radial_derivative * harmonics[lm] * direction
                                    + radial * harmonics_gradients[lm];
                                for x in 0..3 {
                                    gradient[[x, f]] = derivative[x];
                                    self_gradient[[x, f]] -= derivative[x];
                                }
                            }
                        }
                    }

                    if neighbor != center {
                        neighbor_gradients.push((neighbor, gradient));
                    }
                }

                if hypers.compute_gradients {
                    gradients_info.push([
                        structure_i as i32, row as i32, row as i32, species[center], species[center]
                    ]);
                    gradients_rows.push(self_gradient);

                    for (neighbor, gradient) in neighbor_gradients {
                        gradients_info.push([
                            structure_i as i32,
                            row as i32,
                            (global_offset + neighbor) as i32,
                            species[center],
                            species[neighbor],
                        ]);
                        gradients_rows.push(gradient);
                    }
                }
            }

            global_offset += species.len();
        }

        let (gradients, gradients_info) = if hypers.compute_gradients {
            let mut gradients = Array2::zeros((3 * gradients_rows.len(), hypers.features_size()));
            for (grad_i, rows) in gradients_rows.iter().enumerate() {
                gradients.slice_mut(ndarray::s![(3 * grad_i)..(3 * grad_i + 3), ..]).assign(rows);
            }

            let mut info = Array2::zeros((gradients_info.len(), 5));
            for (grad_i, row) in gradients_info.iter().enumerate() {
                for (j, &value) in row.iter().enumerate() {
                    info[[grad_i, j]] = value;
                }
            }
            (gradients, info)
        } else {
            (Array2::zeros((0, 0)), Array2::zeros((0, 5)))
        };

        return Ok(RawExpansion {
            values,
            info,
            gradients,
            gradients_info,
        });
    }
}
