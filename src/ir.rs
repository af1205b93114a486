//! Cell and domain representation shared by both automata.
//!
//! The logical domain never contains ghost cells; ghosts only exist in the
//! extended blocks owned by the halo-exchange engine.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{HalocaError, Result};

/// State of a single cell: 0 (dead) or 1 (alive).
pub type Cell = u8;

/// Ghost cells on each side of an extended block. The stencils are radius 1.
pub const HALO: usize = 1;

pub const DEFAULT_WIDTH: usize = 1024;
pub const DEFAULT_STEPS: usize = 1024;

/// How the coordinator fills the domain before the first step.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum InitialCondition {
    /// All cells dead except the one at index `width / 2`.
    #[default]
    SingleCenter,
    /// Explicit cell values; the length must equal the domain width.
    Cells(Vec<Cell>),
    /// Each cell alive with probability `density`, drawn from a generator
    /// seeded with `seed`.
    Random { seed: u64, density: f64 },
}

impl InitialCondition {
    /// Check that this condition can fill a domain of `len` cells.
    ///
    /// Every rank calls this before any communication so that a bad
    /// configuration fails on all ranks together.
    pub fn validate(&self, len: usize) -> Result<()> {
        match self {
            InitialCondition::SingleCenter => Ok(()),
            InitialCondition::Cells(cells) => {
                if cells.len() != len {
                    return Err(HalocaError::Config(format!(
                        "initial condition has {} cells, domain has {}",
                        cells.len(),
                        len
                    )));
                }
                if let Some(bad) = cells.iter().find(|&&c| c > 1) {
                    return Err(HalocaError::Config(format!(
                        "initial condition contains invalid cell state {bad}"
                    )));
                }
                Ok(())
            }
            InitialCondition::Random { density, .. } => {
                if !(0.0..=1.0).contains(density) {
                    return Err(HalocaError::Config(format!(
                        "density {density} outside [0, 1]"
                    )));
                }
                Ok(())
            }
        }
    }

    /// Materialize the domain of `len` cells.
    pub fn build(&self, len: usize) -> Result<Vec<Cell>> {
        self.validate(len)?;
        let cells = match self {
            InitialCondition::SingleCenter => {
                let mut cells = vec![0; len];
                if len > 0 {
                    cells[len / 2] = 1;
                }
                cells
            }
            InitialCondition::Cells(cells) => cells.clone(),
            InitialCondition::Random { seed, density } => {
                let mut rng = StdRng::seed_from_u64(*seed);
                random_cells(&mut rng, len, *density)
            }
        };
        Ok(cells)
    }
}

/// Draw `len` cells from `rng`, each alive with probability `density`.
///
/// The generator is passed in so callers own its state; nothing here is
/// global or shared between threads.
pub fn random_cells<R: Rng>(rng: &mut R, len: usize, density: f64) -> Vec<Cell> {
    (0..len).map(|_| rng.gen_bool(density) as Cell).collect()
}

/// Number of live cells.
pub fn population(cells: &[Cell]) -> usize {
    cells.iter().filter(|&&c| c != 0).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_center_seeds_middle_cell() {
        let cells = InitialCondition::SingleCenter.build(7).unwrap();
        assert_eq!(cells, vec![0, 0, 0, 1, 0, 0, 0]);
        let cells = InitialCondition::SingleCenter.build(4).unwrap();
        assert_eq!(cells, vec![0, 0, 1, 0]);
    }

    #[test]
    fn explicit_cells_must_match_width() {
        let init = InitialCondition::Cells(vec![1, 0, 1]);
        assert!(init.build(3).is_ok());
        assert!(matches!(init.build(4), Err(HalocaError::Config(_))));
    }

    #[test]
    fn explicit_cells_reject_non_binary_states() {
        let init = InitialCondition::Cells(vec![1, 2, 0]);
        assert!(matches!(init.validate(3), Err(HalocaError::Config(_))));
    }

    #[test]
    fn random_is_reproducible_for_a_seed() {
        let init = InitialCondition::Random { seed: 42, density: 0.5 };
        let a = init.build(256).unwrap();
        let b = init.build(256).unwrap();
        assert_eq!(a, b);
        assert!(a.iter().all(|&c| c <= 1));
        let pop = population(&a);
        assert!(pop > 0 && pop < 256, "population {pop}");
    }

    #[test]
    fn random_density_extremes() {
        let none = InitialCondition::Random { seed: 1, density: 0.0 }.build(64).unwrap();
        assert_eq!(population(&none), 0);
        let all = InitialCondition::Random { seed: 1, density: 1.0 }.build(64).unwrap();
        assert_eq!(population(&all), 64);
    }

    #[test]
    fn random_rejects_bad_density() {
        let init = InitialCondition::Random { seed: 1, density: 1.5 };
        assert!(matches!(init.build(8), Err(HalocaError::Config(_))));
    }
}
