//! 2D anneal automaton on a periodic grid.
//!
//! The grid is stored with a one-cell halo on all four sides: logical cell
//! `(x, y)` lives at extended coordinates `(x + 1, y + 1)` of a
//! `(width + 2) x (height + 2)` row-major buffer. Before every step the halo
//! is refreshed from the opposite edges (`copy_top_bottom`, then
//! `copy_left_right`, which also fills the corners), then the grid is
//! evaluated tile by tile in parallel.

use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;

use crate::error::{HalocaError, Result};
use crate::ir::{population, random_cells, Cell, HALO};
use crate::rule::anneal;

use super::partition::TileGrid;
use super::step::DoubleBuffer;

pub const DEFAULT_STEPS: usize = 64;
pub const DEFAULT_SIDE: usize = 512;
pub const DEFAULT_TILE: usize = 16;
pub const DEFAULT_DENSITY: f64 = 0.5;

/// Logical (ghost-free) 2D grid, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grid {
    pub width: usize,
    pub height: usize,
    pub cells: Vec<Cell>,
}

impl Grid {
    pub fn new(width: usize, height: usize, cells: Vec<Cell>) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(HalocaError::Config(format!(
                "grid dimensions must be positive, got {width}x{height}"
            )));
        }
        if cells.len() != width * height {
            return Err(HalocaError::Config(format!(
                "grid {width}x{height} needs {} cells, got {}",
                width * height,
                cells.len()
            )));
        }
        Ok(Self { width, height, cells })
    }

    /// Grid with every cell set to `value`.
    pub fn filled(width: usize, height: usize, value: Cell) -> Result<Self> {
        Self::new(width, height, vec![value; width * height])
    }

    pub fn get(&self, x: usize, y: usize) -> Cell {
        self.cells[y * self.width + x]
    }

    pub fn row(&self, y: usize) -> &[Cell] {
        &self.cells[y * self.width..(y + 1) * self.width]
    }

    pub fn population(&self) -> usize {
        population(&self.cells)
    }
}

/// How the anneal grid is seeded.
#[derive(Debug, Clone, PartialEq)]
pub enum GridInit {
    /// Each cell alive with probability `density`.
    Random { seed: u64, density: f64 },
    /// A prepared grid; its dimensions override the configured ones.
    Grid(Grid),
}

impl Default for GridInit {
    fn default() -> Self {
        GridInit::Random {
            seed: 0,
            density: DEFAULT_DENSITY,
        }
    }
}

/// Parameters of one anneal run.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnealConfig {
    pub width: usize,
    pub height: usize,
    pub steps: usize,
    /// Side of the square tiles evaluated as one parallel task.
    pub tile: usize,
    pub initial: GridInit,
}

impl Default for AnnealConfig {
    fn default() -> Self {
        Self {
            width: DEFAULT_SIDE,
            height: DEFAULT_SIDE,
            steps: DEFAULT_STEPS,
            tile: DEFAULT_TILE,
            initial: GridInit::default(),
        }
    }
}

impl AnnealConfig {
    /// Grid dimensions after applying the initial condition.
    pub fn dimensions(&self) -> (usize, usize) {
        match &self.initial {
            GridInit::Grid(g) => (g.width, g.height),
            GridInit::Random { .. } => (self.width, self.height),
        }
    }

    /// Check dimensions, tile and density without allocating the grid.
    pub fn validate(&self) -> Result<()> {
        let (width, height) = self.dimensions();
        if width == 0 || height == 0 {
            return Err(HalocaError::Config(format!(
                "grid dimensions must be positive, got {width}x{height}"
            )));
        }
        extended_len(width, height)?;
        TileGrid::new(width, height, self.tile)?;
        if let GridInit::Random { density, .. } = self.initial {
            if !(0.0..=1.0).contains(&density) {
                return Err(HalocaError::Config(format!(
                    "density {density} outside [0, 1]"
                )));
            }
        }
        Ok(())
    }

    /// Build the starting grid.
    pub fn initial_grid(&self) -> Result<Grid> {
        self.validate()?;
        match &self.initial {
            GridInit::Grid(g) => Ok(g.clone()),
            GridInit::Random { seed, density } => {
                let mut rng = StdRng::seed_from_u64(*seed);
                let cells = random_cells(&mut rng, self.width * self.height, *density);
                Grid::new(self.width, self.height, cells)
            }
        }
    }
}

/// Cells in the `(width + 2) x (height + 2)` extended buffer.
pub fn extended_len(width: usize, height: usize) -> Result<usize> {
    width
        .checked_add(2 * HALO)
        .zip(height.checked_add(2 * HALO))
        .and_then(|(w, h)| w.checked_mul(h))
        .ok_or_else(|| {
            HalocaError::Resource(format!("grid of {width}x{height} cells is too large"))
        })
}

/// Copy `grid` into the interior of a fresh extended buffer.
pub fn extend(grid: &Grid) -> Vec<Cell> {
    let ext_w = grid.width + 2 * HALO;
    let mut ext = vec![0; ext_w * (grid.height + 2 * HALO)];
    for y in 0..grid.height {
        let dst = (y + HALO) * ext_w + HALO;
        ext[dst..dst + grid.width].copy_from_slice(grid.row(y));
    }
    ext
}

/// Extract the interior of an extended buffer.
pub fn interior(ext: &[Cell], width: usize, height: usize) -> Grid {
    let ext_w = width + 2 * HALO;
    let mut cells = Vec::with_capacity(width * height);
    for y in 0..height {
        let src = (y + HALO) * ext_w + HALO;
        cells.extend_from_slice(&ext[src..src + width]);
    }
    Grid {
        width,
        height,
        cells,
    }
}

/// Fill the top ghost row from the bottom interior row and vice versa.
/// Only interior columns are copied; corners are left to `copy_left_right`.
pub fn copy_top_bottom(ext: &mut [Cell], width: usize, height: usize) {
    let ext_w = width + 2 * HALO;
    let cols = HALO..HALO + width;
    let top_ghost = 0;
    let top_real = HALO * ext_w;
    let bottom_real = height * ext_w;
    let bottom_ghost = (height + HALO) * ext_w;
    for x in cols {
        ext[top_ghost + x] = ext[bottom_real + x];
        ext[bottom_ghost + x] = ext[top_real + x];
    }
}

/// Fill the left ghost column from the rightmost interior column and vice
/// versa, over every extended row including the ghost rows, so it must run
/// after `copy_top_bottom` for the corners to be correct.
pub fn copy_left_right(ext: &mut [Cell], width: usize, height: usize) {
    let ext_w = width + 2 * HALO;
    for row in ext.chunks_exact_mut(ext_w).take(height + 2 * HALO) {
        row[0] = row[width];
        row[width + HALO] = row[HALO];
    }
}

/// Evaluate one anneal step from `cur` into `next` (both extended buffers
/// with fresh halos in `cur`).
///
/// Bands of `tile` rows run in parallel; within a band each tile first
/// copies its neighbourhood (tile plus halo) into a private scratch tile and
/// only then sums the 9-cell neighbourhoods. Ghosts of `next` are not
/// written.
pub fn step(cur: &[Cell], next: &mut [Cell], tiles: &TileGrid, width: usize, height: usize) {
    let ext_w = width + 2 * HALO;
    assert_eq!(cur.len(), ext_w * (height + 2 * HALO), "extended buffer size");
    assert_eq!(cur.len(), next.len(), "double buffers differ in length");

    // Bands are `tile` rows high and tiles never exceed the grid, so the
    // scratch is at most the size of `cur`.
    let (max_w, max_h) = tiles.max_tile_extent();
    let side = max_w + 2 * HALO;
    let band_rows = tiles.tile_size().min(height);
    let interior_rows = &mut next[HALO * ext_w..(height + HALO) * ext_w];
    interior_rows
        .par_chunks_mut(band_rows * ext_w)
        .enumerate()
        .for_each(|(ty, band)| {
            let mut scratch: Vec<Cell> = vec![0; side * (max_h + 2 * HALO)];
            for t in tiles.row(ty) {
                let sw = t.width + 2 * HALO;
                let sh = t.height + 2 * HALO;
                // Load: extended rows t.y .. t.y + sh, columns t.x .. t.x + sw.
                for dy in 0..sh {
                    let src = (t.y + dy) * ext_w + t.x;
                    scratch[dy * side..dy * side + sw].copy_from_slice(&cur[src..src + sw]);
                }
                // Evaluate.
                for ly in 0..t.height {
                    let out_row = &mut band[ly * ext_w..(ly + 1) * ext_w];
                    for lx in 0..t.width {
                        let mut live = 0u32;
                        for dy in 0..3 {
                            let base = (ly + dy) * side + lx;
                            live += scratch[base..base + 3].iter().map(|&c| c as u32).sum::<u32>();
                        }
                        out_row[t.x + lx + HALO] = anneal(live);
                    }
                }
            }
        });
}

/// Run the anneal automaton for `config.steps` steps and return the final
/// grid.
pub fn run(config: &AnnealConfig) -> Result<Grid> {
    let grid = config.initial_grid()?;
    let (width, height) = (grid.width, grid.height);
    let tiles = TileGrid::new(width, height, config.tile)?;
    let _span = tracing::info_span!(
        "anneal_run",
        width,
        height,
        steps = config.steps,
        tile = config.tile
    )
    .entered();
    tracing::debug!(
        tiles_x = tiles.tiles_x(),
        tiles_y = tiles.tiles_y(),
        population = grid.population(),
        "anneal grid initialised"
    );

    let mut buffers = DoubleBuffer::from_cells(extend(&grid));
    for s in 0..config.steps {
        copy_top_bottom(buffers.current_mut(), width, height);
        copy_left_right(buffers.current_mut(), width, height);
        {
            let (cur, next) = buffers.split();
            step(cur, next, &tiles, width, height);
        }
        buffers.swap();
        tracing::trace!(step = s, "anneal step complete");
    }

    Ok(interior(buffers.current(), width, height))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Direct evaluation on the torus, no halo or tiles.
    fn reference_step(grid: &Grid) -> Grid {
        let (w, h) = (grid.width, grid.height);
        let mut cells = vec![0; w * h];
        for y in 0..h {
            for x in 0..w {
                let mut live = 0u32;
                for dy in [h - 1, 0, 1] {
                    for dx in [w - 1, 0, 1] {
                        live += grid.get((x + dx) % w, (y + dy) % h) as u32;
                    }
                }
                cells[y * w + x] = anneal(live);
            }
        }
        Grid::new(w, h, cells).unwrap()
    }

    fn sample_grid(w: usize, h: usize, seed: u64) -> Grid {
        let mut rng = StdRng::seed_from_u64(seed);
        Grid::new(w, h, random_cells(&mut rng, w * h, 0.5)).unwrap()
    }

    #[test]
    fn halo_fill_wraps_edges_and_corners() {
        // 3x2 grid:
        //   1 2 3
        //   4 5 6
        let grid = Grid::new(3, 2, vec![1, 2, 3, 4, 5, 6]).unwrap();
        let mut ext = extend(&grid);
        copy_top_bottom(&mut ext, 3, 2);
        copy_left_right(&mut ext, 3, 2);
        #[rustfmt::skip]
        let expected = vec![
            6, 4, 5, 6, 4,
            3, 1, 2, 3, 1,
            6, 4, 5, 6, 4,
            3, 1, 2, 3, 1,
        ];
        assert_eq!(ext, expected);
    }

    #[test]
    fn tiled_step_matches_reference() {
        for (w, h, tile) in [(7, 5, 3), (16, 16, 16), (20, 9, 4), (5, 5, 8)] {
            let grid = sample_grid(w, h, (w * 31 + h) as u64);
            let tiles = TileGrid::new(w, h, tile).unwrap();
            let mut cur = extend(&grid);
            let mut next = vec![0; cur.len()];
            copy_top_bottom(&mut cur, w, h);
            copy_left_right(&mut cur, w, h);
            step(&cur, &mut next, &tiles, w, h);
            assert_eq!(interior(&next, w, h), reference_step(&grid), "{w}x{h} tile {tile}");
        }
    }

    #[test]
    fn all_dead_and_all_alive_are_fixed_points() {
        for value in [0, 1] {
            let grid = Grid::filled(12, 10, value).unwrap();
            let config = AnnealConfig {
                steps: 25,
                tile: 4,
                initial: GridInit::Grid(grid.clone()),
                ..AnnealConfig::default()
            };
            assert_eq!(run(&config).unwrap(), grid);
        }
    }

    #[test]
    fn tile_size_does_not_change_result() {
        let grid = sample_grid(33, 17, 9);
        let run_with = |tile| {
            run(&AnnealConfig {
                steps: 10,
                tile,
                initial: GridInit::Grid(grid.clone()),
                ..AnnealConfig::default()
            })
            .unwrap()
        };
        assert_eq!(run_with(1), run_with(16));
        assert_eq!(run_with(5), run_with(64));
    }

    #[test]
    fn zero_steps_returns_initial_grid() {
        let grid = sample_grid(8, 8, 3);
        let config = AnnealConfig {
            steps: 0,
            initial: GridInit::Grid(grid.clone()),
            ..AnnealConfig::default()
        };
        assert_eq!(run(&config).unwrap(), grid);
    }

    #[test]
    fn random_init_uses_configured_dimensions() {
        let config = AnnealConfig {
            width: 20,
            height: 10,
            steps: 1,
            ..AnnealConfig::default()
        };
        let g = run(&config).unwrap();
        assert_eq!((g.width, g.height), (20, 10));
        assert_eq!(config.dimensions(), (20, 10));
    }

    #[test]
    fn tile_larger_than_grid_runs() {
        let grid = sample_grid(8, 8, 4);
        let huge = run(&AnnealConfig {
            steps: 2,
            tile: 2_000_000,
            initial: GridInit::Grid(grid.clone()),
            ..AnnealConfig::default()
        })
        .unwrap();
        let small = run(&AnnealConfig {
            steps: 2,
            tile: 3,
            initial: GridInit::Grid(grid),
            ..AnnealConfig::default()
        })
        .unwrap();
        assert_eq!(huge, small);
    }

    #[test]
    fn oversize_dimensions_are_resource_errors() {
        let config = AnnealConfig {
            width: usize::MAX / 2,
            height: 3,
            ..AnnealConfig::default()
        };
        assert!(matches!(config.validate(), Err(HalocaError::Resource(_))));
        assert!(matches!(extended_len(usize::MAX, 1), Err(HalocaError::Resource(_))));
        assert_eq!(extended_len(3, 2).unwrap(), 20);
    }

    #[test]
    fn validate_rejects_bad_density_and_tile() {
        let bad_density = AnnealConfig {
            initial: GridInit::Random { seed: 0, density: 1.5 },
            ..AnnealConfig::default()
        };
        assert!(matches!(bad_density.validate(), Err(HalocaError::Config(_))));
        let bad_tile = AnnealConfig {
            tile: 0,
            ..AnnealConfig::default()
        };
        assert!(matches!(bad_tile.validate(), Err(HalocaError::Config(_))));
    }

    #[test]
    fn grid_rejects_wrong_cell_count() {
        assert!(matches!(Grid::new(3, 3, vec![0; 8]), Err(HalocaError::Config(_))));
        assert!(matches!(Grid::new(0, 3, vec![]), Err(HalocaError::Config(_))));
    }
}
