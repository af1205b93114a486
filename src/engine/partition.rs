//! Domain partitioning and ring topology.
//!
//! A 1D domain of `width` cells is striped into one contiguous block per
//! worker with floor-division bounds, so sizes differ by at most one cell.
//! 2D grids are covered by square tiles instead.

use crate::error::{HalocaError, Result};

/// Half-open range `[start, end)` of logical cells owned by one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRange {
    pub start: usize,
    pub end: usize,
}

impl BlockRange {
    pub fn size(&self) -> usize {
        self.end - self.start
    }
}

/// Whether uneven blocks are accepted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PartitionPolicy {
    /// Any worker count up to the width; sizes differ by at most one.
    #[default]
    Balanced,
    /// The width must be a multiple of the worker count.
    Exact,
}

/// Assignment of a 1D domain to workers, indexed by rank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    width: usize,
    blocks: Vec<BlockRange>,
}

impl Partition {
    /// Split `width` cells across `workers` ranks.
    ///
    /// Worker `r` owns `[width*r/workers, width*(r+1)/workers)`.
    pub fn new(width: usize, workers: usize, policy: PartitionPolicy) -> Result<Self> {
        if workers == 0 {
            return Err(HalocaError::Config("worker count must be positive".into()));
        }
        if width == 0 {
            return Err(HalocaError::Config("domain width must be positive".into()));
        }
        if workers > width {
            return Err(HalocaError::Config(format!(
                "domain width ({width}) is smaller than the worker count ({workers})"
            )));
        }
        if policy == PartitionPolicy::Exact && width % workers != 0 {
            return Err(HalocaError::Config(format!(
                "domain width ({width}) must be a multiple of the worker count ({workers})"
            )));
        }

        let blocks = (0..workers)
            .map(|r| BlockRange {
                start: width * r / workers,
                end: width * (r + 1) / workers,
            })
            .collect();

        Ok(Self { width, blocks })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn num_workers(&self) -> usize {
        self.blocks.len()
    }

    pub fn blocks(&self) -> &[BlockRange] {
        &self.blocks
    }

    /// Block owned by `rank`.
    pub fn block(&self, rank: usize) -> Result<BlockRange> {
        self.blocks.get(rank).copied().ok_or_else(|| {
            HalocaError::Topology(format!(
                "rank {rank} outside partition of {} workers",
                self.blocks.len()
            ))
        })
    }
}

/// Position of one worker on the logical ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingTopology {
    rank: usize,
    size: usize,
}

impl RingTopology {
    pub fn new(rank: usize, size: usize) -> Result<Self> {
        if size == 0 || rank >= size {
            return Err(HalocaError::Topology(format!(
                "rank {rank} outside ring of {size} workers"
            )));
        }
        Ok(Self { rank, size })
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// `(rank + 1) mod size`.
    pub fn next(&self) -> usize {
        (self.rank + 1) % self.size
    }

    /// `(rank - 1 + size) mod size`.
    pub fn prev(&self) -> usize {
        (self.rank + self.size - 1) % self.size
    }
}

/// A rectangular tile of a 2D grid, in logical (ghost-free) coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tile {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

/// Cover of a `width x height` grid by square tiles of side `tile`.
///
/// Tiles in the last row and column are clipped to the grid. A requested
/// side larger than the grid is reduced to the larger grid dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileGrid {
    width: usize,
    height: usize,
    tile: usize,
}

impl TileGrid {
    pub fn new(width: usize, height: usize, tile: usize) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(HalocaError::Config(format!(
                "grid dimensions must be positive, got {width}x{height}"
            )));
        }
        if tile == 0 {
            return Err(HalocaError::Config("tile size must be positive".into()));
        }
        // A tile never needs to be larger than the grid.
        let tile = tile.min(width.max(height));
        Ok(Self { width, height, tile })
    }

    pub fn tile_size(&self) -> usize {
        self.tile
    }

    /// Width and height of the largest tile actually produced.
    pub fn max_tile_extent(&self) -> (usize, usize) {
        (self.tile.min(self.width), self.tile.min(self.height))
    }

    pub fn tiles_x(&self) -> usize {
        self.width.div_ceil(self.tile)
    }

    pub fn tiles_y(&self) -> usize {
        self.height.div_ceil(self.tile)
    }

    /// Tiles in one row of tiles, left to right.
    pub fn row(&self, ty: usize) -> impl Iterator<Item = Tile> + '_ {
        let y = ty * self.tile;
        let height = self.tile.min(self.height.saturating_sub(y));
        (0..self.tiles_x()).map(move |tx| {
            let x = tx * self.tile;
            Tile {
                x,
                y,
                width: self.tile.min(self.width - x),
                height,
            }
        })
    }

    /// All tiles in row-major order.
    pub fn tiles(&self) -> impl Iterator<Item = Tile> + '_ {
        (0..self.tiles_y()).flat_map(move |ty| self.row(ty))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn balanced_partition_covers_domain() {
        let p = Partition::new(10, 3, PartitionPolicy::Balanced).unwrap();
        let sizes: Vec<usize> = p.blocks().iter().map(|b| b.size()).collect();
        assert_eq!(sizes, vec![3, 3, 4]);
        assert_eq!(p.blocks()[0].start, 0);
        assert_eq!(p.blocks()[2].end, 10);
        for pair in p.blocks().windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
    }

    #[test]
    fn exact_partition_rejects_remainder() {
        assert!(Partition::new(12, 4, PartitionPolicy::Exact).is_ok());
        let err = Partition::new(10, 4, PartitionPolicy::Exact).unwrap_err();
        assert!(matches!(err, HalocaError::Config(_)));
    }

    #[test]
    fn partition_rejects_degenerate_inputs() {
        assert!(Partition::new(0, 1, PartitionPolicy::Balanced).is_err());
        assert!(Partition::new(4, 0, PartitionPolicy::Balanced).is_err());
        assert!(Partition::new(3, 4, PartitionPolicy::Balanced).is_err());
    }

    #[test]
    fn block_lookup_out_of_range_is_topology_error() {
        let p = Partition::new(8, 2, PartitionPolicy::Balanced).unwrap();
        assert_eq!(p.block(1).unwrap(), BlockRange { start: 4, end: 8 });
        assert!(matches!(p.block(2), Err(HalocaError::Topology(_))));
    }

    #[test]
    fn ring_neighbours_wrap() {
        let first = RingTopology::new(0, 4).unwrap();
        assert_eq!(first.prev(), 3);
        assert_eq!(first.next(), 1);
        let last = RingTopology::new(3, 4).unwrap();
        assert_eq!(last.prev(), 2);
        assert_eq!(last.next(), 0);
    }

    #[test]
    fn single_worker_ring_is_its_own_neighbour() {
        let ring = RingTopology::new(0, 1).unwrap();
        assert_eq!(ring.prev(), 0);
        assert_eq!(ring.next(), 0);
    }

    #[test]
    fn ring_rejects_rank_outside_size() {
        assert!(matches!(RingTopology::new(4, 4), Err(HalocaError::Topology(_))));
        assert!(matches!(RingTopology::new(0, 0), Err(HalocaError::Topology(_))));
    }

    #[test]
    fn tile_grid_clips_edge_tiles() {
        let grid = TileGrid::new(10, 5, 4).unwrap();
        assert_eq!(grid.tiles_x(), 3);
        assert_eq!(grid.tiles_y(), 2);
        let tiles: Vec<Tile> = grid.tiles().collect();
        assert_eq!(tiles.len(), 6);
        assert_eq!(tiles[2], Tile { x: 8, y: 0, width: 2, height: 4 });
        assert_eq!(tiles[5], Tile { x: 8, y: 4, width: 2, height: 1 });
        let area: usize = tiles.iter().map(|t| t.width * t.height).sum();
        assert_eq!(area, 50);
    }

    #[test]
    fn oversized_tile_is_clamped_to_grid() {
        let grid = TileGrid::new(8, 8, 2_000_000).unwrap();
        assert_eq!(grid.tile_size(), 8);
        assert_eq!(grid.tiles().count(), 1);

        let strip = TileGrid::new(3, 1000, usize::MAX).unwrap();
        assert_eq!(strip.tile_size(), 1000);
        assert_eq!(strip.max_tile_extent(), (3, 1000));
    }
}
