//! WGSL compute shader sources for the GPU stencil backend.
//!
//! Cells are stored one per `u32` (0 or 1). Ring buffers are extended blocks
//! `[ghost | n cells | ghost]`; grid buffers are `(width + 2) x (height + 2)`
//! row-major with a one-cell halo on every side.

/// Side of the square tile handled by one `anneal_step` workgroup.
pub const ANNEAL_TILE: u32 = 16;

/// Invocations per workgroup for the 1D kernels.
pub const LINEAR_WORKGROUP: u32 = 64;

/// WGSL source containing all stencil kernels.
///
/// Entry points:
/// - `ring_ghosts`: wrap the two ghost cells of a single-block ring
/// - `ring_step`: one elementary-rule step over the interior
/// - `copy_top_bottom`: fill ghost rows from the opposite interior rows
/// - `copy_left_right`: fill ghost columns (corners included)
/// - `anneal_step`: one anneal step, 16x16 tile per workgroup in shared memory
pub const SHADER_SOURCE: &str = r#"
// ============================================================
// haloca GPU stencil kernels
// ============================================================

struct RingParams {
    n: u32,
    rule: u32,
    pad0: u32,
    pad1: u32,
}

struct GridParams {
    width: u32,
    height: u32,
    pad0: u32,
    pad1: u32,
}

// --- Ring ghosts ---
// Single block: the left ghost mirrors the last cell, the right ghost the first.

@group(0) @binding(0) var<storage, read_write> ghost_cells: array<u32>;
@group(0) @binding(1) var<uniform> ghost_params: RingParams;

@compute @workgroup_size(1)
fn ring_ghosts() {
    let n = ghost_params.n;
    ghost_cells[0u] = ghost_cells[n];
    ghost_cells[n + 1u] = ghost_cells[1u];
}

// --- Ring step ---
// One thread per interior cell; bit (4l + 2c + r) of the rule code.

@group(0) @binding(0) var<storage, read> ring_cur: array<u32>;
@group(0) @binding(1) var<storage, read_write> ring_next: array<u32>;
@group(0) @binding(2) var<uniform> ring_params: RingParams;

@compute @workgroup_size(64)
fn ring_step(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = gid.x + 1u;
    if i > ring_params.n {
        return;
    }
    let pattern = (ring_cur[i - 1u] << 2u) | (ring_cur[i] << 1u) | ring_cur[i + 1u];
    ring_next[i] = (ring_params.rule >> pattern) & 1u;
}

// --- Grid halo ---
// Block index times block size plus local offset, in both kernels.

@group(0) @binding(0) var<storage, read_write> halo_grid: array<u32>;
@group(0) @binding(1) var<uniform> halo_params: GridParams;

@compute @workgroup_size(64)
fn copy_top_bottom(
    @builtin(workgroup_id) wid: vec3<u32>,
    @builtin(local_invocation_id) lid: vec3<u32>,
) {
    let ext_w = halo_params.width + 2u;
    let h = halo_params.height;
    let x = wid.x * 64u + lid.x + 1u;
    if x > halo_params.width {
        return;
    }
    halo_grid[x] = halo_grid[h * ext_w + x];
    halo_grid[(h + 1u) * ext_w + x] = halo_grid[ext_w + x];
}

@compute @workgroup_size(64)
fn copy_left_right(
    @builtin(workgroup_id) wid: vec3<u32>,
    @builtin(local_invocation_id) lid: vec3<u32>,
) {
    let ext_w = halo_params.width + 2u;
    let y = wid.x * 64u + lid.x;
    if y >= halo_params.height + 2u {
        return;
    }
    let row = y * ext_w;
    halo_grid[row] = halo_grid[row + halo_params.width];
    halo_grid[row + halo_params.width + 1u] = halo_grid[row + 1u];
}

// --- Anneal step ---
// The workgroup loads an 18x18 neighbourhood (tile plus halo) into shared
// memory cooperatively; every thread reads cells loaded by others, so all
// loads must finish before any sum starts.

const TILE: u32 = 16u;
const SIDE: u32 = 18u;

@group(0) @binding(0) var<storage, read> anneal_cur: array<u32>;
@group(0) @binding(1) var<storage, read_write> anneal_next: array<u32>;
@group(0) @binding(2) var<uniform> anneal_params: GridParams;

var<workgroup> anneal_tile: array<u32, 324>;

@compute @workgroup_size(16, 16)
fn anneal_step(
    @builtin(workgroup_id) wid: vec3<u32>,
    @builtin(local_invocation_id) lid: vec3<u32>,
    @builtin(local_invocation_index) lindex: u32,
) {
    let width = anneal_params.width;
    let height = anneal_params.height;
    let ext_w = width + 2u;
    let ext_h = height + 2u;
    // Extended coordinates of the tile's top-left halo cell.
    let x0 = wid.x * TILE;
    let y0 = wid.y * TILE;

    for (var batch = 0u; batch < 2u; batch = batch + 1u) {
        let k = lindex + batch * TILE * TILE;
        if k < SIDE * SIDE {
            let ex = x0 + k % SIDE;
            let ey = y0 + k / SIDE;
            var v = 0u;
            if ex < ext_w && ey < ext_h {
                v = anneal_cur[ey * ext_w + ex];
            }
            anneal_tile[k] = v;
        }
    }

    workgroupBarrier();

    let x = x0 + lid.x;
    let y = y0 + lid.y;
    if x >= width || y >= height {
        return;
    }
    var live = 0u;
    for (var dy = 0u; dy < 3u; dy = dy + 1u) {
        for (var dx = 0u; dx < 3u; dx = dx + 1u) {
            live = live + anneal_tile[(lid.y + dy) * SIDE + lid.x + dx];
        }
    }
    anneal_next[(y + 1u) * ext_w + x + 1u] = select(0u, 1u, live >= 6u || live == 4u);
}
"#;
