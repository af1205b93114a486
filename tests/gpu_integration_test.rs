//! Integration tests comparing the GPU and CPU stencil paths.
//!
//! Both automata are integer-valued, so results must match exactly. Tests
//! skip when no adapter is available.

use haloca::engine::anneal::{self, AnnealConfig, Grid, GridInit};
use haloca::engine::driver::{run_local, RingConfig};
use haloca::engine::gpu::GpuStencil;
use haloca::ir::{Cell, InitialCondition};
use haloca::rule::ElementaryRule;

fn gpu_available() -> bool {
    GpuStencil::new().is_ok()
}

macro_rules! skip_if_no_gpu {
    () => {
        if !gpu_available() {
            eprintln!("Skipping: no GPU available");
            return;
        }
    };
}

fn random_ring(width: usize, steps: usize, rule: u8) -> RingConfig {
    RingConfig {
        width,
        steps,
        rule: ElementaryRule::new(rule),
        initial: InitialCondition::Random {
            seed: 99,
            density: 0.5,
        },
        ..RingConfig::default()
    }
}

#[test]
fn test_gpu_ring_matches_cpu() {
    skip_if_no_gpu!();
    let gpu = GpuStencil::new().expect("GPU init");
    for rule in [30, 90, 110] {
        let config = random_ring(300, 70, rule);
        let mut cpu_rows: Vec<Vec<Cell>> = Vec::new();
        let mut gpu_rows: Vec<Vec<Cell>> = Vec::new();
        let cpu_last = run_local(&config, 3, Some(&mut cpu_rows)).expect("CPU run");
        let gpu_last = gpu.run_ring(&config, Some(&mut gpu_rows)).expect("GPU run");
        assert_eq!(gpu_rows, cpu_rows, "rule {}", rule);
        assert_eq!(gpu_last, cpu_last, "rule {}", rule);
    }
}

#[test]
fn test_gpu_ring_spans_several_submits() {
    skip_if_no_gpu!();
    let gpu = GpuStencil::new().expect("GPU init");
    let config = random_ring(65, 600, 30);
    let cpu_last = run_local(&config, 1, None).expect("CPU run");
    assert_eq!(gpu.run_ring(&config, None).expect("GPU run"), cpu_last);
}

#[test]
fn test_gpu_ring_zero_steps() {
    skip_if_no_gpu!();
    let gpu = GpuStencil::new().expect("GPU init");
    let config = RingConfig {
        width: 9,
        steps: 0,
        ..RingConfig::default()
    };
    let mut rows: Vec<Vec<Cell>> = Vec::new();
    let last = gpu.run_ring(&config, Some(&mut rows)).expect("GPU run");
    assert!(rows.is_empty());
    assert_eq!(last, vec![0, 0, 0, 0, 1, 0, 0, 0, 0]);
}

#[test]
fn test_gpu_anneal_matches_cpu() {
    skip_if_no_gpu!();
    let gpu = GpuStencil::new().expect("GPU init");
    // Dimensions are not multiples of the 16x16 workgroup tile.
    let config = AnnealConfig {
        width: 37,
        height: 23,
        steps: 12,
        tile: 16,
        initial: GridInit::Random {
            seed: 5,
            density: 0.5,
        },
    };
    let cpu = anneal::run(&config).expect("CPU run");
    let out = gpu.run_anneal(&config).expect("GPU run");
    assert_eq!(out, cpu);
}

#[test]
fn test_gpu_anneal_fixed_points() {
    skip_if_no_gpu!();
    let gpu = GpuStencil::new().expect("GPU init");
    for value in [0, 1] {
        let grid = Grid::filled(18, 18, value).unwrap();
        let config = AnnealConfig {
            steps: 4,
            initial: GridInit::Grid(grid.clone()),
            ..AnnealConfig::default()
        };
        assert_eq!(gpu.run_anneal(&config).expect("GPU run"), grid);
    }
}
