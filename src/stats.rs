//! Performance statistics collection for `--stats` output.

use std::time::{Duration, Instant};

/// Collects run counters and phase timings.
///
/// Created when `--stats` is passed and filled in by the binary around each
/// phase; the engine itself never touches it.
pub struct Stats {
    total_start: Instant,
    phases: Vec<(&'static str, Duration)>,
    pub backend: &'static str,
    pub workers: usize,
    pub steps: usize,
    /// Cells evaluated across all steps.
    pub cells_updated: u64,
    /// Combined send/receive calls across all workers.
    pub halo_exchanges: u64,
    pub tiles_per_step: usize,
    pub final_population: usize,
    pub gpu_adapter: Option<String>,
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

impl Stats {
    pub fn new() -> Self {
        Self {
            total_start: Instant::now(),
            phases: Vec::new(),
            backend: "cpu",
            workers: 1,
            steps: 0,
            cells_updated: 0,
            halo_exchanges: 0,
            tiles_per_step: 0,
            final_population: 0,
            gpu_adapter: None,
        }
    }

    /// Record a completed phase with its duration.
    pub fn add_phase(&mut self, name: &'static str, duration: Duration) {
        self.phases.push((name, duration));
    }

    /// Cell updates per second over the `evaluate` phase, if one was recorded.
    pub fn throughput(&self) -> Option<f64> {
        let (_, dur) = self.phases.iter().find(|(name, _)| *name == "evaluate")?;
        let secs = dur.as_secs_f64();
        (secs > 0.0).then(|| self.cells_updated as f64 / secs)
    }

    /// Print the stats table to stderr.
    pub fn display(&self) {
        let total = self.total_start.elapsed();
        eprintln!();
        eprintln!("=== Haloca Run Stats ===");

        for (name, dur) in &self.phases {
            eprintln!("  {:<24} {:>8.3}s", name, dur.as_secs_f64());
        }

        eprintln!("  Backend:                {}", self.backend);
        if let Some(ref adapter) = self.gpu_adapter {
            eprintln!("  GPU adapter:            {}", adapter);
        }
        eprintln!("  Workers:                {}", self.workers);
        eprintln!("  Steps:                  {}", self.steps);
        eprintln!("  Cells updated:          {}", self.cells_updated);
        if self.halo_exchanges > 0 {
            eprintln!("  Halo exchanges:         {}", self.halo_exchanges);
        }
        if self.tiles_per_step > 0 {
            eprintln!("  Tiles per step:         {}", self.tiles_per_step);
        }
        if let Some(rate) = self.throughput() {
            eprintln!("  Cell updates/s:         {:.3e}", rate);
        }

        eprintln!("  ─────────────────────────────────");
        eprintln!("  Final population:       {}", self.final_population);
        eprintln!("  Total:                  {:>8.3}s", total.as_secs_f64());
    }
}
