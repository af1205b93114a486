//! GPU stencil backend using wgpu.
//!
//! Runs both automata on a single device: the whole ring is one block whose
//! ghosts are wrapped by a kernel every step, and the anneal grid is
//! evaluated in 16x16 workgroup tiles. Cells are widened to `u32` on the
//! device. Results are identical to the CPU paths.

use wgpu::util::DeviceExt;

use crate::error::{HalocaError, Result};
use crate::ir::{Cell, HALO};

use super::anneal::{extend, extended_len, interior, AnnealConfig, Grid};
use super::driver::{RingConfig, SnapshotSink};
use super::gpu_shaders::{self, ANNEAL_TILE, LINEAR_WORKGROUP};
use super::partition::Partition;

/// Steps encoded per command buffer.
const STEPS_PER_SUBMIT: usize = 256;

/// GPU context holding the wgpu device, queue, and compute pipelines.
pub struct GpuContext {
    device: wgpu::Device,
    queue: wgpu::Queue,
    adapter_name: String,
    ring_ghosts_pipeline: wgpu::ComputePipeline,
    ring_step_pipeline: wgpu::ComputePipeline,
    copy_top_bottom_pipeline: wgpu::ComputePipeline,
    copy_left_right_pipeline: wgpu::ComputePipeline,
    anneal_step_pipeline: wgpu::ComputePipeline,
}

impl GpuContext {
    pub fn new() -> Result<Self> {
        pollster::block_on(Self::new_async())
    }

    async fn new_async() -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|_| HalocaError::Gpu("no GPU adapter found".into()))?;

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("haloca_gpu"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                ..Default::default()
            })
            .await
            .map_err(|e| HalocaError::Gpu(format!("failed to get GPU device: {e}")))?;

        let shader_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("haloca_shaders"),
            source: wgpu::ShaderSource::Wgsl(gpu_shaders::SHADER_SOURCE.into()),
        });

        let make_pipeline = |entry_point: &str| -> wgpu::ComputePipeline {
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(entry_point),
                layout: None,
                module: &shader_module,
                entry_point: Some(entry_point),
                compilation_options: Default::default(),
                cache: None,
            })
        };

        let ring_ghosts_pipeline = make_pipeline("ring_ghosts");
        let ring_step_pipeline = make_pipeline("ring_step");
        let copy_top_bottom_pipeline = make_pipeline("copy_top_bottom");
        let copy_left_right_pipeline = make_pipeline("copy_left_right");
        let anneal_step_pipeline = make_pipeline("anneal_step");

        let adapter_name = adapter.get_info().name;
        tracing::debug!(adapter = %adapter_name, "GPU context ready");

        Ok(Self {
            device,
            queue,
            adapter_name,
            ring_ghosts_pipeline,
            ring_step_pipeline,
            copy_top_bottom_pipeline,
            copy_left_right_pipeline,
            anneal_step_pipeline,
        })
    }
}

fn workgroup_count(n: u32, size: u32) -> u32 {
    n.div_ceil(size)
}

// Both uniform structs are padded to 16 bytes.
#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct RingParams {
    n: u32,
    rule: u32,
    _pad: [u32; 2],
}

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct GridParams {
    width: u32,
    height: u32,
    _pad: [u32; 2],
}

fn to_u32(what: &str, value: usize) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| HalocaError::Resource(format!("{what} ({value}) exceeds the GPU index range")))
}

/// Byte size of a `u32` storage buffer of `cells` entries, if the device can
/// bind it.
fn check_storage_size(what: &str, cells: usize, limit: u64) -> Result<u64> {
    let bytes = (cells as u64)
        .checked_mul(std::mem::size_of::<u32>() as u64)
        .ok_or_else(|| HalocaError::Resource(format!("{what} of {cells} cells overflows")))?;
    if bytes > limit {
        return Err(HalocaError::Resource(format!(
            "{what} needs {bytes} bytes, over the device storage binding limit of {limit}"
        )));
    }
    Ok(bytes)
}

/// Sizes and dispatch counts of a ring run, checked against device limits.
struct RingLayout {
    n: u32,
    n_wg: u32,
    trace_bytes: u64,
}

/// Sizes and dispatch counts of an anneal run, checked against device limits.
struct AnnealLayout {
    w: u32,
    h: u32,
    tiles_x: u32,
    tiles_y: u32,
    rows_wg: u32,
    cols_wg: u32,
}

fn widen(cells: &[Cell]) -> Vec<u32> {
    cells.iter().map(|&c| c as u32).collect()
}

fn narrow(cells: &[u32]) -> Vec<Cell> {
    cells.iter().map(|&c| c as Cell).collect()
}

// Helper to read a GPU buffer back to CPU
fn read_buffer_u32(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    src: &wgpu::Buffer,
    count: usize,
) -> Result<Vec<u32>> {
    let size = (count * std::mem::size_of::<u32>()) as u64;
    if size == 0 {
        return Ok(Vec::new());
    }
    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("read_staging"),
        size,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    let mut encoder = device.create_command_encoder(&Default::default());
    encoder.copy_buffer_to_buffer(src, 0, &staging, 0, size);
    queue.submit(Some(encoder.finish()));

    let slice = staging.slice(..);
    let (sender, receiver) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |r| {
        let _ = sender.send(r);
    });
    device
        .poll(wgpu::PollType::Wait {
            submission_index: None,
            timeout: None,
        })
        .map_err(|e| HalocaError::Gpu(format!("device poll failed: {e}")))?;
    receiver
        .recv()
        .map_err(|_| HalocaError::Gpu("buffer map callback dropped".into()))?
        .map_err(|e| HalocaError::Gpu(format!("buffer map failed: {e}")))?;

    let data = slice.get_mapped_range();
    let result: Vec<u32> = bytemuck::cast_slice(&data).to_vec();
    drop(data);
    staging.unmap();
    Ok(result)
}

/// Stencil runner bound to one GPU.
pub struct GpuStencil {
    ctx: GpuContext,
}

impl GpuStencil {
    pub fn new() -> Result<Self> {
        Ok(Self {
            ctx: GpuContext::new()?,
        })
    }

    pub fn adapter_name(&self) -> &str {
        &self.ctx.adapter_name
    }

    fn storage_buffer(&self, label: &str, contents: &[u32]) -> wgpu::Buffer {
        self.ctx
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents: bytemuck::cast_slice(contents),
                usage: wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::COPY_SRC
                    | wgpu::BufferUsages::COPY_DST,
            })
    }

    fn uniform_buffer<T: bytemuck::Pod>(&self, label: &str, value: &T) -> wgpu::Buffer {
        self.ctx
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents: bytemuck::bytes_of(value),
                usage: wgpu::BufferUsages::UNIFORM,
            })
    }

    fn bind_group(
        &self,
        pipeline: &wgpu::ComputePipeline,
        buffers: &[&wgpu::Buffer],
    ) -> wgpu::BindGroup {
        let entries: Vec<wgpu::BindGroupEntry> = buffers
            .iter()
            .enumerate()
            .map(|(i, b)| wgpu::BindGroupEntry {
                binding: i as u32,
                resource: b.as_entire_binding(),
            })
            .collect();
        self.ctx
            .device
            .create_bind_group(&wgpu::BindGroupDescriptor {
                label: None,
                layout: &pipeline.get_bind_group_layout(0),
                entries: &entries,
            })
    }

    fn check_workgroups(&self, count: u32) -> Result<()> {
        let max = self.ctx.device.limits().max_compute_workgroups_per_dimension;
        if count > max {
            return Err(HalocaError::Resource(format!(
                "{count} workgroups exceed the device limit of {max} per dimension"
            )));
        }
        Ok(())
    }

    /// Largest storage buffer a shader may bind on this device.
    fn storage_limit(&self) -> u64 {
        let limits = self.ctx.device.limits();
        u64::from(limits.max_storage_buffer_binding_size).min(limits.max_buffer_size)
    }

    fn ring_layout(&self, config: &RingConfig) -> Result<RingLayout> {
        Partition::new(config.width, 1, config.policy)?;
        config.initial.validate(config.width)?;
        let width = config.width;
        let n = to_u32("domain width", width)?;
        let n_wg = workgroup_count(n, LINEAR_WORKGROUP);
        self.check_workgroups(n_wg)?;

        let ext_len = width
            .checked_add(2 * HALO)
            .ok_or_else(|| HalocaError::Resource("domain width overflows".into()))?;
        check_storage_size("ring buffer", ext_len, self.storage_limit())?;

        let row_bytes = (width * std::mem::size_of::<u32>()) as u64;
        let trace_bytes = row_bytes
            .checked_mul(config.steps as u64)
            .ok_or_else(|| HalocaError::Resource("trace size overflows".into()))?;
        let max_buffer = self.ctx.device.limits().max_buffer_size;
        if trace_bytes > max_buffer {
            return Err(HalocaError::Resource(format!(
                "trace of {trace_bytes} bytes exceeds the device buffer limit of {max_buffer}"
            )));
        }
        Ok(RingLayout {
            n,
            n_wg,
            trace_bytes,
        })
    }

    fn anneal_layout(&self, config: &AnnealConfig) -> Result<AnnealLayout> {
        config.validate()?;
        let (width, height) = config.dimensions();
        let w = to_u32("grid width", width)?;
        let h = to_u32("grid height", height)?;
        let ext_len = extended_len(width, height)?;
        to_u32("extended grid size", ext_len)?;
        check_storage_size("grid buffer", ext_len, self.storage_limit())?;

        let layout = AnnealLayout {
            w,
            h,
            tiles_x: workgroup_count(w, ANNEAL_TILE),
            tiles_y: workgroup_count(h, ANNEAL_TILE),
            rows_wg: workgroup_count(h + 2, LINEAR_WORKGROUP),
            cols_wg: workgroup_count(w, LINEAR_WORKGROUP),
        };
        for count in [layout.tiles_x, layout.tiles_y, layout.rows_wg, layout.cols_wg] {
            self.check_workgroups(count)?;
        }
        Ok(layout)
    }

    /// Check that a ring run fits this device without allocating anything.
    pub fn check_ring(&self, config: &RingConfig) -> Result<()> {
        self.ring_layout(config).map(|_| ())
    }

    /// Check that an anneal run fits this device without allocating anything.
    pub fn check_anneal(&self, config: &AnnealConfig) -> Result<()> {
        self.anneal_layout(config).map(|_| ())
    }

    /// Run the ring automaton as a single block and return the final domain.
    ///
    /// Snapshots follow the same convention as `driver::run_rank`: one per
    /// step, each the domain entering that step. They are copied into a
    /// device trace buffer and handed to `sink` after the run.
    pub fn run_ring(
        &self,
        config: &RingConfig,
        sink: Option<&mut dyn SnapshotSink>,
    ) -> Result<Vec<Cell>> {
        let _span = tracing::info_span!(
            "gpu_ring_run",
            width = config.width,
            steps = config.steps,
            rule = config.rule.code()
        )
        .entered();

        let RingLayout {
            n,
            n_wg,
            trace_bytes,
        } = self.ring_layout(config)?;
        let width = config.width;
        let row_bytes = (width * std::mem::size_of::<u32>()) as u64;

        let mut ext = vec![0u32; width + 2 * HALO];
        ext[HALO..HALO + width].copy_from_slice(&widen(&config.initial.build(width)?));

        let device = &self.ctx.device;
        let buf_a = self.storage_buffer("ring_a", &ext);
        let buf_b = self.storage_buffer("ring_b", &ext);
        let trace = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("ring_trace"),
            size: trace_bytes.max(4),
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let params = self.uniform_buffer(
            "ring_params",
            &RingParams {
                n,
                rule: config.rule.code() as u32,
                _pad: [0; 2],
            },
        );

        let ghosts_a = self.bind_group(&self.ctx.ring_ghosts_pipeline, &[&buf_a, &params]);
        let ghosts_b = self.bind_group(&self.ctx.ring_ghosts_pipeline, &[&buf_b, &params]);
        let step_ab = self.bind_group(&self.ctx.ring_step_pipeline, &[&buf_a, &buf_b, &params]);
        let step_ba = self.bind_group(&self.ctx.ring_step_pipeline, &[&buf_b, &buf_a, &params]);

        let mut s = 0;
        while s < config.steps {
            let end = (s + STEPS_PER_SUBMIT).min(config.steps);
            let mut encoder = device.create_command_encoder(&Default::default());
            for step in s..end {
                let (cur, ghosts, stepper) = if step % 2 == 0 {
                    (&buf_a, &ghosts_a, &step_ab)
                } else {
                    (&buf_b, &ghosts_b, &step_ba)
                };
                {
                    let mut pass = encoder.begin_compute_pass(&Default::default());
                    pass.set_pipeline(&self.ctx.ring_ghosts_pipeline);
                    pass.set_bind_group(0, Some(ghosts), &[]);
                    pass.dispatch_workgroups(1, 1, 1);
                }
                encoder.copy_buffer_to_buffer(
                    cur,
                    (HALO * std::mem::size_of::<u32>()) as u64,
                    &trace,
                    step as u64 * row_bytes,
                    row_bytes,
                );
                {
                    let mut pass = encoder.begin_compute_pass(&Default::default());
                    pass.set_pipeline(&self.ctx.ring_step_pipeline);
                    pass.set_bind_group(0, Some(stepper), &[]);
                    pass.dispatch_workgroups(n_wg, 1, 1);
                }
            }
            self.ctx.queue.submit(Some(encoder.finish()));
            tracing::trace!(through = end, "ring steps submitted");
            s = end;
        }

        let last = if config.steps % 2 == 0 { &buf_a } else { &buf_b };
        let final_ext = read_buffer_u32(device, &self.ctx.queue, last, width + 2 * HALO)?;

        if let Some(sink) = sink {
            let rows = read_buffer_u32(device, &self.ctx.queue, &trace, width * config.steps)?;
            for (step, row) in rows.chunks_exact(width).enumerate() {
                sink.record(step, &narrow(row))?;
            }
            sink.finish()?;
        }

        Ok(narrow(&final_ext[HALO..HALO + width]))
    }

    /// Run the anneal automaton and return the final grid.
    pub fn run_anneal(&self, config: &AnnealConfig) -> Result<Grid> {
        let AnnealLayout {
            w,
            h,
            tiles_x,
            tiles_y,
            rows_wg,
            cols_wg,
        } = self.anneal_layout(config)?;
        let grid = config.initial_grid()?;
        let (width, height) = (grid.width, grid.height);
        let _span = tracing::info_span!("gpu_anneal_run", width, height, steps = config.steps)
            .entered();

        let ext = widen(&extend(&grid));
        let buf_a = self.storage_buffer("grid_a", &ext);
        let buf_b = self.storage_buffer("grid_b", &ext);
        let params = self.uniform_buffer(
            "grid_params",
            &GridParams {
                width: w,
                height: h,
                _pad: [0; 2],
            },
        );

        let ctx = &self.ctx;
        let halo_tb_a = self.bind_group(&ctx.copy_top_bottom_pipeline, &[&buf_a, &params]);
        let halo_tb_b = self.bind_group(&ctx.copy_top_bottom_pipeline, &[&buf_b, &params]);
        let halo_lr_a = self.bind_group(&ctx.copy_left_right_pipeline, &[&buf_a, &params]);
        let halo_lr_b = self.bind_group(&ctx.copy_left_right_pipeline, &[&buf_b, &params]);
        let step_ab = self.bind_group(&ctx.anneal_step_pipeline, &[&buf_a, &buf_b, &params]);
        let step_ba = self.bind_group(&ctx.anneal_step_pipeline, &[&buf_b, &buf_a, &params]);

        let mut s = 0;
        while s < config.steps {
            let end = (s + STEPS_PER_SUBMIT).min(config.steps);
            let mut encoder = ctx.device.create_command_encoder(&Default::default());
            for step in s..end {
                let (tb, lr, stepper) = if step % 2 == 0 {
                    (&halo_tb_a, &halo_lr_a, &step_ab)
                } else {
                    (&halo_tb_b, &halo_lr_b, &step_ba)
                };
                // Separate passes: left/right must see the rows written by
                // top/bottom, and the step must see both.
                {
                    let mut pass = encoder.begin_compute_pass(&Default::default());
                    pass.set_pipeline(&ctx.copy_top_bottom_pipeline);
                    pass.set_bind_group(0, Some(tb), &[]);
                    pass.dispatch_workgroups(cols_wg, 1, 1);
                }
                {
                    let mut pass = encoder.begin_compute_pass(&Default::default());
                    pass.set_pipeline(&ctx.copy_left_right_pipeline);
                    pass.set_bind_group(0, Some(lr), &[]);
                    pass.dispatch_workgroups(rows_wg, 1, 1);
                }
                {
                    let mut pass = encoder.begin_compute_pass(&Default::default());
                    pass.set_pipeline(&ctx.anneal_step_pipeline);
                    pass.set_bind_group(0, Some(stepper), &[]);
                    pass.dispatch_workgroups(tiles_x, tiles_y, 1);
                }
            }
            ctx.queue.submit(Some(encoder.finish()));
            tracing::trace!(through = end, "anneal steps submitted");
            s = end;
        }

        let last = if config.steps % 2 == 0 { &buf_a } else { &buf_b };
        let out = read_buffer_u32(&ctx.device, &ctx.queue, last, ext.len())?;
        Ok(interior(&narrow(&out), width, height))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_size_within_limit() {
        assert_eq!(check_storage_size("grid buffer", 10, 40).unwrap(), 40);
        assert_eq!(check_storage_size("grid buffer", 0, 0).unwrap(), 0);
    }

    #[test]
    fn storage_size_over_limit_is_resource_error() {
        // 6000x6000 grid plus halo against a 128 MiB binding limit.
        let cells = 6002 * 6002;
        let err = check_storage_size("grid buffer", cells, 128 << 20).unwrap_err();
        assert!(matches!(err, HalocaError::Resource(ref msg) if msg.contains("binding limit")));
        assert!(check_storage_size("ring buffer", 11, 40).is_err());
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn storage_size_overflow_is_resource_error() {
        let err = check_storage_size("grid buffer", usize::MAX, u64::MAX).unwrap_err();
        assert!(matches!(err, HalocaError::Resource(_)));
    }
}
