use nalgebra::{DMatrix, DVector};
use wgpu::util::DeviceExt;

use super::cg::conjugate_gradient;
use super::gpu_common::{GpuContext, dense_spmv_shader};
use super::{BackendKind, DecomposeOutcome, MatrixBackend};

/// `GPU_DENSE` — for islands above `gpuThreshold` (spec §4.3). Solves via CG with the
/// matrix-vector product dispatched to a WGSL compute shader (see `cg.rs` for why CG rather
/// than an on-GPU factorization), grounded on `gat-gpu`'s device/pipeline/dispatch pattern
/// (`examples/monistowl-gat/crates/gat-gpu/src/kernels/runner.rs`).
pub struct GpuDenseBackend {
    ctx: Option<GpuContext>,
    a_f32: Vec<f32>,
    diag: Vec<f64>,
    n: usize,
    singular: bool,
    max_iter: usize,
    tol: f64,
}

impl Default for GpuDenseBackend {
    fn default() -> Self {
        Self {
            ctx: GpuContext::new(),
            a_f32: Vec::new(),
            diag: Vec::new(),
            n: 0,
            singular: false,
            max_iter: 500,
            tol: 1.0e-9,
        }
    }
}

impl MatrixBackend for GpuDenseBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::GpuDense
    }

    fn decompose(&mut self, a: &DMatrix<f64>) -> DecomposeOutcome {
        self.n = a.nrows();
        self.a_f32 = vec![0.0f32; self.n * self.n];
        self.diag = vec![0.0; self.n];
        for row in 0..self.n {
            self.diag[row] = a[(row, row)];
            for col in 0..self.n {
                self.a_f32[row * self.n + col] = a[(row, col)] as f32;
            }
        }
        self.singular = self.diag.iter().any(|d| d.abs() < 1.0e-300);
        if self.singular {
            DecomposeOutcome::Singular
        } else {
            DecomposeOutcome::Ok
        }
    }

    fn solve(&mut self, b: &DVector<f64>) -> Option<DVector<f64>> {
        if self.singular {
            return None;
        }
        let ctx = self.ctx.as_ref()?;
        let n = self.n;
        let a_f32 = &self.a_f32;
        let b_vec: Vec<f64> = b.iter().copied().collect();
        let spmv = |v: &[f64]| -> Vec<f64> {
            let v_f32: Vec<f32> = v.iter().map(|&x| x as f32).collect();
            let out_f32 = dispatch_dense_spmv(ctx, n, a_f32, &v_f32);
            out_f32.into_iter().map(|x| x as f64).collect()
        };
        let outcome = conjugate_gradient(n, &self.diag, &b_vec, spmv, self.max_iter, self.tol);
        Some(DVector::from_vec(outcome.x))
    }

    fn is_singular(&self) -> bool {
        self.singular
    }
}

fn dispatch_dense_spmv(ctx: &GpuContext, n: usize, a: &[f32], v: &[f32]) -> Vec<f32> {
    let device = &ctx.device;
    let queue = &ctx.queue;

    let params = [n as u32, 0, 0, 0]; // padded to 16 bytes for uniform alignment
    let params_buf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some("gpu_dense_params"),
        contents: bytemuck::cast_slice(&params),
        usage: wgpu::BufferUsages::UNIFORM,
    });
    let a_buf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some("gpu_dense_a"),
        contents: bytemuck::cast_slice(a),
        usage: wgpu::BufferUsages::STORAGE,
    });
    let v_buf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some("gpu_dense_v"),
        contents: bytemuck::cast_slice(v),
        usage: wgpu::BufferUsages::STORAGE,
    });
    let out_buf = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("gpu_dense_out"),
        size: (n * std::mem::size_of::<f32>()) as u64,
        usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
        mapped_at_creation: false,
    });
    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("gpu_dense_staging"),
        size: (n * std::mem::size_of::<f32>()) as u64,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("gpu_dense_spmv"),
        source: wgpu::ShaderSource::Wgsl(dense_spmv_shader().into()),
    });
    let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some("gpu_dense_spmv_pipeline"),
        layout: None,
        module: &shader,
        entry_point: Some("main"),
        compilation_options: Default::default(),
        cache: None,
    });
    let layout = pipeline.get_bind_group_layout(0);
    let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("gpu_dense_bind_group"),
        layout: &layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: params_buf.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: a_buf.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 2,
                resource: v_buf.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 3,
                resource: out_buf.as_entire_binding(),
            },
        ],
    });

    let mut encoder = device.create_command_encoder(&Default::default());
    {
        let mut pass = encoder.begin_compute_pass(&Default::default());
        pass.set_pipeline(&pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.dispatch_workgroups((n as u32).div_ceil(64), 1, 1);
    }
    encoder.copy_buffer_to_buffer(&out_buf, 0, &staging, 0, (n * std::mem::size_of::<f32>()) as u64);
    queue.submit(Some(encoder.finish()));

    let slice = staging.slice(..);
    slice.map_async(wgpu::MapMode::Read, |_| {});
    let _ = device.poll(wgpu::PollType::Wait {
        submission_index: None,
        timeout: None,
    });
    let data = slice.get_mapped_range();
    let result: Vec<f32> = bytemuck::cast_slice(&data).to_vec();
    drop(data);
    staging.unmap();
    result
}
