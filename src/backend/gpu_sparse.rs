use nalgebra::{DMatrix, DVector};
use wgpu::util::DeviceExt;

use super::cg::conjugate_gradient;
use super::gpu_common::{GpuContext, sparse_spmv_shader};
use super::{BackendKind, DecomposeOutcome, MatrixBackend};

struct Csr {
    row_ptr: Vec<u32>,
    col_idx: Vec<u32>,
    values: Vec<f32>,
}

fn dense_to_csr(a: &DMatrix<f64>) -> Csr {
    let n = a.nrows();
    let mut row_ptr = Vec::with_capacity(n + 1);
    let mut col_idx = Vec::new();
    let mut values = Vec::new();
    row_ptr.push(0u32);
    for row in 0..n {
        for col in 0..n {
            let v = a[(row, col)];
            if v != 0.0 {
                col_idx.push(col as u32);
                values.push(v as f32);
            }
        }
        row_ptr.push(col_idx.len() as u32);
    }
    Csr {
        row_ptr,
        col_idx,
        values,
    }
}

/// `GPU_SPARSE` — for islands above `gpuSparseThreshold` (spec §4.3). Same CG driver as
/// [`super::GpuDenseBackend`], but the matrix-vector product is a CSR sparse kernel so large,
/// sparsely-connected islands avoid the dense backend's `O(n^2)` storage and work per product.
pub struct GpuSparseBackend {
    ctx: Option<GpuContext>,
    csr: Csr,
    diag: Vec<f64>,
    n: usize,
    singular: bool,
    max_iter: usize,
    tol: f64,
}

impl Default for GpuSparseBackend {
    fn default() -> Self {
        Self {
            ctx: GpuContext::new(),
            csr: Csr {
                row_ptr: Vec::new(),
                col_idx: Vec::new(),
                values: Vec::new(),
            },
            diag: Vec::new(),
            n: 0,
            singular: false,
            max_iter: 1000,
            tol: 1.0e-9,
        }
    }
}

impl MatrixBackend for GpuSparseBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::GpuSparse
    }

    fn decompose(&mut self, a: &DMatrix<f64>) -> DecomposeOutcome {
        self.n = a.nrows();
        self.csr = dense_to_csr(a);
        self.diag = (0..self.n).map(|i| a[(i, i)]).collect();
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
        let csr = &self.csr;
        let b_vec: Vec<f64> = b.iter().copied().collect();
        let spmv = |v: &[f64]| -> Vec<f64> {
            let v_f32: Vec<f32> = v.iter().map(|&x| x as f32).collect();
            let out_f32 = dispatch_sparse_spmv(ctx, n, csr, &v_f32);
            out_f32.into_iter().map(|x| x as f64).collect()
        };
        let outcome = conjugate_gradient(n, &self.diag, &b_vec, spmv, self.max_iter, self.tol);
        Some(DVector::from_vec(outcome.x))
    }

    fn is_singular(&self) -> bool {
        self.singular
    }
}

fn dispatch_sparse_spmv(ctx: &GpuContext, n: usize, csr: &Csr, v: &[f32]) -> Vec<f32> {
    let device = &ctx.device;
    let queue = &ctx.queue;

    let params = [n as u32, 0, 0, 0];
    let params_buf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some("gpu_sparse_params"),
        contents: bytemuck::cast_slice(&params),
        usage: wgpu::BufferUsages::UNIFORM,
    });
    let row_ptr_buf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some("gpu_sparse_row_ptr"),
        contents: bytemuck::cast_slice(&csr.row_ptr),
        usage: wgpu::BufferUsages::STORAGE,
    });
    let col_idx_buf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some("gpu_sparse_col_idx"),
        contents: bytemuck::cast_slice(&csr.col_idx),
        usage: wgpu::BufferUsages::STORAGE,
    });
    let values_buf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some("gpu_sparse_values"),
        contents: bytemuck::cast_slice(&csr.values),
        usage: wgpu::BufferUsages::STORAGE,
    });
    let v_buf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some("gpu_sparse_v"),
        contents: bytemuck::cast_slice(v),
        usage: wgpu::BufferUsages::STORAGE,
    });
    let out_buf = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("gpu_sparse_out"),
        size: (n * std::mem::size_of::<f32>()) as u64,
        usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
        mapped_at_creation: false,
    });
    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("gpu_sparse_staging"),
        size: (n * std::mem::size_of::<f32>()) as u64,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("gpu_sparse_spmv"),
        source: wgpu::ShaderSource::Wgsl(sparse_spmv_shader().into()),
    });
    let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some("gpu_sparse_spmv_pipeline"),
        layout: None,
        module: &shader,
        entry_point: Some("main"),
        compilation_options: Default::default(),
        cache: None,
    });
    let layout = pipeline.get_bind_group_layout(0);
    let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("gpu_sparse_bind_group"),
        layout: &layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: params_buf.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: row_ptr_buf.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 2,
                resource: col_idx_buf.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 3,
                resource: values_buf.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 4,
                resource: v_buf.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 5,
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solves_on_available_hardware() {
        if !super::super::gpu_common::is_gpu_available() {
            eprintln!("skipping GpuSparseBackend test: no GPU adapter available");
            return;
        }
        let a = DMatrix::from_row_slice(2, 2, &[4.0, 1.0, 1.0, 3.0]);
        let b = DVector::from_vec(vec![1.0, 2.0]);
        let mut backend = GpuSparseBackend::default();
        assert_eq!(backend.decompose(&a), DecomposeOutcome::Ok);
        let x = backend.solve(&b).unwrap();
        assert!((x[0] - 1.0 / 11.0).abs() < 1e-4);
        assert!((x[1] - 7.0 / 11.0).abs() < 1e-4);
    }
}
