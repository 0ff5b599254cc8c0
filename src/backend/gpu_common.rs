//! Shared GPU device/queue bring-up, grounded on `GpuContext`
//! (`examples/monistowl-gat/crates/gat-gpu/src/context.rs`).

use std::sync::Arc;

pub struct GpuContext {
    pub device: Arc<wgpu::Device>,
    pub queue: Arc<wgpu::Queue>,
}

impl GpuContext {
    pub fn new() -> Option<Self> {
        pollster::block_on(Self::new_async())
    }

    async fn new_async() -> Option<Self> {
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
            .ok()?;
        let (device, queue) = adapter.request_device(&Default::default()).await.ok()?;
        Some(Self {
            device: Arc::new(device),
            queue: Arc::new(queue),
        })
    }
}

/// Mirrors `gat-gpu`'s `is_gpu_available()` test guard: device creation can legitimately fail
/// in a headless/CI sandbox with no adapter, which is not a defect in the backend itself.
pub fn is_gpu_available() -> bool {
    GpuContext::new().is_some()
}

const SPMV_DENSE_WGSL: &str = r#"
struct Params { n: u32 };
@group(0) @binding(0) var<uniform> params: Params;
@group(0) @binding(1) var<storage, read> a: array<f32>;
@group(0) @binding(2) var<storage, read> v: array<f32>;
@group(0) @binding(3) var<storage, read_write> out: array<f32>;

@compute @workgroup_size(64)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let row = gid.x;
    if (row >= params.n) { return; }
    var acc: f32 = 0.0;
    for (var col: u32 = 0u; col < params.n; col = col + 1u) {
        acc = acc + a[row * params.n + col] * v[col];
    }
    out[row] = acc;
}
"#;

const SPMV_SPARSE_WGSL: &str = r#"
struct Params { n: u32 };
@group(0) @binding(0) var<uniform> params: Params;
@group(0) @binding(1) var<storage, read> row_ptr: array<u32>;
@group(0) @binding(2) var<storage, read> col_idx: array<u32>;
@group(0) @binding(3) var<storage, read> values: array<f32>;
@group(0) @binding(4) var<storage, read> v: array<f32>;
@group(0) @binding(5) var<storage, read_write> out: array<f32>;

@compute @workgroup_size(64)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let row = gid.x;
    if (row >= params.n) { return; }
    var acc: f32 = 0.0;
    let start = row_ptr[row];
    let end = row_ptr[row + 1u];
    for (var k: u32 = start; k < end; k = k + 1u) {
        acc = acc + values[k] * v[col_idx[k]];
    }
    out[row] = acc;
}
"#;

pub fn dense_spmv_shader() -> &'static str {
    SPMV_DENSE_WGSL
}

pub fn sparse_spmv_shader() -> &'static str {
    SPMV_SPARSE_WGSL
}
