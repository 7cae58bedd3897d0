use anyhow::Result;
use bytemuck::{Pod, Zeroable};

use super::bitdepth::reduce_bit_depth;
use super::gpu::{GpuContext, OffscreenTarget, TARGET_FORMAT};
use super::{validate, FrameSynthesizer, SynthesisError, SynthesisInput};

const SHADER: &str = include_str!("scope.wgsl");
const MAX_WAVEFORM_POINTS: usize = 2048;
const MAX_SPECTRUM_BINS: usize = 1024;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
struct ScopeUniforms {
    resolution: [f32; 2],
    time: f32,
    waveform_len: u32,
    spectrum_len: u32,
    sample_rate: f32,
    _padding: [f32; 2],
}

/// GPU oscilloscope: spectrum bars under a glowing waveform trace.
pub struct ScopeSynthesizer {
    gpu: GpuContext,
    pipeline: wgpu::RenderPipeline,
    uniforms: wgpu::Buffer,
    spectrum_buffer: wgpu::Buffer,
    waveform_buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
    target: Option<OffscreenTarget>,
    waveform: Vec<f32>,
    spectrum: Vec<f32>,
}

impl ScopeSynthesizer {
    pub fn new() -> Result<Self> {
        let gpu = GpuContext::new()?;
        let device = &gpu.device;

        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("scope_layout"),
            entries: &[
                layout_entry(0, wgpu::BufferBindingType::Uniform),
                layout_entry(1, wgpu::BufferBindingType::Storage { read_only: true }),
                layout_entry(2, wgpu::BufferBindingType::Storage { read_only: true }),
            ],
        });
        let pipeline = build_pipeline(device, &layout);

        let uniforms = create_buffer(
            device,
            "scope_uniforms",
            std::mem::size_of::<ScopeUniforms>(),
            wgpu::BufferUsages::UNIFORM,
        );
        let spectrum_buffer = create_buffer(
            device,
            "scope_spectrum",
            MAX_SPECTRUM_BINS * std::mem::size_of::<f32>(),
            wgpu::BufferUsages::STORAGE,
        );
        let waveform_buffer = create_buffer(
            device,
            "scope_waveform",
            MAX_WAVEFORM_POINTS * std::mem::size_of::<f32>(),
            wgpu::BufferUsages::STORAGE,
        );

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("scope_bind_group"),
            layout: &layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: uniforms.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: spectrum_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: waveform_buffer.as_entire_binding(),
                },
            ],
        });

        Ok(Self {
            gpu,
            pipeline,
            uniforms,
            spectrum_buffer,
            waveform_buffer,
            bind_group,
            target: None,
            waveform: Vec::with_capacity(MAX_WAVEFORM_POINTS),
            spectrum: Vec::with_capacity(MAX_SPECTRUM_BINS),
        })
    }
}

impl FrameSynthesizer for ScopeSynthesizer {
    fn name(&self) -> &'static str {
        "scope"
    }

    fn synthesize(
        &mut self,
        input: &SynthesisInput<'_>,
        target: &mut [u8],
    ) -> Result<(), SynthesisError> {
        validate(input, target)?;

        decimate_into(input.waveform, MAX_WAVEFORM_POINTS, &mut self.waveform, waveform_level);
        decimate_into(input.spectrum, MAX_SPECTRUM_BINS, &mut self.spectrum, spectrum_level);

        let uniforms = ScopeUniforms {
            resolution: [input.width as f32, input.height as f32],
            time: input.timestamp.as_secs_f32(),
            waveform_len: self.waveform.len() as u32,
            spectrum_len: self.spectrum.len() as u32,
            sample_rate: input.sample_rate as f32,
            _padding: [0.0; 2],
        };
        let queue = &self.gpu.queue;
        queue.write_buffer(&self.uniforms, 0, bytemuck::bytes_of(&uniforms));
        queue.write_buffer(&self.spectrum_buffer, 0, bytemuck::cast_slice(&self.spectrum));
        queue.write_buffer(&self.waveform_buffer, 0, bytemuck::cast_slice(&self.waveform));

        let offscreen = match self.target.take() {
            Some(t) if t.matches(input.width, input.height) => t,
            _ => {
                log::debug!("Creating {}x{} scope target", input.width, input.height);
                OffscreenTarget::new(&self.gpu, input.width, input.height)?
            }
        };
        let drawn = offscreen.draw_into(&self.gpu, &self.pipeline, &self.bind_group, target);
        self.target = Some(offscreen);
        drawn?;

        reduce_bit_depth(target, input.bit_depth);
        Ok(())
    }
}

fn layout_entry(binding: u32, ty: wgpu::BufferBindingType) -> wgpu::BindGroupLayoutEntry {
    // Storage buffers are only read by the fragment stage
    let visibility = match ty {
        wgpu::BufferBindingType::Uniform => wgpu::ShaderStages::VERTEX_FRAGMENT,
        _ => wgpu::ShaderStages::FRAGMENT,
    };
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn create_buffer(
    device: &wgpu::Device,
    label: &str,
    size: usize,
    usage: wgpu::BufferUsages,
) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size: size as u64,
        usage: usage | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

fn build_pipeline(device: &wgpu::Device, layout: &wgpu::BindGroupLayout) -> wgpu::RenderPipeline {
    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("scope_shader"),
        source: wgpu::ShaderSource::Wgsl(SHADER.into()),
    });
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("scope_pipeline_layout"),
        bind_group_layouts: &[layout],
        push_constant_ranges: &[],
    });

    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some("scope_pipeline"),
        layout: Some(&pipeline_layout),
        vertex: wgpu::VertexState {
            module: &module,
            entry_point: Some("vs_main"),
            buffers: &[],
            compilation_options: Default::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module: &module,
            entry_point: Some("fs_main"),
            targets: &[Some(TARGET_FORMAT.into())],
            compilation_options: Default::default(),
        }),
        primitive: wgpu::PrimitiveState::default(),
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
        cache: None,
    })
}

/// Signed waveform level in [-1, 1].
fn waveform_level(byte: u8) -> f32 {
    (byte as f32 - 128.0) / 127.5
}

/// Spectrum magnitude in [0, 1]; bytes below the midpoint never occur.
fn spectrum_level(byte: u8) -> f32 {
    ((byte as f32 - 128.0) / 127.5).clamp(0.0, 1.0)
}

/// Copy `src` into `out` through `level`, keeping every n-th byte so that at
/// most `max` values remain.
fn decimate_into(src: &[u8], max: usize, out: &mut Vec<f32>, level: fn(u8) -> f32) {
    out.clear();
    let step = src.len().div_ceil(max).max(1);
    out.extend(src.iter().step_by(step).map(|&b| level(b)));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniforms_are_16_byte_aligned() {
        assert_eq!(std::mem::size_of::<ScopeUniforms>() % 16, 0);
    }

    #[test]
    fn test_shader_declares_entry_points() {
        assert!(SHADER.contains("fn vs_main"));
        assert!(SHADER.contains("fn fs_main"));
        assert!(SHADER.contains("@binding(2)"));
    }

    #[test]
    fn test_decimate_keeps_short_input() {
        let mut out = Vec::new();
        decimate_into(&[0, 128, 255], 8, &mut out, waveform_level);
        assert_eq!(out.len(), 3);
        assert!((out[0] + 1.0039).abs() < 1e-3);
        assert_eq!(out[1], 0.0);
        assert!((out[2] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_decimate_caps_length() {
        let src = vec![128u8; 4096];
        let mut out = Vec::new();
        decimate_into(&src, MAX_WAVEFORM_POINTS, &mut out, waveform_level);
        assert_eq!(out.len(), MAX_WAVEFORM_POINTS);

        let src = vec![128u8; 3000];
        decimate_into(&src, MAX_WAVEFORM_POINTS, &mut out, waveform_level);
        assert!(out.len() <= MAX_WAVEFORM_POINTS);
    }

    #[test]
    fn test_spectrum_level_is_non_negative() {
        assert_eq!(spectrum_level(0), 0.0);
        assert_eq!(spectrum_level(128), 0.0);
        assert!((spectrum_level(255) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_target_past_device_limit_fails_without_panicking() {
        let Ok(mut scope) = ScopeSynthesizer::new() else {
            return;
        };
        let width = scope.gpu.limits.max_texture_dimension_2d + 1;
        let waveform = vec![128u8; 256];
        let spectrum = vec![200u8; 128];
        let input = SynthesisInput {
            waveform: &waveform,
            spectrum: &spectrum,
            sample_rate: 48000,
            width,
            height: 2,
            bit_depth: 24,
            timestamp: std::time::Duration::ZERO,
        };
        let mut target = vec![7u8; input.frame_len()];
        let err = scope.synthesize(&input, &mut target).unwrap_err();
        assert!(matches!(err, SynthesisError::Device(_)));
        assert!(target.iter().all(|&b| b == 7));
    }
}
