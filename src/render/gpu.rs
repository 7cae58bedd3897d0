//! Headless wgpu device plus an offscreen target that can be read back.

use anyhow::{Context, Result};

use super::SynthesisError;

pub const TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub adapter_name: String,
    pub limits: wgpu::Limits,
}

impl GpuContext {
    pub fn new() -> Result<Self> {
        pollster::block_on(Self::init_async())
    }

    async fn init_async() -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .context("No GPU adapter available")?;

        let info = adapter.get_info();
        log::info!("GPU adapter: {} ({:?})", info.name, info.backend);

        let descriptor = wgpu::DeviceDescriptor {
            label: Some("tapvis"),
            required_limits: adapter.limits(),
            ..Default::default()
        };
        let (device, queue) = adapter
            .request_device(&descriptor, None)
            .await
            .context("Failed to open GPU device")?;
        let limits = device.limits();
        log::debug!(
            "GPU limits: max texture {}, max buffer {} bytes",
            limits.max_texture_dimension_2d,
            limits.max_buffer_size
        );

        Ok(Self {
            device,
            queue,
            adapter_name: info.name,
            limits,
        })
    }
}

/// Color attachment of a fixed size and a mappable buffer its rows are
/// copied into. Rows in the buffer are padded to the copy alignment.
pub struct OffscreenTarget {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    readback: wgpu::Buffer,
    size: wgpu::Extent3d,
    row_bytes: u32,
    padded_row_bytes: u32,
}

impl OffscreenTarget {
    pub fn new(gpu: &GpuContext, width: u32, height: u32) -> Result<Self, SynthesisError> {
        check_target_size(&gpu.limits, width, height)?;
        let size = wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        };
        let texture = gpu.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("offscreen_target"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TARGET_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&Default::default());

        let (row_bytes, padded_row_bytes) = row_layout(width);
        let readback = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("offscreen_readback"),
            size: padded_row_bytes as u64 * height as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        Ok(Self {
            texture,
            view,
            readback,
            size,
            row_bytes,
            padded_row_bytes,
        })
    }

    pub fn matches(&self, width: u32, height: u32) -> bool {
        self.size.width == width && self.size.height == height
    }

    /// Run one fullscreen-triangle pass, then copy the result into `target`
    /// with the row padding stripped. `target` is written only after the
    /// readback succeeded.
    pub fn draw_into(
        &self,
        gpu: &GpuContext,
        pipeline: &wgpu::RenderPipeline,
        bind_group: &wgpu::BindGroup,
        target: &mut [u8],
    ) -> Result<(), SynthesisError> {
        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
        self.record_pass(&mut encoder, pipeline, bind_group);
        encoder.copy_texture_to_buffer(
            self.texture.as_image_copy(),
            wgpu::TexelCopyBufferInfo {
                buffer: &self.readback,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(self.padded_row_bytes),
                    rows_per_image: Some(self.size.height),
                },
            },
            self.size,
        );
        gpu.queue.submit([encoder.finish()]);

        self.read_rows(gpu, target)
    }

    fn record_pass(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        pipeline: &wgpu::RenderPipeline,
        bind_group: &wgpu::BindGroup,
    ) {
        let attachment = wgpu::RenderPassColorAttachment {
            view: &self.view,
            resolve_target: None,
            ops: wgpu::Operations {
                load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                store: wgpu::StoreOp::Store,
            },
        };
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("offscreen_pass"),
            color_attachments: &[Some(attachment)],
            ..Default::default()
        });
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, bind_group, &[]);
        pass.draw(0..3, 0..1);
    }

    fn read_rows(&self, gpu: &GpuContext, target: &mut [u8]) -> Result<(), SynthesisError> {
        let slice = self.readback.slice(..);
        let (tx, rx) = crossbeam_channel::bounded(1);
        slice.map_async(wgpu::MapMode::Read, move |mapped| {
            let _ = tx.send(mapped);
        });
        gpu.device.poll(wgpu::Maintain::Wait);

        let mapped = rx
            .recv()
            .map_err(|_| SynthesisError::Device("readback was cancelled".to_string()))?;
        mapped.map_err(|e| SynthesisError::Device(e.to_string()))?;

        {
            let data = slice.get_mapped_range();
            let rows = data.chunks_exact(self.padded_row_bytes as usize);
            for (dst, src) in target.chunks_exact_mut(self.row_bytes as usize).zip(rows) {
                dst.copy_from_slice(&src[..self.row_bytes as usize]);
            }
        }
        self.readback.unmap();
        Ok(())
    }
}

/// Unpadded and padded byte length of one RGBA row.
fn row_layout(width: u32) -> (u32, u32) {
    let row_bytes = width * 4;
    (row_bytes, row_bytes.next_multiple_of(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT))
}

/// Reject targets the device cannot hold, before any resource is created.
pub fn check_target_size(limits: &wgpu::Limits, width: u32, height: u32) -> Result<(), SynthesisError> {
    let max = limits.max_texture_dimension_2d;
    if width == 0 || height == 0 || width > max || height > max {
        return Err(SynthesisError::Device(format!(
            "render target {}x{} exceeds the device texture limit of {}",
            width, height, max
        )));
    }
    let (_, padded_row_bytes) = row_layout(width);
    let readback = padded_row_bytes as u64 * height as u64;
    if readback > limits.max_buffer_size {
        return Err(SynthesisError::Device(format!(
            "readback of {} bytes exceeds the device buffer limit of {}",
            readback, limits.max_buffer_size
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows_pad_to_copy_alignment() {
        assert_eq!(row_layout(64), (256, 256));
        assert_eq!(row_layout(65), (260, 512));
        assert_eq!(row_layout(1), (4, 256));
    }

    #[test]
    fn test_oversized_target_is_device_error() {
        let limits = wgpu::Limits::downlevel_defaults();
        assert_eq!(limits.max_texture_dimension_2d, 2048);
        assert!(check_target_size(&limits, 2048, 1536).is_ok());

        let err = check_target_size(&limits, 2560, 64).unwrap_err();
        assert!(matches!(err, SynthesisError::Device(ref msg) if msg.contains("2560x64")));
        assert!(check_target_size(&limits, 64, 4096).is_err());
        assert!(check_target_size(&limits, 0, 64).is_err());
    }

    #[test]
    fn test_readback_buffer_limit() {
        let limits = wgpu::Limits {
            max_buffer_size: 256 * 100,
            ..wgpu::Limits::default()
        };
        assert!(check_target_size(&limits, 64, 100).is_ok());
        assert!(check_target_size(&limits, 64, 101).is_err());
    }
}
