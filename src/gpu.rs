//! wgpu consumer of the instance buffer.
//!
//! [`InstanceRenderer`] owns a growable vertex buffer stepped per instance and
//! draws the whole population with one `draw(0..6, 0..count)` call. It does
//! not create a device, surface or window; the host application passes in its
//! own device, queue and render pass.
//!
//! ```ignore
//! let mut renderer = InstanceRenderer::new(&device, surface_format, Some(DEPTH_FORMAT));
//!
//! // Every frame:
//! engine.tick();
//! renderer.upload(&device, &queue, engine.instances());
//! renderer.update_camera(&queue, &CameraUniform::look_at(eye, target, aspect, fov_y));
//! renderer.draw(&mut pass);
//! ```

use crate::render::{InstanceRecord, INSTANCE_SHADER_WGSL};
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};
use wgpu::util::DeviceExt;

/// Records allocated up front.
const INITIAL_CAPACITY: usize = 1024;

const INSTANCE_ATTRIBUTES: [wgpu::VertexAttribute; 6] = wgpu::vertex_attr_array![
    0 => Float32x4,
    1 => Float32x4,
    2 => Float32x4,
    3 => Float32x4,
    4 => Float32x4,
    5 => Float32x4,
];

/// Camera data for the instance shader.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct CameraUniform {
    pub view_proj: [[f32; 4]; 4],
    /// World-space camera right axis.
    pub right: [f32; 4],
    /// World-space camera up axis.
    pub up: [f32; 4],
    /// View-space light direction.
    pub light_dir: [f32; 4],
}

impl CameraUniform {
    /// Perspective camera at `eye` looking at `target`.
    pub fn look_at(eye: Vec3, target: Vec3, aspect: f32, fov_y: f32) -> Self {
        let view = Mat4::look_at_rh(eye, target, Vec3::Y);
        let proj = Mat4::perspective_rh(fov_y, aspect.max(1e-3), 0.1, 2_000.0);
        let forward = (target - eye).normalize_or(Vec3::NEG_Z);
        let right = forward.cross(Vec3::Y).normalize_or(Vec3::X);
        let up = right.cross(forward);
        Self {
            view_proj: (proj * view).to_cols_array_2d(),
            right: right.extend(0.0).to_array(),
            up: up.extend(0.0).to_array(),
            light_dir: Vec3::new(0.4, 0.8, 0.6).normalize().extend(0.0).to_array(),
        }
    }
}

/// Draws instance records with a single instanced call.
pub struct InstanceRenderer {
    pipeline: wgpu::RenderPipeline,
    camera_buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
    instance_buffer: wgpu::Buffer,
    /// Records the instance buffer can hold.
    capacity: usize,
    count: u32,
}

impl InstanceRenderer {
    pub fn new(
        device: &wgpu::Device,
        color_format: wgpu::TextureFormat,
        depth_format: Option<wgpu::TextureFormat>,
    ) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Balloon Instance Shader"),
            source: wgpu::ShaderSource::Wgsl(INSTANCE_SHADER_WGSL.into()),
        });

        let camera_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Balloon Camera Buffer"),
            contents: bytemuck::cast_slice(&[CameraUniform::look_at(
                Vec3::new(0.0, 10.0, 60.0),
                Vec3::ZERO,
                16.0 / 9.0,
                45f32.to_radians(),
            )]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Balloon Camera Layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Balloon Camera Bind Group"),
            layout: &bind_group_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: camera_buffer.as_entire_binding(),
            }],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Balloon Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Balloon Pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[Self::vertex_layout()],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: color_format,
                    blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                cull_mode: None,
                ..Default::default()
            },
            depth_stencil: depth_format.map(|format| wgpu::DepthStencilState {
                format,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::Less,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        let instance_buffer = create_instance_buffer(device, INITIAL_CAPACITY);

        Self {
            pipeline,
            camera_buffer,
            bind_group,
            instance_buffer,
            capacity: INITIAL_CAPACITY,
            count: 0,
        }
    }

    /// Vertex buffer layout of [`InstanceRecord`], one step per instance.
    pub fn vertex_layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: InstanceRecord::SIZE as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Instance,
            attributes: &INSTANCE_ATTRIBUTES,
        }
    }

    /// Copy this tick's records to the GPU, growing the buffer if needed.
    pub fn upload(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, records: &[InstanceRecord]) {
        if records.len() > self.capacity {
            self.capacity = records.len().next_power_of_two();
            self.instance_buffer = create_instance_buffer(device, self.capacity);
            log::debug!("instance buffer grown to {} records", self.capacity);
        }
        if !records.is_empty() {
            queue.write_buffer(&self.instance_buffer, 0, bytemuck::cast_slice(records));
        }
        self.count = records.len() as u32;
    }

    pub fn update_camera(&self, queue: &wgpu::Queue, camera: &CameraUniform) {
        queue.write_buffer(&self.camera_buffer, 0, bytemuck::cast_slice(&[*camera]));
    }

    /// Record the draw. One call for the whole population.
    pub fn draw(&self, pass: &mut wgpu::RenderPass<'_>) {
        if self.count == 0 {
            return;
        }
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &self.bind_group, &[]);
        pass.set_vertex_buffer(0, self.instance_buffer.slice(..));
        pass.draw(0..6, 0..self.count);
    }

    #[inline]
    pub fn instance_count(&self) -> u32 {
        self.count
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

fn create_instance_buffer(device: &wgpu::Device, capacity: usize) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Balloon Instance Buffer"),
        size: (capacity * InstanceRecord::SIZE) as wgpu::BufferAddress,
        usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_layout_matches_record() {
        let layout = InstanceRenderer::vertex_layout();
        assert_eq!(layout.array_stride, 96);
        assert_eq!(layout.step_mode, wgpu::VertexStepMode::Instance);
        let offsets: Vec<u64> = layout.attributes.iter().map(|a| a.offset).collect();
        assert_eq!(offsets, vec![0, 16, 32, 48, 64, 80]);
    }

    #[test]
    fn test_camera_axes_are_orthonormal() {
        let camera = CameraUniform::look_at(Vec3::new(0.0, 10.0, 60.0), Vec3::ZERO, 1.5, 0.8);
        let right = Vec3::from_slice(&camera.right[..3]);
        let up = Vec3::from_slice(&camera.up[..3]);
        assert!((right.length() - 1.0).abs() < 1e-5);
        assert!((up.length() - 1.0).abs() < 1e-5);
        assert!(right.dot(up).abs() < 1e-5);
        assert!(up.y > 0.0);
    }

    #[test]
    fn test_camera_projects_target_to_centre() {
        let camera = CameraUniform::look_at(Vec3::new(0.0, 5.0, 20.0), Vec3::ZERO, 1.0, 0.8);
        let clip = Mat4::from_cols_array_2d(&camera.view_proj) * Vec3::ZERO.extend(1.0);
        let ndc = clip.truncate() / clip.w;
        assert!(ndc.x.abs() < 1e-5);
        assert!(ndc.y.abs() < 1e-5);
    }
}
