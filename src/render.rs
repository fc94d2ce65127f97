// Window-side pieces of the frame loop: the drawable a winit window provides,
// and the content the demo binary draws.

use anyhow::{Context, Result};
use ash::vk;
use std::path::Path;
use std::sync::Arc;
use winit::window::Window;
use crate::backend::buffer::{self, GpuBuffer};
use crate::backend::{pipeline, shader};
use crate::backend::{Drawable, FrameTarget, RenderContent, RenderContext, VulkanDevice};

impl Drawable for Window {
    fn drawable_extent(&self) -> vk::Extent2D {
        let size = self.inner_size();
        vk::Extent2D {
            width: size.width,
            height: size.height,
        }
    }

    fn wait_for_events(&self) -> bool {
        // Called on the event loop thread; the size can only change once
        // control returns to it, so the build waits for a later frame
        false
    }
}

/// Clears the whole image to one color
///
/// The render pass does the work: load op CLEAR on the only attachment, and
/// the final layout transition to PRESENT_SRC.
pub struct ClearPass {
    device: Arc<VulkanDevice>,
    clear_value: vk::ClearValue,
}

impl ClearPass {
    pub fn new(device: Arc<VulkanDevice>, rgba: [f32; 4]) -> Self {
        Self {
            device,
            clear_value: pipeline::clear_color(rgba),
        }
    }
}

impl RenderContent for ClearPass {
    fn record(&mut self, cmd: vk::CommandBuffer, target: &FrameTarget) -> Result<()> {
        let clear_values = [self.clear_value];
        let begin_info = vk::RenderPassBeginInfo::builder()
            .render_pass(target.render_pass)
            .framebuffer(target.framebuffer)
            .render_area(pipeline::render_area(target.extent))
            .clear_values(&clear_values);

        unsafe {
            self.device.device.cmd_begin_render_pass(cmd, &begin_info, vk::SubpassContents::INLINE);
            self.device.device.cmd_end_render_pass(cmd);
        }
        Ok(())
    }
}

// =============================================================================
// TRIANGLE
// =============================================================================

/// Vertex with a clip-space position and an RGB color
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct TriangleVertex {
    pub position: [f32; 2],
    pub color: [f32; 3],
}

impl TriangleVertex {
    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: std::mem::size_of::<Self>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 2] {
        [
            // Position at location 0
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 0,
                format: vk::Format::R32G32_SFLOAT,
                offset: std::mem::offset_of!(Self, position) as u32,
            },
            // Color at location 1
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 1,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: std::mem::offset_of!(Self, color) as u32,
            },
        ]
    }
}

/// Red, green and blue corners; Vulkan clip space has +y pointing down
pub const TRIANGLE_VERTICES: [TriangleVertex; 3] = [
    TriangleVertex { position: [0.0, -0.5], color: [1.0, 0.0, 0.0] },
    TriangleVertex { position: [0.5, 0.5], color: [0.0, 1.0, 0.0] },
    TriangleVertex { position: [-0.5, 0.5], color: [0.0, 0.0, 1.0] },
];

struct TrianglePipeline {
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
    format: vk::Format,
}

/// Draws one colored triangle over the clear color
///
/// The vertex buffer lives in device-local memory and is uploaded once at
/// startup. The pipeline is created on the first frame and again whenever
/// the chain comes back with a different color format.
pub struct TrianglePass {
    device: Arc<VulkanDevice>,
    vert_shader: vk::ShaderModule,
    frag_shader: vk::ShaderModule,
    pipeline: Option<TrianglePipeline>,
    vertex_buffer: GpuBuffer,
    vertex_count: u32,
    clear_value: vk::ClearValue,
}

impl TrianglePass {
    /// Load `triangle.{vert,frag}.spv` from `shader_dir` and upload the
    /// vertices through a one-shot submission on `context`
    pub fn new<D: Drawable>(
        device: Arc<VulkanDevice>,
        context: &mut RenderContext<VulkanDevice, D>,
        shader_dir: &Path,
        rgba: [f32; 4],
    ) -> Result<Self> {
        let vert_code = shader::load_spirv(&shader_dir.join("triangle.vert.spv"))?;
        let frag_code = shader::load_spirv(&shader_dir.join("triangle.frag.spv"))?;

        let vertex_buffer = buffer::upload_device_local(
            &device,
            context,
            "triangle vertices",
            vk::BufferUsageFlags::VERTEX_BUFFER,
            buffer::as_bytes(&TRIANGLE_VERTICES),
        )?;

        let vert_shader = shader::create_shader_module(&device.device, &vert_code)?;
        let frag_shader = match shader::create_shader_module(&device.device, &frag_code) {
            Ok(module) => module,
            Err(e) => {
                unsafe { device.device.destroy_shader_module(vert_shader, None) };
                return Err(e);
            }
        };

        log::info!("Triangle content ready ({} vertices)", TRIANGLE_VERTICES.len());

        Ok(Self {
            device,
            vert_shader,
            frag_shader,
            pipeline: None,
            vertex_buffer,
            vertex_count: TRIANGLE_VERTICES.len() as u32,
            clear_value: pipeline::clear_color(rgba),
        })
    }

    /// The pipeline for `target`'s format, created on demand
    fn pipeline_for(&mut self, target: &FrameTarget) -> Result<vk::Pipeline> {
        if let Some(current) = self.pipeline.as_ref() {
            if current.format == target.format {
                return Ok(current.pipeline);
            }
        }

        // A format change only happens across a rebuild, which waited for
        // the device; the old pipeline is no longer referenced
        self.destroy_pipeline();

        let (pipeline, layout) = pipeline::create_graphics_pipeline(
            &self.device.device,
            target.render_pass,
            self.vert_shader,
            self.frag_shader,
            &[TriangleVertex::binding_description()],
            &TriangleVertex::attribute_descriptions(),
        )
        .context("Failed to create triangle pipeline")?;

        log::debug!("Created triangle pipeline for {:?}", target.format);
        self.pipeline = Some(TrianglePipeline {
            pipeline,
            layout,
            format: target.format,
        });
        Ok(pipeline)
    }

    fn destroy_pipeline(&mut self) {
        if let Some(old) = self.pipeline.take() {
            unsafe {
                self.device.device.destroy_pipeline(old.pipeline, None);
                self.device.device.destroy_pipeline_layout(old.layout, None);
            }
        }
    }
}

impl RenderContent for TrianglePass {
    fn record(&mut self, cmd: vk::CommandBuffer, target: &FrameTarget) -> Result<()> {
        let pipeline = self.pipeline_for(target)?;

        let clear_values = [self.clear_value];
        let render_area = pipeline::render_area(target.extent);
        let begin_info = vk::RenderPassBeginInfo::builder()
            .render_pass(target.render_pass)
            .framebuffer(target.framebuffer)
            .render_area(render_area)
            .clear_values(&clear_values);

        let device = &self.device.device;
        unsafe {
            device.cmd_begin_render_pass(cmd, &begin_info, vk::SubpassContents::INLINE);
            device.cmd_set_viewport(cmd, 0, &[pipeline::viewport(target.extent)]);
            device.cmd_set_scissor(cmd, 0, &[render_area]);
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline);
            device.cmd_bind_vertex_buffers(cmd, 0, &[self.vertex_buffer.handle()], &[0]);
            device.cmd_draw(cmd, self.vertex_count, 1, 0, 0);
            device.cmd_end_render_pass(cmd);
        }
        Ok(())
    }
}

impl Drop for TrianglePass {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            log::warn!("Device wait failed before releasing triangle content: {:?}", e);
        }
        self.destroy_pipeline();
        unsafe {
            self.device.device.destroy_shader_module(self.frag_shader, None);
            self.device.device.destroy_shader_module(self.vert_shader, None);
        }
    }
}
