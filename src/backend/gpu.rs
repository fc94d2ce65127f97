// GPU seam - the device, queue and surface calls the frame loop depends on
//
// Everything above this trait (sync registry, presentation chain, command
// recorder, frame driver) speaks only in ash handle types and goes through
// here. VulkanDevice implements it for real; tests use a scripted fake.

use ash::prelude::VkResult;
use ash::vk;

/// Parameters for creating a presentation chain
#[derive(Clone, Copy, Debug)]
pub struct SwapchainDesc {
    pub min_image_count: u32,
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
}

/// One command buffer submission
#[derive(Clone, Copy, Debug)]
pub struct SubmitBatch {
    pub command_buffer: vk::CommandBuffer,
    /// Semaphore to wait on, and the stage that waits
    pub wait: Option<(vk::Semaphore, vk::PipelineStageFlags)>,
    pub signal: Option<vk::Semaphore>,
}

impl SubmitBatch {
    /// A bare submission with no semaphores (one-shot uploads)
    pub fn immediate(command_buffer: vk::CommandBuffer) -> Self {
        Self {
            command_buffer,
            wait: None,
            signal: None,
        }
    }
}

pub trait Gpu {
    // ─────────────────────────────────────────────────────────────────────
    // Fences (CPU <-> GPU)
    // ─────────────────────────────────────────────────────────────────────
    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence>;
    /// Blocks with no timeout until the fence is signaled
    fn wait_for_fence(&self, fence: vk::Fence) -> VkResult<()>;
    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()>;
    fn destroy_fence(&self, fence: vk::Fence);

    // ─────────────────────────────────────────────────────────────────────
    // Semaphores (GPU <-> GPU)
    // ─────────────────────────────────────────────────────────────────────
    fn create_semaphore(&self) -> VkResult<vk::Semaphore>;
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);

    // ─────────────────────────────────────────────────────────────────────
    // Surface queries
    // ─────────────────────────────────────────────────────────────────────
    fn surface_capabilities(&self) -> VkResult<vk::SurfaceCapabilitiesKHR>;
    fn surface_formats(&self) -> VkResult<Vec<vk::SurfaceFormatKHR>>;
    fn surface_present_modes(&self) -> VkResult<Vec<vk::PresentModeKHR>>;

    // ─────────────────────────────────────────────────────────────────────
    // Presentation chain
    // ─────────────────────────────────────────────────────────────────────
    fn create_swapchain(&self, desc: &SwapchainDesc) -> VkResult<(vk::SwapchainKHR, Vec<vk::Image>)>;
    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR);
    fn create_image_view(&self, image: vk::Image, format: vk::Format) -> VkResult<vk::ImageView>;
    fn destroy_image_view(&self, view: vk::ImageView);
    fn create_render_pass(&self, format: vk::Format) -> VkResult<vk::RenderPass>;
    fn destroy_render_pass(&self, render_pass: vk::RenderPass);
    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        view: vk::ImageView,
        extent: vk::Extent2D,
    ) -> VkResult<vk::Framebuffer>;
    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer);

    /// Returns (image index, suboptimal)
    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        semaphore: vk::Semaphore,
        fence: vk::Fence,
    ) -> VkResult<(u32, bool)>;

    /// Returns true when the present succeeded but the chain is suboptimal
    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> VkResult<bool>;

    // ─────────────────────────────────────────────────────────────────────
    // Commands
    // ─────────────────────────────────────────────────────────────────────
    fn create_command_pool(&self) -> VkResult<vk::CommandPool>;
    fn destroy_command_pool(&self, pool: vk::CommandPool);
    fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        count: u32,
    ) -> VkResult<Vec<vk::CommandBuffer>>;
    fn free_command_buffers(&self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]);
    fn begin_command_buffer(&self, buffer: vk::CommandBuffer, one_time: bool) -> VkResult<()>;
    fn end_command_buffer(&self, buffer: vk::CommandBuffer) -> VkResult<()>;
    fn queue_submit(&self, batch: &SubmitBatch, fence: vk::Fence) -> VkResult<()>;
    fn queue_wait_idle(&self) -> VkResult<()>;

    /// Full barrier: every queue drained
    fn device_wait_idle(&self) -> VkResult<()>;
}

/// True when the surface rejected an operation because the chain no longer
/// matches it. Anything else from acquire/present is fatal.
pub fn is_stale(result: vk::Result) -> bool {
    matches!(
        result,
        vk::Result::ERROR_OUT_OF_DATE_KHR | vk::Result::SUBOPTIMAL_KHR
    )
}
