// Backend module - Vulkan presentation layer
//
// Design: Frame loop logic speaks to the GPU through the `Gpu` trait only;
// `VulkanDevice` is the real implementation.
// Ownership: RenderContext owns sync objects, swapchain and command recorder.

pub mod buffer;
pub mod command;
pub mod context;
pub mod device;
pub mod gpu;
pub mod pipeline;
pub mod shader;
pub mod swapchain;
pub mod sync;
mod vulkan;

#[cfg(test)]
pub mod mock;

pub use buffer::GpuBuffer;
pub use command::CommandRecorder;
pub use context::{ContextOptions, FrameOutcome, FrameState, RenderContent, RenderContext};
pub use device::VulkanDevice;
pub use gpu::Gpu;
pub use swapchain::{ChainState, Drawable, FrameTarget, Swapchain, SwapchainPreferences};
