// Frame pacing and presentation for a Vulkan window
//
// backend - GPU seam, sync registry, swapchain, command recorder, frame driver,
//           buffers, shaders and pipelines
// config  - config.toml loading
// render  - winit drawable and the clear and triangle content

pub mod backend;
pub mod config;
pub mod render;
