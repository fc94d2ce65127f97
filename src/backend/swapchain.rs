// Swapchain - Window presentation
//
// Manages the chain of images we render to and present to the screen, plus
// one view and one framebuffer per image. Per-image resources live in a flat
// arena indexed by image index and are only ever created and destroyed as a
// batch: rebuild throws the whole set away and builds a fresh one.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;
use super::gpu::{is_stale, Gpu, SwapchainDesc};

/// Source of the drawable size (the window)
pub trait Drawable {
    /// Current drawable size in pixels; 0x0 while minimized
    fn drawable_extent(&self) -> vk::Extent2D;

    /// Block until the window system may have changed the size.
    ///
    /// Returns `false` when the caller cannot block here (an event-loop
    /// thread whose size only changes through events it has yet to pump);
    /// the build is then deferred and the chain stays stale.
    fn wait_for_events(&self) -> bool;
}

/// What the chain tries to get from the surface
#[derive(Clone, Copy, Debug)]
pub struct SwapchainPreferences {
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
}

impl Default for SwapchainPreferences {
    fn default() -> Self {
        Self {
            surface_format: vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            // MAILBOX: no vsync, no tearing, triple buffered
            present_mode: vk::PresentModeKHR::MAILBOX,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChainState {
    Valid,
    /// Surface no longer matches; rebuild before the next acquire
    Stale,
}

/// Result of asking for the next image
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Acquire {
    /// The image now belongs to us until presented
    Image { index: u32, suboptimal: bool },
    /// The chain was out of date and has been rebuilt; retry next frame
    Stale,
}

/// Everything render content needs to draw into one acquired image
#[derive(Clone, Copy, Debug)]
pub struct FrameTarget {
    pub image_index: u32,
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub framebuffer: vk::Framebuffer,
    pub render_pass: vk::RenderPass,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

struct PresentableImage {
    image: vk::Image,
    view: vk::ImageView,
    framebuffer: vk::Framebuffer,
}

pub struct Swapchain<G: Gpu, D: Drawable> {
    swapchain: vk::SwapchainKHR,
    render_pass: vk::RenderPass,
    images: Vec<PresentableImage>,
    surface_format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,
    state: ChainState,
    generation: u64,
    preferences: SwapchainPreferences,
    drawable: Arc<D>,
    gpu: Arc<G>,
}

impl<G: Gpu, D: Drawable> Swapchain<G, D> {
    /// Create and build a chain for the surface behind `gpu`
    pub fn new(gpu: Arc<G>, drawable: Arc<D>, preferences: SwapchainPreferences) -> Result<Self> {
        let mut chain = Self {
            swapchain: vk::SwapchainKHR::null(),
            render_pass: vk::RenderPass::null(),
            images: Vec::new(),
            surface_format: preferences.surface_format,
            present_mode: preferences.present_mode,
            extent: vk::Extent2D::default(),
            state: ChainState::Stale,
            generation: 0,
            preferences,
            drawable,
            gpu,
        };
        chain.build()?;
        Ok(chain)
    }

    /// Negotiate format, mode, extent and image count with the surface and
    /// create the image set. Blocks while the drawable has zero area, unless
    /// the drawable declines to wait, in which case nothing is created and
    /// the chain stays `Stale`.
    pub fn build(&mut self) -> Result<()> {
        let Some((caps, extent)) = self.wait_for_usable_extent()? else {
            log::debug!("Drawable has zero area and cannot wait, deferring swapchain build");
            self.state = ChainState::Stale;
            return Ok(());
        };

        let formats = self.gpu.surface_formats()
            .context("Failed to query surface formats")?;
        let present_modes = self.gpu.surface_present_modes()
            .context("Failed to query surface present modes")?;

        let surface_format = choose_surface_format(&formats, self.preferences.surface_format)
            .context("No suitable surface format")?;
        let present_mode = choose_present_mode(&present_modes, self.preferences.present_mode);
        let image_count = choose_image_count(&caps);

        let desc = SwapchainDesc {
            min_image_count: image_count,
            surface_format,
            present_mode,
            extent,
            pre_transform: caps.current_transform,
        };

        let (swapchain, images) = self.gpu.create_swapchain(&desc)
            .context("Failed to create swapchain")?;
        self.swapchain = swapchain;
        self.surface_format = surface_format;
        self.present_mode = present_mode;
        self.extent = extent;

        if let Err(e) = self.create_image_resources(&images) {
            self.teardown();
            return Err(e);
        }

        self.state = ChainState::Valid;
        self.generation += 1;

        log::info!(
            "Created swapchain #{}: {}x{}, {:?}/{:?}, {:?}, {} images",
            self.generation,
            extent.width,
            extent.height,
            surface_format.format,
            surface_format.color_space,
            present_mode,
            self.images.len()
        );
        Ok(())
    }

    fn wait_for_usable_extent(&self) -> Result<Option<(vk::SurfaceCapabilitiesKHR, vk::Extent2D)>> {
        loop {
            let drawable = self.drawable.drawable_extent();
            if !is_zero_area(drawable) {
                let caps = self.gpu.surface_capabilities()
                    .context("Failed to query surface capabilities")?;
                let extent = choose_extent(&caps, drawable);
                if !is_zero_area(extent) {
                    return Ok(Some((caps, extent)));
                }
            }

            log::debug!("Drawable has zero area, waiting before building swapchain");
            if !self.drawable.wait_for_events() {
                return Ok(None);
            }
        }
    }

    fn create_image_resources(&mut self, images: &[vk::Image]) -> Result<()> {
        let format = self.surface_format.format;

        self.render_pass = self.gpu.create_render_pass(format)
            .context("Failed to create render pass")?;

        self.images.reserve(images.len());
        for &image in images {
            let view = self.gpu.create_image_view(image, format)
                .context("Failed to create image view")?;

            let framebuffer = match self.gpu.create_framebuffer(self.render_pass, view, self.extent) {
                Ok(framebuffer) => framebuffer,
                Err(e) => {
                    self.gpu.destroy_image_view(view);
                    return Err(e).context("Failed to create framebuffer");
                }
            };

            self.images.push(PresentableImage { image, view, framebuffer });
        }
        Ok(())
    }

    /// Destroy every per-image resource and the chain handle.
    /// The device must be idle. Safe to call repeatedly.
    pub fn teardown(&mut self) {
        for presentable in self.images.drain(..) {
            self.gpu.destroy_framebuffer(presentable.framebuffer);
            self.gpu.destroy_image_view(presentable.view);
        }

        if self.render_pass != vk::RenderPass::null() {
            self.gpu.destroy_render_pass(self.render_pass);
            self.render_pass = vk::RenderPass::null();
        }

        if self.swapchain != vk::SwapchainKHR::null() {
            self.gpu.destroy_swapchain(self.swapchain);
            self.swapchain = vk::SwapchainKHR::null();
        }

        self.state = ChainState::Stale;
    }

    /// Wait for the device to go idle, drop the old image set and build a
    /// new one
    pub fn rebuild(&mut self) -> Result<()> {
        log::debug!("Rebuilding swapchain #{}", self.generation);

        self.gpu.device_wait_idle()
            .context("Failed to wait for device idle before swapchain rebuild")?;
        self.teardown();
        self.build()
    }

    /// Acquire the next presentable image, signaling `semaphore` (and
    /// `fence`, if not null) when the GPU may write to it.
    pub fn acquire_next(&mut self, semaphore: vk::Semaphore, fence: vk::Fence) -> Result<Acquire> {
        match self.gpu.acquire_next_image(self.swapchain, semaphore, fence) {
            Ok((index, suboptimal)) => {
                if suboptimal {
                    // Still usable this frame; refresh after present
                    self.state = ChainState::Stale;
                }
                Ok(Acquire::Image { index, suboptimal })
            }
            Err(e) if is_stale(e) => {
                log::debug!("Acquire reported {:?}, rebuilding swapchain", e);
                self.state = ChainState::Stale;
                self.rebuild()?;
                Ok(Acquire::Stale)
            }
            Err(e) => Err(e).context("Failed to acquire swapchain image"),
        }
    }

    /// Present `image_index` once `wait` is signaled.
    ///
    /// Returns `Ok(false)` when the surface reported the chain as out of date
    /// or suboptimal; the chain has already been rebuilt in that case.
    pub fn present(&mut self, image_index: u32, wait: vk::Semaphore) -> Result<bool> {
        let stale = match self.gpu.queue_present(self.swapchain, image_index, wait) {
            Ok(suboptimal) => suboptimal || self.state == ChainState::Stale,
            Err(e) if is_stale(e) => true,
            Err(e) => return Err(e).context("Failed to present swapchain image"),
        };

        if stale {
            log::debug!("Present reported a stale swapchain, rebuilding");
            self.state = ChainState::Stale;
            self.rebuild()?;
            return Ok(false);
        }
        Ok(true)
    }

    pub fn mark_stale(&mut self) {
        self.state = ChainState::Stale;
    }

    pub fn state(&self) -> ChainState {
        self.state
    }

    /// Number of successful builds so far
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    pub fn format(&self) -> vk::SurfaceFormatKHR {
        self.surface_format
    }

    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    pub fn framebuffer(&self, image_index: u32) -> Option<vk::Framebuffer> {
        self.images.get(image_index as usize).map(|p| p.framebuffer)
    }

    pub fn target(&self, image_index: u32) -> Option<FrameTarget> {
        self.images.get(image_index as usize).map(|p| FrameTarget {
            image_index,
            image: p.image,
            view: p.view,
            framebuffer: p.framebuffer,
            render_pass: self.render_pass,
            format: self.surface_format.format,
            extent: self.extent,
        })
    }
}

impl<G: Gpu, D: Drawable> Drop for Swapchain<G, D> {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn is_zero_area(extent: vk::Extent2D) -> bool {
    extent.width == 0 || extent.height == 0
}

/// Exact match on the preferred format + color space, else the first one
pub fn choose_surface_format(
    formats: &[vk::SurfaceFormatKHR],
    preferred: vk::SurfaceFormatKHR,
) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|f| f.format == preferred.format && f.color_space == preferred.color_space)
        .or_else(|| formats.first())
        .copied()
}

/// The preferred mode when available, else FIFO (always supported)
pub fn choose_present_mode(
    modes: &[vk::PresentModeKHR],
    preferred: vk::PresentModeKHR,
) -> vk::PresentModeKHR {
    modes
        .iter()
        .copied()
        .find(|&mode| mode == preferred)
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// Surface extent verbatim, unless the surface leaves it to us (u32::MAX),
/// in which case the drawable size clamped to the surface limits
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, drawable: vk::Extent2D) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: drawable.width.clamp(
                caps.min_image_extent.width,
                caps.max_image_extent.width,
            ),
            height: drawable.height.clamp(
                caps.min_image_extent.height,
                caps.max_image_extent.height,
            ),
        }
    }
}

/// One more than the minimum, capped by the maximum (0 means no maximum)
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let mut image_count = caps.min_image_count + 1;
    if caps.max_image_count > 0 && image_count > caps.max_image_count {
        image_count = caps.max_image_count;
    }
    image_count
}
