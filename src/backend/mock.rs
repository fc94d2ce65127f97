// Scripted GPU and drawable fakes for unit tests
//
// MockGpu hands out unique handles, tracks what is alive, models fence and
// command buffer state the way the driver would, and records every protocol
// violation instead of crashing so tests can assert on them.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};

use ash::prelude::VkResult;
use ash::vk::{self, Handle};
use parking_lot::Mutex;

use super::gpu::{Gpu, SubmitBatch, SwapchainDesc};
use super::swapchain::Drawable;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferState {
    Initial,
    Recording,
    Executable,
    Pending,
}

#[derive(Default)]
struct FenceState {
    signaled: bool,
    pending: Vec<u64>,
}

#[derive(Clone, Copy, Debug)]
pub struct SubmitRecord {
    pub command_buffer: vk::CommandBuffer,
    pub fence: vk::Fence,
    pub wait: Option<(vk::Semaphore, vk::PipelineStageFlags)>,
    pub signal: Option<vk::Semaphore>,
}

struct State {
    next_handle: u64,

    fences: HashMap<u64, FenceState>,
    semaphores: HashSet<u64>,
    swapchains: HashMap<u64, u32>,
    views: HashSet<u64>,
    render_passes: HashSet<u64>,
    framebuffers: HashMap<u64, u64>,
    pools: HashSet<u64>,
    buffers: HashMap<u64, BufferState>,
    unfenced: Vec<u64>,

    capabilities: vk::SurfaceCapabilitiesKHR,
    formats: Vec<vk::SurfaceFormatKHR>,
    present_modes: Vec<vk::PresentModeKHR>,
    acquire_script: VecDeque<VkResult<(u32, bool)>>,
    present_script: VecDeque<VkResult<bool>>,
    submit_error: Option<vk::Result>,
    end_error: Option<vk::Result>,
    fence_budget: Option<usize>,
    next_image: u32,

    swapchains_created: usize,
    swapchain_descs: Vec<SwapchainDesc>,
    submits: Vec<SubmitRecord>,
    acquires: usize,
    presented: Vec<u32>,
    device_wait_idles: usize,
    queue_wait_idles: usize,
    max_in_flight: usize,
    violations: Vec<String>,
}

impl State {
    fn handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    fn in_flight(&self) -> usize {
        self.buffers
            .values()
            .filter(|s| matches!(s, BufferState::Recording | BufferState::Pending))
            .count()
    }

    fn track_in_flight(&mut self) {
        let now = self.in_flight();
        self.max_in_flight = self.max_in_flight.max(now);
    }

    fn complete(&mut self, buffers: &[u64]) {
        for raw in buffers {
            if let Some(state) = self.buffers.get_mut(raw) {
                if *state == BufferState::Pending {
                    *state = BufferState::Executable;
                }
            }
        }
    }

    fn drain_all(&mut self) {
        let mut finished = std::mem::take(&mut self.unfenced);
        for fence in self.fences.values_mut() {
            if !fence.pending.is_empty() {
                finished.append(&mut fence.pending);
                fence.signaled = true;
            }
        }
        self.complete(&finished);
    }

    fn violation(&mut self, message: String) {
        self.violations.push(message);
    }
}

pub struct MockGpu {
    state: Mutex<State>,
}

pub const DEFAULT_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_SRGB,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

impl MockGpu {
    /// A surface with a fixed 800x600 extent, 2..=8 images, one sRGB format,
    /// and FIFO + MAILBOX
    pub fn new() -> Self {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 8,
            current_extent: vk::Extent2D { width: 800, height: 600 },
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D { width: 4096, height: 4096 },
            current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            ..Default::default()
        };

        Self {
            state: Mutex::new(State {
                next_handle: 0,
                fences: HashMap::new(),
                semaphores: HashSet::new(),
                swapchains: HashMap::new(),
                views: HashSet::new(),
                render_passes: HashSet::new(),
                framebuffers: HashMap::new(),
                pools: HashSet::new(),
                buffers: HashMap::new(),
                unfenced: Vec::new(),
                capabilities,
                formats: vec![DEFAULT_FORMAT],
                present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
                acquire_script: VecDeque::new(),
                present_script: VecDeque::new(),
                submit_error: None,
                end_error: None,
                fence_budget: None,
                next_image: 0,
                swapchains_created: 0,
                swapchain_descs: Vec::new(),
                submits: Vec::new(),
                acquires: 0,
                presented: Vec::new(),
                device_wait_idles: 0,
                queue_wait_idles: 0,
                max_in_flight: 0,
                violations: Vec::new(),
            }),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Scripting
    // ─────────────────────────────────────────────────────────────────────

    pub fn set_capabilities(&self, capabilities: vk::SurfaceCapabilitiesKHR) {
        self.state.lock().capabilities = capabilities;
    }

    pub fn set_formats(&self, formats: Vec<vk::SurfaceFormatKHR>) {
        self.state.lock().formats = formats;
    }

    pub fn set_present_modes(&self, modes: Vec<vk::PresentModeKHR>) {
        self.state.lock().present_modes = modes;
    }

    pub fn push_acquire(&self, result: VkResult<(u32, bool)>) {
        self.state.lock().acquire_script.push_back(result);
    }

    pub fn push_present(&self, result: VkResult<bool>) {
        self.state.lock().present_script.push_back(result);
    }

    pub fn fail_submits_with(&self, error: vk::Result) {
        self.state.lock().submit_error = Some(error);
    }

    /// Every later end_command_buffer fails, leaving the buffer recording
    pub fn fail_ends_with(&self, error: vk::Result) {
        self.state.lock().end_error = Some(error);
    }

    /// Allow `count` more fence creations, then fail with out-of-device-memory
    pub fn fail_fence_creation_after(&self, count: usize) {
        self.state.lock().fence_budget = Some(count);
    }

    // ─────────────────────────────────────────────────────────────────────
    // Inspection
    // ─────────────────────────────────────────────────────────────────────

    pub fn live_fences(&self) -> usize {
        self.state.lock().fences.len()
    }

    pub fn live_semaphores(&self) -> usize {
        self.state.lock().semaphores.len()
    }

    pub fn live_swapchains(&self) -> usize {
        self.state.lock().swapchains.len()
    }

    pub fn live_views(&self) -> usize {
        self.state.lock().views.len()
    }

    pub fn live_framebuffers(&self) -> usize {
        self.state.lock().framebuffers.len()
    }

    pub fn live_render_passes(&self) -> usize {
        self.state.lock().render_passes.len()
    }

    pub fn live_pools(&self) -> usize {
        self.state.lock().pools.len()
    }

    pub fn live_command_buffers(&self) -> usize {
        self.state.lock().buffers.len()
    }

    pub fn is_fence_signaled(&self, fence: vk::Fence) -> bool {
        self.state
            .lock()
            .fences
            .get(&fence.as_raw())
            .map(|f| f.signaled)
            .unwrap_or(false)
    }

    pub fn buffer_state(&self, buffer: vk::CommandBuffer) -> Option<BufferState> {
        self.state.lock().buffers.get(&buffer.as_raw()).copied()
    }

    /// The image view a framebuffer was created over
    pub fn framebuffer_view(&self, framebuffer: vk::Framebuffer) -> Option<vk::ImageView> {
        self.state
            .lock()
            .framebuffers
            .get(&framebuffer.as_raw())
            .map(|&raw| vk::ImageView::from_raw(raw))
    }

    pub fn swapchains_created(&self) -> usize {
        self.state.lock().swapchains_created
    }

    pub fn swapchain_descs(&self) -> Vec<SwapchainDesc> {
        self.state.lock().swapchain_descs.clone()
    }

    pub fn submits(&self) -> Vec<SubmitRecord> {
        self.state.lock().submits.clone()
    }

    pub fn acquires(&self) -> usize {
        self.state.lock().acquires
    }

    pub fn presented(&self) -> Vec<u32> {
        self.state.lock().presented.clone()
    }

    pub fn device_wait_idles(&self) -> usize {
        self.state.lock().device_wait_idles
    }

    pub fn queue_wait_idles(&self) -> usize {
        self.state.lock().queue_wait_idles
    }

    pub fn max_in_flight(&self) -> usize {
        self.state.lock().max_in_flight
    }

    pub fn violations(&self) -> Vec<String> {
        self.state.lock().violations.clone()
    }

    /// Let the GPU finish everything that was submitted, as if time passed
    pub fn finish_all_work(&self) {
        self.state.lock().drain_all();
    }
}

impl Default for MockGpu {
    fn default() -> Self {
        Self::new()
    }
}

impl Gpu for MockGpu {
    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence> {
        let mut s = self.state.lock();
        if let Some(budget) = s.fence_budget.as_mut() {
            if *budget == 0 {
                return Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
            }
            *budget -= 1;
        }
        let raw = s.handle();
        s.fences.insert(raw, FenceState { signaled, pending: Vec::new() });
        Ok(vk::Fence::from_raw(raw))
    }

    fn wait_for_fence(&self, fence: vk::Fence) -> VkResult<()> {
        let mut s = self.state.lock();
        let Some(state) = s.fences.get_mut(&fence.as_raw()) else {
            s.violation(format!("wait on unknown fence {:?}", fence));
            return Err(vk::Result::ERROR_UNKNOWN);
        };
        if state.signaled {
            return Ok(());
        }
        if state.pending.is_empty() {
            // Nothing will ever signal it: a real wait would hang forever
            s.violation(format!("wait on unsignaled fence {:?} with no pending work", fence));
            return Err(vk::Result::TIMEOUT);
        }
        let finished = std::mem::take(&mut state.pending);
        state.signaled = true;
        s.complete(&finished);
        Ok(())
    }

    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()> {
        let mut s = self.state.lock();
        let Some(state) = s.fences.get_mut(&fence.as_raw()) else {
            s.violation(format!("reset of unknown fence {:?}", fence));
            return Err(vk::Result::ERROR_UNKNOWN);
        };
        let busy = !state.pending.is_empty();
        state.signaled = false;
        if busy {
            s.violation(format!("reset of fence {:?} with pending work", fence));
        }
        Ok(())
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        let mut s = self.state.lock();
        match s.fences.remove(&fence.as_raw()) {
            Some(state) if !state.pending.is_empty() => {
                s.violation(format!("destroyed fence {:?} with pending work", fence))
            }
            Some(_) => {}
            None => s.violation(format!("double destroy of fence {:?}", fence)),
        }
    }

    fn create_semaphore(&self) -> VkResult<vk::Semaphore> {
        let mut s = self.state.lock();
        let raw = s.handle();
        s.semaphores.insert(raw);
        Ok(vk::Semaphore::from_raw(raw))
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        let mut s = self.state.lock();
        if !s.semaphores.remove(&semaphore.as_raw()) {
            s.violation(format!("double destroy of semaphore {:?}", semaphore));
        }
    }

    fn surface_capabilities(&self) -> VkResult<vk::SurfaceCapabilitiesKHR> {
        Ok(self.state.lock().capabilities)
    }

    fn surface_formats(&self) -> VkResult<Vec<vk::SurfaceFormatKHR>> {
        Ok(self.state.lock().formats.clone())
    }

    fn surface_present_modes(&self) -> VkResult<Vec<vk::PresentModeKHR>> {
        Ok(self.state.lock().present_modes.clone())
    }

    fn create_swapchain(&self, desc: &SwapchainDesc) -> VkResult<(vk::SwapchainKHR, Vec<vk::Image>)> {
        let mut s = self.state.lock();
        if !s.swapchains.is_empty() {
            s.violation("created a swapchain while another is alive".to_string());
        }
        if desc.extent.width == 0 || desc.extent.height == 0 {
            s.violation(format!("swapchain created with zero extent {:?}", desc.extent));
        }
        let raw = s.handle();
        let images = (0..desc.min_image_count)
            .map(|_| vk::Image::from_raw(s.handle()))
            .collect();
        s.swapchains.insert(raw, desc.min_image_count);
        s.swapchains_created += 1;
        s.swapchain_descs.push(*desc);
        s.next_image = 0;
        Ok((vk::SwapchainKHR::from_raw(raw), images))
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        let mut s = self.state.lock();
        if s.swapchains.remove(&swapchain.as_raw()).is_none() {
            s.violation(format!("double destroy of swapchain {:?}", swapchain));
        }
    }

    fn create_image_view(&self, _image: vk::Image, _format: vk::Format) -> VkResult<vk::ImageView> {
        let mut s = self.state.lock();
        let raw = s.handle();
        s.views.insert(raw);
        Ok(vk::ImageView::from_raw(raw))
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        let mut s = self.state.lock();
        if !s.views.remove(&view.as_raw()) {
            s.violation(format!("double destroy of image view {:?}", view));
        }
    }

    fn create_render_pass(&self, _format: vk::Format) -> VkResult<vk::RenderPass> {
        let mut s = self.state.lock();
        let raw = s.handle();
        s.render_passes.insert(raw);
        Ok(vk::RenderPass::from_raw(raw))
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        let mut s = self.state.lock();
        if !s.render_passes.remove(&render_pass.as_raw()) {
            s.violation(format!("double destroy of render pass {:?}", render_pass));
        }
    }

    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        view: vk::ImageView,
        _extent: vk::Extent2D,
    ) -> VkResult<vk::Framebuffer> {
        let mut s = self.state.lock();
        if !s.render_passes.contains(&render_pass.as_raw()) || !s.views.contains(&view.as_raw()) {
            s.violation("framebuffer created over dead render pass or view".to_string());
        }
        let raw = s.handle();
        s.framebuffers.insert(raw, view.as_raw());
        Ok(vk::Framebuffer::from_raw(raw))
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        let mut s = self.state.lock();
        if s.framebuffers.remove(&framebuffer.as_raw()).is_none() {
            s.violation(format!("double destroy of framebuffer {:?}", framebuffer));
        }
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        semaphore: vk::Semaphore,
        _fence: vk::Fence,
    ) -> VkResult<(u32, bool)> {
        let mut s = self.state.lock();
        s.acquires += 1;
        let Some(&image_count) = s.swapchains.get(&swapchain.as_raw()) else {
            s.violation(format!("acquire from dead swapchain {:?}", swapchain));
            return Err(vk::Result::ERROR_SURFACE_LOST_KHR);
        };
        if !s.semaphores.contains(&semaphore.as_raw()) {
            s.violation(format!("acquire signaling dead semaphore {:?}", semaphore));
        }
        if let Some(scripted) = s.acquire_script.pop_front() {
            return scripted;
        }
        let index = s.next_image % image_count.max(1);
        s.next_image = s.next_image.wrapping_add(1);
        Ok((index, false))
    }

    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> VkResult<bool> {
        let mut s = self.state.lock();
        if !s.swapchains.contains_key(&swapchain.as_raw()) {
            s.violation(format!("present to dead swapchain {:?}", swapchain));
        }
        if !s.semaphores.contains(&wait.as_raw()) {
            s.violation(format!("present waiting on dead semaphore {:?}", wait));
        }
        s.presented.push(image_index);
        s.present_script.pop_front().unwrap_or(Ok(false))
    }

    fn create_command_pool(&self) -> VkResult<vk::CommandPool> {
        let mut s = self.state.lock();
        let raw = s.handle();
        s.pools.insert(raw);
        Ok(vk::CommandPool::from_raw(raw))
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        let mut s = self.state.lock();
        if !s.pools.remove(&pool.as_raw()) {
            s.violation(format!("double destroy of command pool {:?}", pool));
        }
        // Destroying the pool frees every buffer allocated from it
        s.buffers.clear();
    }

    fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        count: u32,
    ) -> VkResult<Vec<vk::CommandBuffer>> {
        let mut s = self.state.lock();
        if !s.pools.contains(&pool.as_raw()) {
            s.violation(format!("allocate from dead pool {:?}", pool));
        }
        let buffers = (0..count)
            .map(|_| {
                let raw = s.handle();
                s.buffers.insert(raw, BufferState::Initial);
                vk::CommandBuffer::from_raw(raw)
            })
            .collect();
        Ok(buffers)
    }

    fn free_command_buffers(&self, _pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        let mut s = self.state.lock();
        for buffer in buffers {
            match s.buffers.remove(&buffer.as_raw()) {
                Some(BufferState::Pending) => {
                    s.violation(format!("freed pending command buffer {:?}", buffer))
                }
                Some(_) => {}
                None => s.violation(format!("double free of command buffer {:?}", buffer)),
            }
        }
    }

    fn begin_command_buffer(&self, buffer: vk::CommandBuffer, _one_time: bool) -> VkResult<()> {
        let mut s = self.state.lock();
        match s.buffers.get(&buffer.as_raw()).copied() {
            Some(BufferState::Pending) => {
                s.violation(format!("recording into pending command buffer {:?}", buffer));
            }
            Some(BufferState::Recording) => {
                s.violation(format!("begin on already recording command buffer {:?}", buffer));
            }
            Some(_) => {}
            None => {
                s.violation(format!("begin on unknown command buffer {:?}", buffer));
                return Err(vk::Result::ERROR_UNKNOWN);
            }
        }
        s.buffers.insert(buffer.as_raw(), BufferState::Recording);
        s.track_in_flight();
        Ok(())
    }

    fn end_command_buffer(&self, buffer: vk::CommandBuffer) -> VkResult<()> {
        let mut s = self.state.lock();
        if let Some(error) = s.end_error {
            return Err(error);
        }
        match s.buffers.get(&buffer.as_raw()).copied() {
            Some(BufferState::Recording) => {
                s.buffers.insert(buffer.as_raw(), BufferState::Executable);
                Ok(())
            }
            other => {
                s.violation(format!("end on command buffer {:?} in state {:?}", buffer, other));
                Err(vk::Result::ERROR_UNKNOWN)
            }
        }
    }

    fn queue_submit(&self, batch: &SubmitBatch, fence: vk::Fence) -> VkResult<()> {
        let mut s = self.state.lock();
        if let Some(error) = s.submit_error {
            return Err(error);
        }

        let raw = batch.command_buffer.as_raw();
        if s.buffers.get(&raw) != Some(&BufferState::Executable) {
            s.violation(format!("submitted command buffer {:?} that is not executable", batch.command_buffer));
        }
        if let Some((semaphore, _)) = batch.wait {
            if !s.semaphores.contains(&semaphore.as_raw()) {
                s.violation(format!("submit waiting on dead semaphore {:?}", semaphore));
            }
        }

        if fence == vk::Fence::null() {
            s.unfenced.push(raw);
        } else {
            let mut misuse = None;
            match s.fences.get_mut(&fence.as_raw()) {
                Some(state) => {
                    if state.signaled || !state.pending.is_empty() {
                        misuse = Some(format!("submit with fence {:?} not in reset state", fence));
                    }
                    state.pending.push(raw);
                }
                None => misuse = Some(format!("submit with unknown fence {:?}", fence)),
            }
            if let Some(message) = misuse {
                s.violation(message);
            }
        }

        s.buffers.insert(raw, BufferState::Pending);
        s.submits.push(SubmitRecord {
            command_buffer: batch.command_buffer,
            fence,
            wait: batch.wait,
            signal: batch.signal,
        });
        s.track_in_flight();
        Ok(())
    }

    fn queue_wait_idle(&self) -> VkResult<()> {
        let mut s = self.state.lock();
        s.queue_wait_idles += 1;
        s.drain_all();
        Ok(())
    }

    fn device_wait_idle(&self) -> VkResult<()> {
        let mut s = self.state.lock();
        s.device_wait_idles += 1;
        s.drain_all();
        Ok(())
    }
}

/// Drawable whose size steps through a script each time the caller waits
pub struct MockDrawable {
    current: Mutex<vk::Extent2D>,
    upcoming: Mutex<VecDeque<vk::Extent2D>>,
    waits: AtomicUsize,
    can_wait: bool,
}

impl MockDrawable {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            current: Mutex::new(vk::Extent2D { width, height }),
            upcoming: Mutex::new(VecDeque::new()),
            waits: AtomicUsize::new(0),
            can_wait: true,
        }
    }

    /// A drawable that refuses to block, like a window on the event thread
    pub fn deferring(width: u32, height: u32) -> Self {
        Self {
            can_wait: false,
            ..Self::new(width, height)
        }
    }

    pub fn resize(&self, width: u32, height: u32) {
        *self.current.lock() = vk::Extent2D { width, height };
    }

    /// Sizes observed after each successive `wait_for_events`
    pub fn then(&self, width: u32, height: u32) {
        self.upcoming.lock().push_back(vk::Extent2D { width, height });
    }

    pub fn waits(&self) -> usize {
        self.waits.load(Ordering::SeqCst)
    }
}

impl Drawable for MockDrawable {
    fn drawable_extent(&self) -> vk::Extent2D {
        *self.current.lock()
    }

    fn wait_for_events(&self) -> bool {
        self.waits.fetch_add(1, Ordering::SeqCst);
        if !self.can_wait {
            return false;
        }
        match self.upcoming.lock().pop_front() {
            Some(next) => *self.current.lock() = next,
            None => panic!("drawable waited with no further size changes scripted"),
        }
        true
    }
}
