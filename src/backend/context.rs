// Render context - the frame driver
//
// Owns the per-frame sync objects and the lifetime of the presentation chain
// and command recorder, and runs one frame at a time:
//
//   wait fence -> acquire -> reset fence -> record -> submit -> present -> advance
//
// Only fatal errors leave draw_frame as Err. A stale chain is rebuilt in
// place and reported through FrameOutcome.

use anyhow::{bail, Context, Result};
use ash::vk;
use std::sync::Arc;
use super::command::CommandRecorder;
use super::gpu::{Gpu, SubmitBatch};
use super::swapchain::{Acquire, ChainState, Drawable, FrameTarget, Swapchain, SwapchainPreferences};
use super::sync::{FrameSync, SyncRegistry};

/// Issues the actual draw work for one frame
pub trait RenderContent {
    /// Record into `cmd`, which is open and targets `target`
    fn record(&mut self, cmd: vk::CommandBuffer, target: &FrameTarget) -> Result<()>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameState {
    Uninitialized,
    Ready,
    WaitingOnFence,
    Acquiring,
    Recording,
    Submitting,
    Presenting,
    Rebuilding,
    ShuttingDown,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented { image_index: u32 },
    /// Submitted and presented, but the surface reported the chain stale;
    /// it has been rebuilt
    PresentedStale { image_index: u32 },
    /// Nothing submitted: the chain was stale at acquire, the window has no
    /// area, or the surface could not be rebuilt yet
    Skipped,
}

#[derive(Clone, Copy, Debug)]
pub struct ContextOptions {
    pub frames_in_flight: usize,
    pub preferences: SwapchainPreferences,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            preferences: SwapchainPreferences::default(),
        }
    }
}

pub struct RenderContext<G: Gpu, D: Drawable> {
    state: FrameState,
    swapchain: Option<Swapchain<G, D>>,
    recorder: Option<CommandRecorder<G>>,
    sync: SyncRegistry,
    /// Acquire semaphore is waited on at color output, before anything writes
    wait_stages: [vk::PipelineStageFlags; 1],
    frames_presented: u64,
    drawable: Arc<D>,
    gpu: Arc<G>,
}

impl<G: Gpu, D: Drawable> RenderContext<G, D> {
    /// Create sync objects, presentation chain and command recorder, in that
    /// order
    pub fn new(gpu: Arc<G>, drawable: Arc<D>, options: ContextOptions) -> Result<Self> {
        if options.frames_in_flight == 0 {
            bail!("frames_in_flight must be at least 1");
        }

        let mut context = Self {
            state: FrameState::Uninitialized,
            swapchain: None,
            recorder: None,
            sync: SyncRegistry::default(),
            wait_stages: [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT],
            frames_presented: 0,
            drawable,
            gpu,
        };

        // On any failure, dropping `context` releases what was created so far
        context.sync = SyncRegistry::new(context.gpu.as_ref(), options.frames_in_flight)
            .context("Failed to create synchronization objects")?;
        context.swapchain = Some(Swapchain::new(
            context.gpu.clone(),
            context.drawable.clone(),
            options.preferences,
        )?);
        context.recorder = Some(CommandRecorder::new(context.gpu.clone(), options.frames_in_flight)?);

        context.state = FrameState::Ready;
        log::info!(
            "Render context ready ({} frames in flight)",
            options.frames_in_flight
        );
        Ok(context)
    }

    /// Run one frame.
    ///
    /// FRAME TIMELINE:
    /// ┌────────────────────────────────────────────────────────────────────┐
    /// │ wait_fence ─> acquire ─> reset ─> record ─> submit ─> present      │
    /// │ (CPU waits    (GPU may   (slot    (content  (GPU      (display     │
    /// │  for slot)     write)     busy)    draws)    works)    shows)      │
    /// └────────────────────────────────────────────────────────────────────┘
    pub fn draw_frame<R: RenderContent + ?Sized>(&mut self, content: &mut R) -> Result<FrameOutcome> {
        match self.state {
            FrameState::Ready => {}
            FrameState::ShuttingDown => bail!("Render context is shut down"),
            other => bail!("draw_frame called in state {:?}", other),
        }

        // Minimized: nothing to draw into, and the chain can't be rebuilt yet
        if is_zero_area(self.drawable.drawable_extent()) {
            if let Some(chain) = self.swapchain.as_mut() {
                chain.mark_stale();
            }
            return Ok(FrameOutcome::Skipped);
        }

        // Deferred rebuild from a resize while minimized
        if self.chain()?.state() == ChainState::Stale {
            self.rebuild_chain()?;
            if self.chain()?.state() == ChainState::Stale {
                // Surface still has no area; the drawable declined to wait
                return Ok(FrameOutcome::Skipped);
            }
        }

        let slot = self.recorder()?.current_slot();
        let sync = *self.sync.frame(slot);

        // ─────────────────────────────────────────────────────────────────
        // STEP 1: Wait until this slot's previous submission has finished
        // ─────────────────────────────────────────────────────────────────
        self.state = FrameState::WaitingOnFence;
        self.gpu.wait_for_fence(sync.in_flight_fence)
            .with_context(|| format!("Failed waiting on in-flight fence for frame slot {}", slot))?;

        // ─────────────────────────────────────────────────────────────────
        // STEP 2: Acquire next swapchain image
        // ─────────────────────────────────────────────────────────────────
        self.state = FrameState::Acquiring;
        let chain = self.swapchain.as_mut().context("Swapchain not initialized")?;
        let image_index = match chain.acquire_next(sync.image_available, vk::Fence::null())? {
            Acquire::Image { index, .. } => index,
            Acquire::Stale => {
                // Fence untouched, so the slot is still free next frame
                self.state = FrameState::Ready;
                return Ok(FrameOutcome::Skipped);
            }
        };
        let target = chain.target(image_index).with_context(|| {
            format!("Acquired image index {} outside the chain", image_index)
        })?;

        // ─────────────────────────────────────────────────────────────────
        // STEP 3: Only now is this slot committed to a submission
        // ─────────────────────────────────────────────────────────────────
        self.gpu.reset_fence(sync.in_flight_fence)
            .context("Failed to reset in-flight fence")?;

        // ─────────────────────────────────────────────────────────────────
        // STEP 4: Record
        // ─────────────────────────────────────────────────────────────────
        self.state = FrameState::Recording;
        let recorder = self.recorder.as_mut().context("Command recorder not initialized")?;
        let cmd = recorder.begin_frame()?;
        content.record(cmd, &target)
            .context("Render content failed to record")?;
        recorder.end_frame()?;

        // ─────────────────────────────────────────────────────────────────
        // STEP 5: Submit
        // ─────────────────────────────────────────────────────────────────
        self.state = FrameState::Submitting;
        let batch = SubmitBatch {
            command_buffer: cmd,
            wait: Some((sync.image_available, self.wait_stages[0])),
            signal: Some(sync.render_finished),
        };
        self.gpu.queue_submit(&batch, sync.in_flight_fence)
            .context("Failed to submit frame command buffer")?;

        // ─────────────────────────────────────────────────────────────────
        // STEP 6: Present
        // ─────────────────────────────────────────────────────────────────
        self.state = FrameState::Presenting;
        let chain = self.swapchain.as_mut().context("Swapchain not initialized")?;
        let presented = chain.present(image_index, sync.render_finished)?;

        // STEP 7: the slot cursor already moved on in end_frame
        self.frames_presented += 1;
        self.state = FrameState::Ready;

        Ok(if presented {
            FrameOutcome::Presented { image_index }
        } else {
            FrameOutcome::PresentedStale { image_index }
        })
    }

    /// Window size changed. Rebuilds now, or on the first frame after the
    /// window regains a nonzero size.
    pub fn on_resize(&mut self) -> Result<()> {
        if self.state != FrameState::Ready {
            log::debug!("Ignoring resize in state {:?}", self.state);
            return Ok(());
        }

        if is_zero_area(self.drawable.drawable_extent()) {
            self.chain_mut()?.mark_stale();
            return Ok(());
        }
        self.rebuild_chain()
    }

    fn rebuild_chain(&mut self) -> Result<()> {
        self.state = FrameState::Rebuilding;
        self.chain_mut()?.rebuild()?;
        self.state = FrameState::Ready;
        Ok(())
    }

    /// Record and run setup-time work to completion, sequenced with the
    /// frame loop
    pub fn submit_one_shot<F>(&mut self, record: F) -> Result<()>
    where
        F: FnOnce(vk::CommandBuffer) -> Result<()>,
    {
        if self.state != FrameState::Ready {
            bail!("One-shot submission in state {:?}", self.state);
        }
        self.recorder()?.one_shot(record)
    }

    /// Wait for the GPU, then release chain, recorder and sync objects.
    /// Safe to call more than once.
    pub fn shutdown(&mut self) -> Result<()> {
        if self.state == FrameState::ShuttingDown {
            return Ok(());
        }
        if self.state != FrameState::Ready {
            log::warn!("Shutting down from state {:?}", self.state);
        }

        log::info!("Shutting down render context after {} frames", self.frames_presented);
        self.state = FrameState::ShuttingDown;

        // Release even if the wait failed; the device is unusable by then
        let idle = self.gpu.device_wait_idle()
            .context("Failed to wait for device idle during shutdown");

        self.swapchain = None;
        self.recorder = None;
        self.sync.teardown(self.gpu.as_ref());

        idle
    }

    fn chain(&self) -> Result<&Swapchain<G, D>> {
        self.swapchain.as_ref().context("Swapchain not initialized")
    }

    fn chain_mut(&mut self) -> Result<&mut Swapchain<G, D>> {
        self.swapchain.as_mut().context("Swapchain not initialized")
    }

    fn recorder(&self) -> Result<&CommandRecorder<G>> {
        self.recorder.as_ref().context("Command recorder not initialized")
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    /// The frame slot the next frame will use
    pub fn frame_index(&self) -> usize {
        self.recorder.as_ref().map_or(0, |r| r.current_slot())
    }

    pub fn frames_in_flight(&self) -> usize {
        self.sync.len()
    }

    pub fn frame_sync(&self, slot: usize) -> FrameSync {
        *self.sync.frame(slot)
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    pub fn swapchain(&self) -> Option<&Swapchain<G, D>> {
        self.swapchain.as_ref()
    }
}

impl<G: Gpu, D: Drawable> Drop for RenderContext<G, D> {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::error!("Render context shutdown failed: {:?}", e);
        }
    }
}

fn is_zero_area(extent: vk::Extent2D) -> bool {
    extent.width == 0 || extent.height == 0
}
