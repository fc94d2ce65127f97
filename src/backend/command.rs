// Command recording
//
// One pool, one reusable primary command buffer per frame slot, and a
// blocking one-shot path for setup-time work. The slot cursor lives here and
// advances on end_frame; waiting on the slot's fence before begin_frame is
// the frame driver's job.

use anyhow::{bail, Context, Result};
use ash::vk;
use std::sync::Arc;
use super::gpu::{Gpu, SubmitBatch};

pub struct CommandRecorder<G: Gpu> {
    pool: vk::CommandPool,
    /// One per frame slot
    buffers: Vec<vk::CommandBuffer>,
    current_slot: usize,
    recording: bool,
    gpu: Arc<G>,
}

impl<G: Gpu> CommandRecorder<G> {
    pub fn new(gpu: Arc<G>, frames_in_flight: usize) -> Result<Self> {
        let pool = gpu.create_command_pool()
            .context("Failed to create command pool")?;

        let buffers = match gpu.allocate_command_buffers(pool, frames_in_flight as u32) {
            Ok(buffers) => buffers,
            Err(e) => {
                gpu.destroy_command_pool(pool);
                return Err(e).context("Failed to allocate per-frame command buffers");
            }
        };

        log::debug!("Allocated {} per-frame command buffers", buffers.len());

        Ok(Self {
            pool,
            buffers,
            current_slot: 0,
            recording: false,
            gpu,
        })
    }

    #[inline]
    pub fn current_slot(&self) -> usize {
        self.current_slot
    }

    #[inline]
    pub fn current_buffer(&self) -> vk::CommandBuffer {
        self.buffers[self.current_slot]
    }

    pub fn frames_in_flight(&self) -> usize {
        self.buffers.len()
    }

    /// Start recording into the current slot's buffer. The slot's previous
    /// submission must already have completed.
    pub fn begin_frame(&mut self) -> Result<vk::CommandBuffer> {
        if self.recording {
            bail!("begin_frame called while frame slot {} is still recording", self.current_slot);
        }

        let cmd = self.current_buffer();
        self.gpu.begin_command_buffer(cmd, false)
            .context("Failed to begin recording command buffer")?;
        self.recording = true;
        Ok(cmd)
    }

    /// Finish recording and move the cursor to the next slot
    pub fn end_frame(&mut self) -> Result<vk::CommandBuffer> {
        if !self.recording {
            bail!("end_frame called without begin_frame on frame slot {}", self.current_slot);
        }

        let cmd = self.current_buffer();
        self.recording = false;
        self.gpu.end_command_buffer(cmd)
            .context("Failed to record command buffer")?;

        self.current_slot = (self.current_slot + 1) % self.buffers.len();
        Ok(cmd)
    }

    /// Allocate a transient buffer and start recording into it
    pub fn begin_one_shot(&self) -> Result<vk::CommandBuffer> {
        let cmd = self.gpu.allocate_command_buffers(self.pool, 1)
            .context("Failed to allocate one-shot command buffer")?
            .into_iter()
            .next()
            .context("Driver returned no one-shot command buffer")?;

        if let Err(e) = self.gpu.begin_command_buffer(cmd, true) {
            self.gpu.free_command_buffers(self.pool, &[cmd]);
            return Err(e).context("Failed to begin one-shot command buffer");
        }
        Ok(cmd)
    }

    /// Submit the one-shot buffer, block until the queue is idle, then free it
    pub fn end_one_shot(&self, cmd: vk::CommandBuffer) -> Result<()> {
        let result = self.submit_and_wait(cmd);
        self.gpu.free_command_buffers(self.pool, &[cmd]);
        result
    }

    fn submit_and_wait(&self, cmd: vk::CommandBuffer) -> Result<()> {
        self.gpu.end_command_buffer(cmd)
            .context("Failed to end one-shot command buffer")?;
        self.gpu.queue_submit(&SubmitBatch::immediate(cmd), vk::Fence::null())
            .context("Failed to submit one-shot command buffer")?;
        self.gpu.queue_wait_idle()
            .context("Failed waiting for one-shot submission")?;
        Ok(())
    }

    /// Record `record` into a transient buffer and run it to completion
    pub fn one_shot<F>(&self, record: F) -> Result<()>
    where
        F: FnOnce(vk::CommandBuffer) -> Result<()>,
    {
        let cmd = self.begin_one_shot()?;

        if let Err(e) = record(cmd) {
            // Recording state is discarded along with the buffer
            if let Err(end_error) = self.gpu.end_command_buffer(cmd) {
                log::debug!("Ending abandoned one-shot command buffer failed: {:?}", end_error);
            }
            self.gpu.free_command_buffers(self.pool, &[cmd]);
            return Err(e);
        }

        self.end_one_shot(cmd)
    }

    /// Release the pool (and every buffer in it). The device must be idle.
    pub fn destroy(&mut self) {
        if self.pool != vk::CommandPool::null() {
            self.gpu.destroy_command_pool(self.pool);
            self.pool = vk::CommandPool::null();
            self.buffers.clear();
        }
    }
}

impl<G: Gpu> Drop for CommandRecorder<G> {
    fn drop(&mut self) {
        self.destroy();
    }
}
