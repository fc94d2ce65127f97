// Synchronization primitives
//
// Fences, semaphores for GPU-CPU and GPU-GPU sync, one set per frame in flight.
// The registry holds no device reference; the frame driver owns it and hands
// the device in for creation and teardown.

use anyhow::{Context, Result};
use ash::vk;
use super::gpu::Gpu;

/// Frame synchronization - one per frame in flight
#[derive(Clone, Copy, Debug)]
pub struct FrameSync {
    /// Signaled by acquire, waited on by the submit
    pub image_available: vk::Semaphore,
    /// Signaled by the submit, waited on by present
    pub render_finished: vk::Semaphore,
    /// Signaled when the slot's last submission finished on the GPU
    pub in_flight_fence: vk::Fence,
}

impl FrameSync {
    pub fn new<G: Gpu>(gpu: &G) -> Result<Self> {
        let image_available = gpu
            .create_semaphore()
            .context("Failed to create image-available semaphore")?;

        let render_finished = match gpu.create_semaphore() {
            Ok(semaphore) => semaphore,
            Err(e) => {
                gpu.destroy_semaphore(image_available);
                return Err(e).context("Failed to create render-finished semaphore");
            }
        };

        // Start signaled so the first wait on this slot returns immediately
        let in_flight_fence = match gpu.create_fence(true) {
            Ok(fence) => fence,
            Err(e) => {
                gpu.destroy_semaphore(image_available);
                gpu.destroy_semaphore(render_finished);
                return Err(e).context("Failed to create in-flight fence");
            }
        };

        Ok(Self {
            image_available,
            render_finished,
            in_flight_fence,
        })
    }

    pub fn destroy<G: Gpu>(&self, gpu: &G) {
        gpu.destroy_semaphore(self.image_available);
        gpu.destroy_semaphore(self.render_finished);
        gpu.destroy_fence(self.in_flight_fence);
    }
}

/// All per-slot sync objects, indexed by frame slot
#[derive(Default)]
pub struct SyncRegistry {
    frames: Vec<FrameSync>,
}

impl SyncRegistry {
    /// Create one `FrameSync` per frame slot. Any failure is fatal and
    /// releases whatever was already created.
    pub fn new<G: Gpu>(gpu: &G, frames_in_flight: usize) -> Result<Self> {
        let mut frames = Vec::with_capacity(frames_in_flight);

        for slot in 0..frames_in_flight {
            match FrameSync::new(gpu) {
                Ok(sync) => frames.push(sync),
                Err(e) => {
                    for sync in &frames {
                        sync.destroy(gpu);
                    }
                    return Err(e).with_context(|| {
                        format!("Failed to create sync objects for frame slot {}", slot)
                    });
                }
            }
        }

        log::debug!("Created sync objects for {} frames in flight", frames_in_flight);
        Ok(Self { frames })
    }

    #[inline]
    pub fn frame(&self, slot: usize) -> &FrameSync {
        &self.frames[slot]
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Release every signal. Only call once the device is idle.
    /// Safe to call more than once.
    pub fn teardown<G: Gpu>(&mut self, gpu: &G) {
        for sync in self.frames.drain(..) {
            sync.destroy(gpu);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockGpu;

    #[test]
    fn test_registry_creates_three_signals_per_slot() {
        let gpu = MockGpu::new();
        let mut registry = SyncRegistry::new(&gpu, 3).unwrap();

        assert_eq!(registry.len(), 3);
        assert_eq!(gpu.live_fences(), 3);
        assert_eq!(gpu.live_semaphores(), 6);

        registry.teardown(&gpu);
        assert!(registry.is_empty());
        assert_eq!(gpu.live_fences(), 0);
        assert_eq!(gpu.live_semaphores(), 0);
    }

    #[test]
    fn test_fences_start_signaled() {
        let gpu = MockGpu::new();
        let mut registry = SyncRegistry::new(&gpu, 2).unwrap();

        for slot in 0..2 {
            assert!(gpu.is_fence_signaled(registry.frame(slot).in_flight_fence));
        }
        registry.teardown(&gpu);
    }

    #[test]
    fn test_signals_are_distinct_per_slot() {
        let gpu = MockGpu::new();
        let mut registry = SyncRegistry::new(&gpu, 2).unwrap();

        let a = *registry.frame(0);
        let b = *registry.frame(1);
        assert_ne!(a.in_flight_fence, b.in_flight_fence);
        assert_ne!(a.image_available, b.image_available);
        assert_ne!(a.render_finished, b.render_finished);
        assert_ne!(a.image_available, a.render_finished);
        registry.teardown(&gpu);
    }

    #[test]
    fn test_creation_failure_releases_partial_set() {
        let gpu = MockGpu::new();
        // Slot 0 succeeds (2 semaphores + fence), slot 1 fails on its fence
        gpu.fail_fence_creation_after(1);

        let result = SyncRegistry::new(&gpu, 2);
        assert!(result.is_err());
        assert_eq!(gpu.live_fences(), 0);
        assert_eq!(gpu.live_semaphores(), 0);
    }

    #[test]
    fn test_teardown_is_idempotent() {
        let gpu = MockGpu::new();
        let mut registry = SyncRegistry::new(&gpu, 2).unwrap();
        registry.teardown(&gpu);
        registry.teardown(&gpu);
        assert_eq!(gpu.live_fences(), 0);
        assert!(gpu.violations().is_empty());
    }
}
