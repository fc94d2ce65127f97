// Buffer utilities for vertex data
//
// Memory comes from the device's gpu-allocator. Host-visible buffers are
// written through their persistent mapping; device-local buffers are filled
// from a staging buffer with a one-shot copy on the frame driver's queue.

use anyhow::{bail, Context, Result};
use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use std::sync::Arc;
use super::context::RenderContext;
use super::swapchain::Drawable;
use super::VulkanDevice;

/// A buffer and the allocation backing it, released together on drop
pub struct GpuBuffer {
    device: Arc<VulkanDevice>,
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
    size: vk::DeviceSize,
}

impl GpuBuffer {
    pub fn new(
        device: Arc<VulkanDevice>,
        name: &str,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
    ) -> Result<Self> {
        if size == 0 {
            bail!("Buffer '{}' must not be empty", name);
        }

        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe {
            device.device.create_buffer(&buffer_info, None)
                .with_context(|| format!("Failed to create buffer '{}'", name))?
        };

        let requirements = unsafe { device.device.get_buffer_memory_requirements(buffer) };

        let allocation = device.allocator().lock().allocate(&AllocationCreateDesc {
            name,
            requirements,
            location,
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.device.destroy_buffer(buffer, None) };
                return Err(e).with_context(|| format!("Failed to allocate memory for '{}'", name));
            }
        };

        let (memory, offset) = unsafe { (allocation.memory(), allocation.offset()) };

        // From here on Drop releases both
        let gpu_buffer = Self {
            device,
            buffer,
            allocation: Some(allocation),
            size,
        };

        unsafe {
            gpu_buffer.device.device
                .bind_buffer_memory(buffer, memory, offset)
                .with_context(|| format!("Failed to bind memory for '{}'", name))?;
        }

        log::debug!("Created buffer '{}': {} bytes ({:?})", name, size, location);
        Ok(gpu_buffer)
    }

    /// Copy `data` to the start of a host-visible buffer
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        check_fits(data.len(), self.size)?;

        let allocation = self.allocation.as_ref()
            .context("Buffer allocation already released")?;
        let mapped = allocation.mapped_ptr()
            .context("Buffer memory is not host visible")?;

        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), mapped.as_ptr().cast::<u8>(), data.len());
        }
        Ok(())
    }

    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }
}

impl Drop for GpuBuffer {
    fn drop(&mut self) {
        // Free allocation first, then destroy buffer
        if let Some(allocation) = self.allocation.take() {
            if let Err(e) = self.device.allocator().lock().free(allocation) {
                log::error!("Failed to free buffer allocation: {:?}", e);
            }
        }

        unsafe {
            self.device.device.destroy_buffer(self.buffer, None);
        }
    }
}

/// Create a device-local buffer holding `data`, copied through a staging
/// buffer by a one-shot submission on `context`
pub fn upload_device_local<D: Drawable>(
    device: &Arc<VulkanDevice>,
    context: &mut RenderContext<VulkanDevice, D>,
    name: &str,
    usage: vk::BufferUsageFlags,
    data: &[u8],
) -> Result<GpuBuffer> {
    let size = data.len() as vk::DeviceSize;

    let mut staging = GpuBuffer::new(
        device.clone(),
        &format!("{} staging", name),
        size,
        vk::BufferUsageFlags::TRANSFER_SRC,
        MemoryLocation::CpuToGpu,
    )?;
    staging.write(data)?;

    let destination = GpuBuffer::new(
        device.clone(),
        name,
        size,
        usage | vk::BufferUsageFlags::TRANSFER_DST,
        MemoryLocation::GpuOnly,
    )?;

    let region = vk::BufferCopy {
        src_offset: 0,
        dst_offset: 0,
        size,
    };
    let (src, dst) = (staging.handle(), destination.handle());
    context.submit_one_shot(|cmd| {
        unsafe { device.device.cmd_copy_buffer(cmd, src, dst, &[region]) };
        Ok(())
    })
    .with_context(|| format!("Failed to upload '{}'", name))?;

    // The one-shot path waited for the queue, so the staging copy is done
    log::debug!("Uploaded {} bytes to '{}'", size, name);
    Ok(destination)
}

/// View a slice of plain `#[repr(C)]` values as bytes
pub fn as_bytes<T: Copy>(values: &[T]) -> &[u8] {
    unsafe { std::slice::from_raw_parts(values.as_ptr().cast::<u8>(), std::mem::size_of_val(values)) }
}

fn check_fits(len: usize, size: vk::DeviceSize) -> Result<()> {
    if len as vk::DeviceSize > size {
        bail!("Write of {} bytes exceeds buffer size {}", len, size);
    }
    Ok(())
}
