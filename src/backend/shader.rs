// Shader module loading
//
// Vulkan takes SPIR-V bytecode as 32-bit words. Compiled shaders are read
// from disk at startup (build.rs runs glslc) and turned into modules here.

use anyhow::{bail, Context, Result};
use ash::vk;
use std::io::Cursor;
use std::path::Path;

/// First word of every SPIR-V module
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Reinterpret SPIR-V bytes as words, fixing up endianness
pub fn parse_spirv(bytes: &[u8]) -> Result<Vec<u32>> {
    let words = ash::util::read_spv(&mut Cursor::new(bytes))
        .context("SPIR-V length is not a multiple of 4 bytes")?;

    match words.first() {
        Some(&SPIRV_MAGIC) => Ok(words),
        Some(&other) => bail!("Not a SPIR-V module (magic {:#010x})", other),
        None => bail!("Empty SPIR-V module"),
    }
}

/// Read and parse a compiled shader from disk
pub fn load_spirv(path: &Path) -> Result<Vec<u32>> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read shader {}", path.display()))?;
    parse_spirv(&bytes)
        .with_context(|| format!("Invalid shader {}", path.display()))
}

/// Create a shader module from SPIR-V words
pub fn create_shader_module(device: &ash::Device, code: &[u32]) -> Result<vk::ShaderModule> {
    let create_info = vk::ShaderModuleCreateInfo::builder()
        .code(code);

    unsafe {
        device.create_shader_module(&create_info, None)
            .context("Failed to create shader module")
    }
}
