// Shader module loading
//
// Vulkan consumes SPIR-V bytecode. The .spv files are produced by build.rs and read
// at startup as opaque bytes.

use ash::vk;
use std::io::Cursor;
use std::path::Path;

use crate::error::RenderError;

/// Read a compiled shader binary from disk
pub fn load_binary(path: impl AsRef<Path>) -> Result<Vec<u8>, RenderError> {
    let path = path.as_ref();
    let bytes = std::fs::read(path).map_err(|source| RenderError::AssetLoad {
        path: path.to_path_buf(),
        source,
    })?;
    log::debug!("Loaded shader {:?} ({} bytes)", path, bytes.len());
    Ok(bytes)
}

/// SPIR-V is a stream of 4-byte words. `read_spv` rejects lengths that are not a
/// multiple of 4 and takes care of alignment and byte order.
pub fn spirv_words(path: &Path, code: &[u8]) -> Result<Vec<u32>, RenderError> {
    ash::util::read_spv(&mut Cursor::new(code)).map_err(|source| RenderError::AssetLoad {
        path: path.to_path_buf(),
        source,
    })
}

/// Load SPIR-V from disk and create a shader module
pub fn create_shader_module(
    device: &ash::Device,
    path: impl AsRef<Path>,
) -> Result<vk::ShaderModule, RenderError> {
    let path = path.as_ref();
    let code = spirv_words(path, &load_binary(path)?)?;

    let create_info = vk::ShaderModuleCreateInfo::default().code(&code);

    unsafe { device.create_shader_module(&create_info, None) }
        .map_err(RenderError::vulkan("vkCreateShaderModule"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SPIRV_MAGIC: u32 = 0x0723_0203;

    #[test]
    fn unreadable_path_is_an_asset_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.spv");

        match load_binary(&missing) {
            Err(RenderError::AssetLoad { path, source }) => {
                assert_eq!(path, missing);
                assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
            }
            other => panic!("expected AssetLoad, got {other:?}"),
        }
    }

    #[test]
    fn binary_is_returned_untouched() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let bytes = [0x03, 0x02, 0x23, 0x07, 0xAA, 0xBB, 0xCC, 0xDD];
        file.write_all(&bytes).unwrap();

        assert_eq!(load_binary(file.path()).unwrap(), bytes);
    }

    #[test]
    fn spirv_words_are_decoded() {
        let mut code = Vec::new();
        for word in [SPIRV_MAGIC, 0x0001_0000, 7] {
            code.extend_from_slice(&word.to_le_bytes());
        }

        let words = spirv_words(Path::new("tri.vert.spv"), &code).unwrap();
        assert_eq!(words, vec![SPIRV_MAGIC, 0x0001_0000, 7]);
    }

    #[test]
    fn truncated_spirv_is_rejected() {
        let code = [0x03, 0x02, 0x23, 0x07, 0x00];
        match spirv_words(Path::new("broken.spv"), &code) {
            Err(RenderError::AssetLoad { path, .. }) => assert_eq!(path, Path::new("broken.spv")),
            other => panic!("expected AssetLoad, got {other:?}"),
        }
    }
}
