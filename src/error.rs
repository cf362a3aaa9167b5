// Error taxonomy for the Vulkan backend
//
// Backend code returns RenderError so callers can tell the failure classes apart.
// The application layer wraps these in anyhow with context and treats all of them
// as fatal.

use ash::vk;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to load the Vulkan library: {0}")]
    Loader(#[from] ash::LoadingError),

    #[error("{operation} failed: {result}")]
    Vulkan {
        operation: &'static str,
        result: vk::Result,
    },

    #[error("device query {operation} failed: {result}")]
    DeviceQuery {
        operation: &'static str,
        result: vk::Result,
    },

    #[error("no suitable GPU found ({candidates} candidate(s) checked)")]
    NoSuitableDevice { candidates: usize },

    #[error("surface setup failed in {operation}: {result}")]
    SurfaceSetup {
        operation: &'static str,
        result: vk::Result,
    },

    #[error("failed to load asset {path:?}: {source}")]
    AssetLoad {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("swapchain no longer matches the surface")]
    SurfaceStale,

    #[error("queue submission failed: {0}")]
    Submit(vk::Result),

    #[error("presentation failed: {0}")]
    Present(vk::Result),

    /// Acquisition returned an index with no recorded command buffer
    #[error("acquired image {image} but only {recorded} command buffers were recorded")]
    ImageOutOfRange { image: u32, recorded: usize },

    #[error("device lost: {0}")]
    DeviceLost(String),

    #[error("window handle unavailable: {0}")]
    WindowHandle(#[from] raw_window_handle::HandleError),
}

impl RenderError {
    pub(crate) fn vulkan(operation: &'static str) -> impl FnOnce(vk::Result) -> Self {
        move |result| Self::Vulkan { operation, result }
    }

    pub(crate) fn query(operation: &'static str) -> impl FnOnce(vk::Result) -> Self {
        move |result| Self::DeviceQuery { operation, result }
    }

    pub(crate) fn surface(operation: &'static str) -> impl FnOnce(vk::Result) -> Self {
        move |result| Self::SurfaceSetup { operation, result }
    }

    /// True when rebuilding the swapchain would clear the condition.
    ///
    /// Rebuilds are not implemented, so the app still exits on these; the
    /// distinction is kept so a caller can log it differently.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::SurfaceStale)
    }
}
