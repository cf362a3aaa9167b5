// Backend module - Vulkan abstraction layer
//
// Thin wrappers around ash. Each module owns one stage of the session; the
// policy parts (device selection, surface negotiation, the frame state machine)
// are plain functions and traits so they can be tested without a GPU.

pub mod capabilities;
pub mod commands;
pub mod device;
pub mod instance;
pub mod lifecycle;
pub mod pipeline;
pub mod shader;
pub mod swapchain;
pub mod sync;

pub use commands::CommandRecorder;
pub use device::VulkanDevice;
pub use instance::{DebugHook, VulkanInstance};
pub use lifecycle::{Lifecycle, Stage, StageResources};
pub use pipeline::TrianglePipeline;
pub use swapchain::{PresentableImageSet, Swapchain};
pub use sync::{FrameEngine, FrameOutcome, FRAMES_IN_FLIGHT};
