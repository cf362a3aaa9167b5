// =============================================================================
// SESSION - Owns every Vulkan object for one window
// =============================================================================
//
// CONSTRUCTION ORDER (each stage depends on all before it):
//   Instance ─> Surface ─> [DebugHook] ─> Device ─> Swapchain ─> RenderTargets
//            ─> Pipeline ─> CommandPool ─> SyncObjects
//
// Teardown drains the device and walks the same list backwards. A session that
// failed halfway through construction releases only what it built.

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use crate::backend::device::{select_device, QueueRole, REQUIRED_DEVICE_EXTENSIONS};
use crate::backend::capabilities::{CapabilitySource, VulkanCapabilities};
use crate::backend::swapchain::SurfaceConfiguration;
use crate::backend::sync::VulkanFrameBackend;
use crate::backend::{
    CommandRecorder, DebugHook, FrameEngine, FrameOutcome, Lifecycle, PresentableImageSet, Stage,
    StageResources, Swapchain, TrianglePipeline, VulkanDevice, VulkanInstance, FRAMES_IN_FLIGHT,
};
use crate::config::Config;
use crate::error::RenderError;

/// One slot per stage; `None` until built and again after release
#[derive(Default)]
struct SessionResources {
    instance: Option<VulkanInstance>,
    surface: Option<vk::SurfaceKHR>,
    debug_hook: Option<DebugHook>,
    device: Option<VulkanDevice>,
    swapchain: Option<Swapchain>,
    targets: Option<PresentableImageSet>,
    pipeline: Option<TrianglePipeline>,
    commands: Option<CommandRecorder>,
    frames: Option<FrameEngine<FRAMES_IN_FLIGHT>>,
}

impl StageResources for SessionResources {
    fn wait_idle(&mut self) -> Result<(), RenderError> {
        match &self.device {
            Some(device) => device.wait_idle(),
            None => Ok(()),
        }
    }

    fn release(&mut self, stage: Stage) {
        match stage {
            Stage::SyncObjects => {
                if let (Some(frames), Some(device)) = (self.frames.take(), self.device.as_ref()) {
                    frames.destroy(&device.device);
                }
            }
            Stage::CommandPool => {
                if let (Some(commands), Some(device)) = (self.commands.take(), self.device.as_ref())
                {
                    commands.destroy(&device.device);
                }
            }
            Stage::Pipeline => {
                if let (Some(pipeline), Some(device)) = (self.pipeline.take(), self.device.as_ref()) {
                    pipeline.destroy(&device.device);
                }
            }
            Stage::RenderTargets => {
                if let (Some(mut targets), Some(device)) = (self.targets.take(), self.device.as_ref())
                {
                    targets.destroy(&device.device);
                }
            }
            Stage::Swapchain => {
                if let Some(swapchain) = self.swapchain.take() {
                    swapchain.destroy();
                }
            }
            Stage::Device => {
                if let Some(device) = self.device.take() {
                    device.destroy();
                }
            }
            Stage::DebugHook => {
                if let Some(hook) = self.debug_hook.take() {
                    hook.destroy();
                }
            }
            Stage::Surface => {
                if let (Some(surface), Some(instance)) = (self.surface.take(), self.instance.as_ref())
                {
                    instance.destroy_surface(surface);
                }
            }
            Stage::Instance => {
                if let Some(instance) = self.instance.take() {
                    instance.destroy();
                }
            }
        }
    }
}

pub struct Session {
    lifecycle: Lifecycle,
    resources: SessionResources,
}

impl Session {
    /// Bring up every stage for `window`. On failure the stages built so far are
    /// torn down before the error is returned.
    pub fn new<W>(window: &W, window_size: vk::Extent2D, config: &Config) -> Result<Self, RenderError>
    where
        W: HasWindowHandle + HasDisplayHandle,
    {
        let mut session = Self {
            lifecycle: Lifecycle::new(),
            resources: SessionResources::default(),
        };

        // Dropping a half-built session releases what exists
        session.build(window, window_size, config)?;
        debug_assert!(session.lifecycle.is_complete());

        if let Some(device) = &session.resources.device {
            log::info!("Session ready on {}", device.name);
        }
        Ok(session)
    }

    fn build<W>(&mut self, window: &W, window_size: vk::Extent2D, config: &Config) -> Result<(), RenderError>
    where
        W: HasWindowHandle + HasDisplayHandle,
    {
        let display = window.display_handle()?.as_raw();
        let raw_window = window.window_handle()?.as_raw();

        let res = &mut self.resources;
        let lifecycle = &mut self.lifecycle;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 1: Instance, surface and (optionally) the validation hook
        // ─────────────────────────────────────────────────────────────────────
        let instance = &*res.instance.insert(VulkanInstance::new(
            &config.window.title,
            display,
            config.validation_enabled(),
        )?);
        lifecycle.record(Stage::Instance);

        let surface = *res.surface.insert(instance.create_surface(display, raw_window)?);
        lifecycle.record(Stage::Surface);

        if instance.validation {
            res.debug_hook = Some(DebugHook::new(instance)?);
            lifecycle.record(Stage::DebugHook);
        }

        // ─────────────────────────────────────────────────────────────────────
        // STEP 2: Pick a GPU and create the logical device
        // ─────────────────────────────────────────────────────────────────────
        let source = VulkanCapabilities::new(&instance.instance, &instance.surface_loader, surface);
        let candidates = source.list_candidate_devices()?;
        log::info!("Found {} physical device(s)", candidates.len());

        let (candidate, families) = select_device(&candidates, &REQUIRED_DEVICE_EXTENSIONS)?;

        let device = &*res.device.insert(VulkanDevice::new(
            &instance.instance,
            candidate,
            families,
            instance.validation,
        )?);
        lifecycle.record(Stage::Device);

        // ─────────────────────────────────────────────────────────────────────
        // STEP 3: Swapchain and the per-image render targets
        // ─────────────────────────────────────────────────────────────────────
        let surface_config = SurfaceConfiguration::negotiate(
            &candidate.surface,
            window_size,
            config.preferred_present_mode(),
        );
        let swapchain = &*res.swapchain.insert(Swapchain::new(
            &instance.instance,
            device,
            surface,
            surface_config,
            families,
        )?);
        lifecycle.record(Stage::Swapchain);

        let targets = &*res.targets.insert(PresentableImageSet::new(&device.device, swapchain)?);
        lifecycle.record(Stage::RenderTargets);

        // ─────────────────────────────────────────────────────────────────────
        // STEP 4: Pipeline, pre-recorded commands, frame sync
        // ─────────────────────────────────────────────────────────────────────
        let pipeline = &*res.pipeline.insert(TrianglePipeline::new(
            &device.device,
            targets.render_pass,
            targets.extent,
            &config.shaders.vertex,
            &config.shaders.fragment,
        )?);
        lifecycle.record(Stage::Pipeline);

        let commands = &*res.commands.insert(CommandRecorder::new(
            &device.device,
            device.queues.family(QueueRole::Graphics),
            targets,
            pipeline.pipeline,
            config.graphics.clear_color,
        )?);
        lifecycle.record(Stage::CommandPool);

        let fence_timeout_ns = u64::try_from(config.fence_timeout().as_nanos()).unwrap_or(u64::MAX);
        res.frames = Some(FrameEngine::create(
            &device.device,
            commands.buffers.clone(),
            fence_timeout_ns,
        )?);
        lifecycle.record(Stage::SyncObjects);

        Ok(())
    }

    /// Render and present one frame
    pub fn draw_frame(&mut self) -> Result<FrameOutcome, RenderError> {
        let res = &mut self.resources;
        let (Some(device), Some(swapchain), Some(frames)) =
            (res.device.as_ref(), res.swapchain.as_ref(), res.frames.as_mut())
        else {
            return Err(RenderError::DeviceLost("session is not running".to_string()));
        };

        let backend = VulkanFrameBackend::new(&device.device, swapchain, device.queues);
        frames.advance(&backend)
    }

    pub fn surface_config(&self) -> Option<&SurfaceConfiguration> {
        self.resources.swapchain.as_ref().map(|swapchain| &swapchain.config)
    }

    /// Drain the GPU and release everything. Safe to call more than once.
    pub fn shutdown(&mut self) {
        if self.lifecycle.built().is_empty() {
            return;
        }
        if let Some(frames) = &self.resources.frames {
            log::info!("Shutting down after {} frames", frames.frame_counter());
        }
        let released = self.lifecycle.shutdown(&mut self.resources);
        log::info!("Released {} stage(s)", released.len());
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn releasing_absent_stages_is_harmless() {
        let mut resources = SessionResources::default();
        assert!(resources.wait_idle().is_ok());
        for stage in Stage::BUILD_ORDER.into_iter().rev() {
            resources.release(stage);
        }
        assert!(resources.instance.is_none());
        assert!(resources.frames.is_none());
    }

    #[test]
    fn empty_session_shuts_down_quietly() {
        let mut session = Session {
            lifecycle: Lifecycle::new(),
            resources: SessionResources::default(),
        };
        session.shutdown();
        session.shutdown();
        assert!(session.surface_config().is_none());
        assert!(matches!(session.draw_frame(), Err(RenderError::DeviceLost(_))));
    }
}
