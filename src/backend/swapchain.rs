// Swapchain - Window presentation
//
// Negotiates the surface configuration from a capability snapshot, then owns the
// chain of presentable images and the per-image views/framebuffers we render into.

use ash::vk;

use super::device::{QueueFamilyIndices, VulkanDevice};
use super::capabilities::SurfaceCapabilities;
use crate::error::RenderError;

/// Everything the swapchain is created with. Derived deterministically from the
/// surface capabilities and the window size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceConfiguration {
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub image_count: u32,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
    pub composite_alpha: vk::CompositeAlphaFlagsKHR,
}

impl SurfaceConfiguration {
    /// `preferred_mode` is honored first when the surface offers it
    pub fn negotiate(
        caps: &SurfaceCapabilities,
        window_size: vk::Extent2D,
        preferred_mode: Option<vk::PresentModeKHR>,
    ) -> Self {
        let present_mode = preferred_mode
            .filter(|mode| caps.present_modes.contains(mode))
            .unwrap_or_else(|| choose_present_mode(&caps.present_modes));

        Self {
            format: choose_surface_format(&caps.formats),
            present_mode,
            extent: choose_extent(caps, window_size),
            image_count: choose_image_count(caps.min_image_count, caps.max_image_count),
            pre_transform: caps.current_transform,
            composite_alpha: choose_composite_alpha(caps.supported_composite_alpha),
        }
    }
}

const PREFERRED_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_UNORM,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

/// BGRA8 + sRGB non-linear if available, else the first format.
/// A lone UNDEFINED entry means the surface takes anything.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    match formats {
        [] => PREFERRED_FORMAT,
        [only] if only.format == vk::Format::UNDEFINED => PREFERRED_FORMAT,
        _ => formats
            .iter()
            .copied()
            .find(|f| {
                f.format == PREFERRED_FORMAT.format && f.color_space == PREFERRED_FORMAT.color_space
            })
            .unwrap_or(formats[0]),
    }
}

/// MAILBOX: no tearing, lowest latency
/// IMMEDIATE: may tear, kept as fallback while scanning
/// FIFO: vsync, guaranteed to exist
pub fn choose_present_mode(modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    let mut best = vk::PresentModeKHR::FIFO;

    for &mode in modes {
        if mode == vk::PresentModeKHR::MAILBOX {
            return mode;
        }
        if mode == vk::PresentModeKHR::IMMEDIATE {
            best = mode;
        }
    }

    best
}

/// Current extent unless the surface reports the u32::MAX sentinel, in which case the
/// window size is clamped per axis.
pub fn choose_extent(caps: &SurfaceCapabilities, window_size: vk::Extent2D) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }

    vk::Extent2D {
        width: window_size
            .width
            .clamp(caps.min_extent.width, caps.max_extent.width),
        height: window_size
            .height
            .clamp(caps.min_extent.height, caps.max_extent.height),
    }
}

/// One more than the minimum so we never wait on the driver for an image;
/// `max == 0` means unbounded.
pub fn choose_image_count(min: u32, max: u32) -> u32 {
    let count = min.saturating_add(1);
    if max > 0 && count > max {
        max
    } else {
        count
    }
}

pub fn choose_composite_alpha(supported: vk::CompositeAlphaFlagsKHR) -> vk::CompositeAlphaFlagsKHR {
    [
        vk::CompositeAlphaFlagsKHR::OPAQUE,
        vk::CompositeAlphaFlagsKHR::INHERIT,
        vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED,
    ]
    .into_iter()
    .find(|&flag| supported.contains(flag))
    .unwrap_or(vk::CompositeAlphaFlagsKHR::OPAQUE)
}

/// Index of a presentable image, as returned by acquisition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageIndex(pub u32);

impl ImageIndex {
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// Whether presentation still matches the surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentStatus {
    Optimal,
    Suboptimal,
    OutOfDate,
}

/// The swapchain handle and its images. Views and framebuffers live in
/// PresentableImageSet.
pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub swapchain_loader: ash::khr::swapchain::Device,
    pub images: Vec<vk::Image>,
    pub config: SurfaceConfiguration,
}

impl Swapchain {
    pub fn new(
        instance: &ash::Instance,
        device: &VulkanDevice,
        surface: vk::SurfaceKHR,
        config: SurfaceConfiguration,
        families: QueueFamilyIndices,
    ) -> Result<Self, RenderError> {
        log::info!(
            "Creating swapchain: {}x{}, {:?}/{:?}, {:?}, {} images requested",
            config.extent.width,
            config.extent.height,
            config.format.format,
            config.format.color_space,
            config.present_mode,
            config.image_count
        );

        let family_indices = [families.graphics, families.present];
        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(config.image_count)
            .image_format(config.format.format)
            .image_color_space(config.format.color_space)
            .image_extent(config.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .pre_transform(config.pre_transform)
            .composite_alpha(config.composite_alpha)
            .present_mode(config.present_mode)
            .clipped(true);

        // Separate families need concurrent access, or explicit ownership transfers
        let create_info = if families.is_shared() {
            create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        } else {
            create_info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&family_indices)
        };

        let swapchain_loader = ash::khr::swapchain::Device::new(instance, &device.device);

        let swapchain = unsafe { swapchain_loader.create_swapchain(&create_info, None) }
            .map_err(RenderError::surface("vkCreateSwapchainKHR"))?;

        let images = match unsafe { swapchain_loader.get_swapchain_images(swapchain) } {
            Ok(images) => images,
            Err(result) => {
                unsafe { swapchain_loader.destroy_swapchain(swapchain, None) };
                return Err(RenderError::SurfaceSetup {
                    operation: "vkGetSwapchainImagesKHR",
                    result,
                });
            }
        };

        log::info!("Created swapchain with {} images", images.len());

        Ok(Self {
            swapchain,
            swapchain_loader,
            images,
            config,
        })
    }

    /// Acquire next image for rendering, waiting at most `timeout_ns`.
    /// The bool is the suboptimal flag.
    pub fn acquire_next_image(
        &self,
        timeout_ns: u64,
        semaphore: vk::Semaphore,
    ) -> Result<(ImageIndex, bool), RenderError> {
        let result = unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain,
                timeout_ns,
                semaphore,
                vk::Fence::null(),
            )
        };

        acquire_result(result, timeout_ns)
    }

    /// Present rendered image to screen
    pub fn present(
        &self,
        queue: vk::Queue,
        image: ImageIndex,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<PresentStatus, RenderError> {
        let swapchains = [self.swapchain];
        let image_indices = [image.0];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe { self.swapchain_loader.queue_present(queue, &present_info) };

        match result {
            Ok(false) => Ok(PresentStatus::Optimal),
            Ok(true) => Ok(PresentStatus::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentStatus::OutOfDate),
            Err(vk::Result::ERROR_DEVICE_LOST) => Err(RenderError::DeviceLost(
                "device lost during presentation".to_string(),
            )),
            Err(e) => Err(RenderError::Present(e)),
        }
    }

    pub fn destroy(&self) {
        unsafe {
            self.swapchain_loader
                .destroy_swapchain(self.swapchain, None)
        };
    }
}

/// Out-of-date surfaces become SurfaceStale; no image within the timeout means the
/// presentation engine has stopped handing them out.
fn acquire_result(
    result: Result<(u32, bool), vk::Result>,
    timeout_ns: u64,
) -> Result<(ImageIndex, bool), RenderError> {
    match result {
        Ok((index, suboptimal)) => Ok((ImageIndex(index), suboptimal)),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(RenderError::SurfaceStale),
        Err(vk::Result::TIMEOUT | vk::Result::NOT_READY) => Err(RenderError::DeviceLost(format!(
            "no swapchain image available within {} ms",
            timeout_ns / 1_000_000
        ))),
        Err(vk::Result::ERROR_DEVICE_LOST) => Err(RenderError::DeviceLost(
            "device lost during image acquisition".to_string(),
        )),
        Err(result) => Err(RenderError::Vulkan {
            operation: "vkAcquireNextImageKHR",
            result,
        }),
    }
}

/// Creation and destruction of the objects a PresentableImageSet is made of.
/// Implemented by `ash::Device`; tests count handles with a mock.
pub trait RenderTargetFactory {
    fn create_present_pass(&self, format: vk::Format) -> Result<vk::RenderPass, RenderError>;

    fn create_color_view(&self, image: vk::Image, format: vk::Format) -> Result<vk::ImageView, RenderError>;

    fn create_target_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        view: vk::ImageView,
        extent: vk::Extent2D,
    ) -> Result<vk::Framebuffer, RenderError>;

    fn destroy_target_framebuffer(&self, framebuffer: vk::Framebuffer);

    fn destroy_color_view(&self, view: vk::ImageView);

    fn destroy_present_pass(&self, render_pass: vk::RenderPass);
}

impl RenderTargetFactory for ash::Device {
    /// Single color attachment: cleared on load, handed to the presentation engine at the end
    fn create_present_pass(&self, format: vk::Format) -> Result<vk::RenderPass, RenderError> {
        let color_attachment = vk::AttachmentDescription::default()
            .format(format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::PRESENT_SRC_KHR);

        let color_attachment_ref = vk::AttachmentReference::default()
            .attachment(0)
            .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);

        let color_attachments = [color_attachment_ref];
        let subpass = vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_attachments);

        // The layout transition must not start before the image-acquired semaphore,
        // which is waited on at COLOR_ATTACHMENT_OUTPUT
        let dependency = vk::SubpassDependency::default()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE);

        let attachments = [color_attachment];
        let subpasses = [subpass];
        let dependencies = [dependency];

        let render_pass_info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);

        unsafe { self.create_render_pass(&render_pass_info, None) }
            .map_err(RenderError::surface("vkCreateRenderPass"))
    }

    fn create_color_view(&self, image: vk::Image, format: vk::Format) -> Result<vk::ImageView, RenderError> {
        let create_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .components(vk::ComponentMapping {
                r: vk::ComponentSwizzle::IDENTITY,
                g: vk::ComponentSwizzle::IDENTITY,
                b: vk::ComponentSwizzle::IDENTITY,
                a: vk::ComponentSwizzle::IDENTITY,
            })
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });

        unsafe { self.create_image_view(&create_info, None) }
            .map_err(RenderError::surface("vkCreateImageView"))
    }

    fn create_target_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        view: vk::ImageView,
        extent: vk::Extent2D,
    ) -> Result<vk::Framebuffer, RenderError> {
        let attachments = [view];
        let framebuffer_info = vk::FramebufferCreateInfo::default()
            .render_pass(render_pass)
            .attachments(&attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        unsafe { self.create_framebuffer(&framebuffer_info, None) }
            .map_err(RenderError::surface("vkCreateFramebuffer"))
    }

    fn destroy_target_framebuffer(&self, framebuffer: vk::Framebuffer) {
        unsafe { self.destroy_framebuffer(framebuffer, None) };
    }

    fn destroy_color_view(&self, view: vk::ImageView) {
        unsafe { self.destroy_image_view(view, None) };
    }

    fn destroy_present_pass(&self, render_pass: vk::RenderPass) {
        unsafe { self.destroy_render_pass(render_pass, None) };
    }
}

/// Render pass plus one view and one framebuffer per swapchain image. Built and
/// destroyed as a unit.
#[derive(Debug)]
pub struct PresentableImageSet {
    pub render_pass: vk::RenderPass,
    pub image_views: Vec<vk::ImageView>,
    pub framebuffers: Vec<vk::Framebuffer>,
    pub extent: vk::Extent2D,
}

impl PresentableImageSet {
    pub fn new<F: RenderTargetFactory>(factory: &F, swapchain: &Swapchain) -> Result<Self, RenderError> {
        Self::build(
            factory,
            &swapchain.images,
            swapchain.config.format.format,
            swapchain.config.extent,
        )
    }

    /// All or nothing: on failure whatever part of the set already exists is destroyed
    pub fn build<F: RenderTargetFactory>(
        factory: &F,
        images: &[vk::Image],
        format: vk::Format,
        extent: vk::Extent2D,
    ) -> Result<Self, RenderError> {
        let mut set = Self {
            render_pass: vk::RenderPass::null(),
            image_views: Vec::with_capacity(images.len()),
            framebuffers: Vec::with_capacity(images.len()),
            extent,
        };

        if let Err(e) = set.populate(factory, images, format) {
            set.destroy(factory);
            return Err(e);
        }

        log::info!(
            "Created {} image views and framebuffers",
            set.framebuffers.len()
        );
        Ok(set)
    }

    fn populate<F: RenderTargetFactory>(
        &mut self,
        factory: &F,
        images: &[vk::Image],
        format: vk::Format,
    ) -> Result<(), RenderError> {
        self.render_pass = factory.create_present_pass(format)?;

        for &image in images {
            let view = factory.create_color_view(image, format)?;
            self.image_views.push(view);
        }

        for &view in &self.image_views {
            let framebuffer = factory.create_target_framebuffer(self.render_pass, view, self.extent)?;
            self.framebuffers.push(framebuffer);
        }

        Ok(())
    }

    pub fn len(&self) -> usize {
        self.framebuffers.len()
    }

    pub fn destroy<F: RenderTargetFactory>(&mut self, factory: &F) {
        for framebuffer in self.framebuffers.drain(..) {
            factory.destroy_target_framebuffer(framebuffer);
        }
        for view in self.image_views.drain(..) {
            factory.destroy_color_view(view);
        }
        if self.render_pass != vk::RenderPass::null() {
            factory.destroy_present_pass(self.render_pass);
            self.render_pass = vk::RenderPass::null();
        }
    }
}
