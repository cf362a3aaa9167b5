// Command recording - one pre-recorded buffer per swapchain image
//
// The draw never changes, so every buffer is recorded once at startup and
// resubmitted each frame. Any per-frame data would need re-recording.

use ash::vk;

use super::swapchain::PresentableImageSet;
use crate::error::RenderError;

pub struct CommandRecorder {
    pub pool: vk::CommandPool,
    /// Indexed by ImageIndex
    pub buffers: Vec<vk::CommandBuffer>,
}

impl CommandRecorder {
    pub fn new(
        device: &ash::Device,
        graphics_family: u32,
        targets: &PresentableImageSet,
        pipeline: vk::Pipeline,
        clear_color: [f32; 4],
    ) -> Result<Self, RenderError> {
        let pool_info = vk::CommandPoolCreateInfo::default().queue_family_index(graphics_family);

        let pool = unsafe { device.create_command_pool(&pool_info, None) }
            .map_err(RenderError::vulkan("vkCreateCommandPool"))?;

        let recorder = Self {
            pool,
            buffers: Vec::new(),
        };

        // Destroying the pool frees any buffers allocated from it
        match recorder.allocate_and_record(device, targets, pipeline, clear_color) {
            Ok(buffers) => {
                log::info!("Recorded {} command buffers", buffers.len());
                Ok(Self { buffers, ..recorder })
            }
            Err(e) => {
                recorder.destroy(device);
                Err(e)
            }
        }
    }

    fn allocate_and_record(
        &self,
        device: &ash::Device,
        targets: &PresentableImageSet,
        pipeline: vk::Pipeline,
        clear_color: [f32; 4],
    ) -> Result<Vec<vk::CommandBuffer>, RenderError> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(targets.len() as u32);

        let buffers = unsafe { device.allocate_command_buffers(&alloc_info) }
            .map_err(RenderError::vulkan("vkAllocateCommandBuffers"))?;

        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue {
                float32: clear_color,
            },
        }];

        for (&cmd, &framebuffer) in buffers.iter().zip(&targets.framebuffers) {
            // May be pending on one frame while submitted again for another
            let begin_info = vk::CommandBufferBeginInfo::default()
                .flags(vk::CommandBufferUsageFlags::SIMULTANEOUS_USE);

            let render_pass_info = vk::RenderPassBeginInfo::default()
                .render_pass(targets.render_pass)
                .framebuffer(framebuffer)
                .render_area(vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent: targets.extent,
                })
                .clear_values(&clear_values);

            unsafe {
                device
                    .begin_command_buffer(cmd, &begin_info)
                    .map_err(RenderError::vulkan("vkBeginCommandBuffer"))?;

                device.cmd_begin_render_pass(cmd, &render_pass_info, vk::SubpassContents::INLINE);
                device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline);
                device.cmd_draw(cmd, 3, 1, 0, 0);
                device.cmd_end_render_pass(cmd);

                device
                    .end_command_buffer(cmd)
                    .map_err(RenderError::vulkan("vkEndCommandBuffer"))?;
            }
        }

        Ok(buffers)
    }

    pub fn destroy(&self, device: &ash::Device) {
        unsafe { device.destroy_command_pool(self.pool, None) };
    }
}
