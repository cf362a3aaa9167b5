// Frame synchronization - fences and semaphores across frames in flight
//
// Two independent rings are in play:
// - frame slots (SlotIndex): K bundles of sync objects, used round-robin
// - swapchain images (ImageIndex): whatever the presentation engine hands back
// The command buffer follows the image, the semaphores and fence follow the slot.
//
// FRAME TIMELINE (one advance):
//   wait slot fence ─> acquire image ─> reset fence ─> submit ─> present ─> next slot

use ash::vk;

use super::device::{QueueRole, QueueRoleAssignment};
use super::swapchain::{ImageIndex, PresentStatus, Swapchain};
use crate::error::RenderError;

/// Number of frames the CPU may run ahead of the GPU
pub const FRAMES_IN_FLIGHT: usize = 2;

/// Position in the frame-slot ring. Never used to index swapchain resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotIndex(pub usize);

/// Where a slot is in its cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Idle,
    Submitted(ImageIndex),
    Presented(ImageIndex),
}

/// Frame synchronization - one per frame in flight
#[derive(Debug, Clone, Copy)]
pub struct FrameSlot {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    /// Created signaled so the first wait on a fresh slot returns at once
    pub in_flight_fence: vk::Fence,
    pub state: SlotState,
}

impl FrameSlot {
    pub fn new(device: &ash::Device) -> Result<Self, RenderError> {
        let semaphore_info = vk::SemaphoreCreateInfo::default();
        let fence_info = vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);

        unsafe {
            let image_available = device
                .create_semaphore(&semaphore_info, None)
                .map_err(RenderError::vulkan("vkCreateSemaphore"))?;

            let render_finished = match device.create_semaphore(&semaphore_info, None) {
                Ok(semaphore) => semaphore,
                Err(result) => {
                    device.destroy_semaphore(image_available, None);
                    return Err(RenderError::Vulkan {
                        operation: "vkCreateSemaphore",
                        result,
                    });
                }
            };

            let in_flight_fence = match device.create_fence(&fence_info, None) {
                Ok(fence) => fence,
                Err(result) => {
                    device.destroy_semaphore(render_finished, None);
                    device.destroy_semaphore(image_available, None);
                    return Err(RenderError::Vulkan {
                        operation: "vkCreateFence",
                        result,
                    });
                }
            };

            Ok(Self {
                image_available,
                render_finished,
                in_flight_fence,
                state: SlotState::Idle,
            })
        }
    }

    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_semaphore(self.image_available, None);
            device.destroy_semaphore(self.render_finished, None);
            device.destroy_fence(self.in_flight_fence, None);
        }
    }
}

/// Result of waiting on a fence with a finite timeout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceWait {
    Signaled,
    TimedOut,
}

/// An image handed out by the presentation engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquiredImage {
    pub image: ImageIndex,
    pub suboptimal: bool,
}

/// One graphics-queue submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Submission {
    pub command_buffer: vk::CommandBuffer,
    pub wait_semaphore: vk::Semaphore,
    pub wait_stage: vk::PipelineStageFlags,
    pub signal_semaphore: vk::Semaphore,
    pub fence: vk::Fence,
}

/// The GPU-facing operations a frame needs. The Vulkan implementation is
/// VulkanFrameBackend; tests drive the state machine with a mock.
pub trait FrameBackend {
    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> Result<FenceWait, RenderError>;

    fn reset_fence(&self, fence: vk::Fence) -> Result<(), RenderError>;

    /// Out-of-date surfaces are reported as `RenderError::SurfaceStale`, an image not
    /// handed out within `timeout_ns` as `RenderError::DeviceLost`
    fn acquire_next_image(
        &self,
        signal: vk::Semaphore,
        timeout_ns: u64,
    ) -> Result<AcquiredImage, RenderError>;

    fn submit(&self, submission: &Submission) -> Result<(), RenderError>;

    fn present(&self, image: ImageIndex, wait: vk::Semaphore) -> Result<PresentStatus, RenderError>;
}

/// Summary of one completed frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameOutcome {
    pub frame: u64,
    pub slot: SlotIndex,
    pub image: ImageIndex,
    /// Acquire or present reported the swapchain as suboptimal
    pub suboptimal: bool,
}

/// Per-frame state machine over K frame slots
pub struct FrameEngine<const K: usize> {
    slots: [FrameSlot; K],
    /// Pre-recorded command buffers, indexed by ImageIndex
    command_buffers: Vec<vk::CommandBuffer>,
    frame_counter: u64,
    fence_timeout_ns: u64,
}

impl<const K: usize> FrameEngine<K> {
    pub fn new(
        slots: [FrameSlot; K],
        command_buffers: Vec<vk::CommandBuffer>,
        fence_timeout_ns: u64,
    ) -> Self {
        assert!(K > 0, "at least one frame slot is required");
        Self {
            slots,
            command_buffers,
            frame_counter: 0,
            fence_timeout_ns,
        }
    }

    /// Create K slots of fresh sync objects. Nothing leaks if one fails.
    pub fn create(
        device: &ash::Device,
        command_buffers: Vec<vk::CommandBuffer>,
        fence_timeout_ns: u64,
    ) -> Result<Self, RenderError> {
        let mut created = Vec::with_capacity(K);
        for _ in 0..K {
            match FrameSlot::new(device) {
                Ok(slot) => created.push(slot),
                Err(e) => {
                    for slot in &created {
                        slot.destroy(device);
                    }
                    return Err(e);
                }
            }
        }

        let slots: [FrameSlot; K] = match created.try_into() {
            Ok(slots) => slots,
            Err(_) => unreachable!("exactly K slots were created"),
        };

        log::info!("Created sync objects for {} frames in flight", K);
        Ok(Self::new(slots, command_buffers, fence_timeout_ns))
    }

    pub fn frame_counter(&self) -> u64 {
        self.frame_counter
    }

    pub fn current_slot(&self) -> SlotIndex {
        SlotIndex((self.frame_counter % K as u64) as usize)
    }

    pub fn slot(&self, index: SlotIndex) -> &FrameSlot {
        &self.slots[index.0]
    }

    /// Render one frame.
    ///
    /// Blocks on the current slot's fence and on acquisition, each bounded by the
    /// fence timeout. The frame counter only moves once the frame has been
    /// presented; on any error it stays put.
    ///
    /// `ImageOutOfRange` leaves the slot's image-available semaphore with a pending
    /// signal, so the engine must not be advanced again after it.
    pub fn advance<B: FrameBackend>(&mut self, backend: &B) -> Result<FrameOutcome, RenderError> {
        let slot_index = self.current_slot();
        let slot = *self.slot(slot_index);
        if let SlotState::Submitted(image) = slot.state {
            log::trace!(
                "Slot {} reused; image {} from its last frame was never presented",
                slot_index.0,
                image.0
            );
        }

        // STEP 1: Wait until the GPU is done with the last submission from this slot
        match backend.wait_for_fence(slot.in_flight_fence, self.fence_timeout_ns)? {
            FenceWait::Signaled => {}
            FenceWait::TimedOut => {
                return Err(RenderError::DeviceLost(format!(
                    "frame slot {} fence not signaled within {} ms",
                    slot_index.0,
                    self.fence_timeout_ns / 1_000_000
                )));
            }
        }
        self.slots[slot_index.0].state = SlotState::Idle;

        // STEP 2: Acquire the next image; its index is unrelated to the slot index
        let acquired = backend.acquire_next_image(slot.image_available, self.fence_timeout_ns)?;
        let command_buffer = *self.command_buffers.get(acquired.image.as_usize()).ok_or(
            RenderError::ImageOutOfRange {
                image: acquired.image.0,
                recorded: self.command_buffers.len(),
            },
        )?;

        // STEP 3: Reset only now - the wait succeeded and this frame will submit
        backend.reset_fence(slot.in_flight_fence)?;

        // STEP 4: Submit the image's command buffer with the slot's sync objects
        backend.submit(&Submission {
            command_buffer,
            wait_semaphore: slot.image_available,
            wait_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            signal_semaphore: slot.render_finished,
            fence: slot.in_flight_fence,
        })?;
        self.slots[slot_index.0].state = SlotState::Submitted(acquired.image);

        // STEP 5: Present once rendering has finished
        // A failed present leaves the counter on this slot; its fence is signaled by the
        // submission already in flight, so the next wait does not hang
        match backend.present(acquired.image, slot.render_finished)? {
            PresentStatus::OutOfDate => Err(RenderError::SurfaceStale),
            status => {
                let frame = self.frame_counter;
                self.frame_counter += 1;
                self.slots[slot_index.0].state = SlotState::Presented(acquired.image);
                Ok(FrameOutcome {
                    frame,
                    slot: slot_index,
                    image: acquired.image,
                    suboptimal: acquired.suboptimal || status == PresentStatus::Suboptimal,
                })
            }
        }
    }

    pub fn destroy(&self, device: &ash::Device) {
        for slot in &self.slots {
            slot.destroy(device);
        }
    }
}

/// FrameBackend over the real device, swapchain and queues
pub struct VulkanFrameBackend<'a> {
    device: &'a ash::Device,
    swapchain: &'a Swapchain,
    queues: QueueRoleAssignment,
}

impl<'a> VulkanFrameBackend<'a> {
    pub fn new(device: &'a ash::Device, swapchain: &'a Swapchain, queues: QueueRoleAssignment) -> Self {
        Self {
            device,
            swapchain,
            queues,
        }
    }
}

impl FrameBackend for VulkanFrameBackend<'_> {
    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> Result<FenceWait, RenderError> {
        match unsafe { self.device.wait_for_fences(&[fence], true, timeout_ns) } {
            Ok(()) => Ok(FenceWait::Signaled),
            Err(vk::Result::TIMEOUT) => Ok(FenceWait::TimedOut),
            Err(vk::Result::ERROR_DEVICE_LOST) => Err(RenderError::DeviceLost(
                "device lost while waiting for a frame fence".to_string(),
            )),
            Err(result) => Err(RenderError::Vulkan {
                operation: "vkWaitForFences",
                result,
            }),
        }
    }

    fn reset_fence(&self, fence: vk::Fence) -> Result<(), RenderError> {
        unsafe { self.device.reset_fences(&[fence]) }.map_err(RenderError::vulkan("vkResetFences"))
    }

    fn acquire_next_image(
        &self,
        signal: vk::Semaphore,
        timeout_ns: u64,
    ) -> Result<AcquiredImage, RenderError> {
        let (image, suboptimal) = self.swapchain.acquire_next_image(timeout_ns, signal)?;
        Ok(AcquiredImage { image, suboptimal })
    }

    fn submit(&self, submission: &Submission) -> Result<(), RenderError> {
        let wait_semaphores = [submission.wait_semaphore];
        let wait_stages = [submission.wait_stage];
        let command_buffers = [submission.command_buffer];
        let signal_semaphores = [submission.signal_semaphore];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device.queue_submit(
                self.queues.queue(QueueRole::Graphics),
                &[submit_info],
                submission.fence,
            )
        }
        .map_err(|result| match result {
            vk::Result::ERROR_DEVICE_LOST => {
                RenderError::DeviceLost("device lost on queue submit".to_string())
            }
            result => RenderError::Submit(result),
        })
    }

    fn present(&self, image: ImageIndex, wait: vk::Semaphore) -> Result<PresentStatus, RenderError> {
        self.swapchain
            .present(self.queues.queue(QueueRole::Present), image, &[wait])
    }
}
