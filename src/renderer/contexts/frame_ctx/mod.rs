pub mod frame;
pub mod graveyard;
pub mod ledger;

use std::sync::Arc;
use ash::vk;
use color_eyre::eyre::OptionExt;
use color_eyre::Result;
use crate::renderer::contexts::command_ctx::CommandRecorder;
use crate::renderer::contexts::device_ctx::RenderContext;
use crate::renderer::contexts::frame_ctx::frame::FrameSlot;
use crate::renderer::contexts::frame_ctx::graveyard::Graveyard;
use crate::renderer::contexts::frame_ctx::ledger::FrameLedger;
use crate::renderer::contexts::surface_ctx::SurfaceManager;
use crate::renderer::error::{RenderError, VkResultExt};
use crate::renderer::observer::Observer;
use crate::renderer::renderable::{Renderable, RetiredResource};

/// Everything a frame reads or rebuilds, borrowed from the engine for one call
pub struct FrameTarget<'a> {
    pub ctx: &'a RenderContext,
    pub surface: &'a mut SurfaceManager,
    pub recorder: &'a mut CommandRecorder,
    pub renderables: &'a mut [Renderable],
    pub observer: &'a mut Observer,
    pub window_size: vk::Extent2D,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FrameStatus {
    Presented,
    /// The surface was rebuilt, possibly without presenting
    SurfaceRecreated,
}

/// Responsibilities:
/// - Manage per-frame synchronization objects
/// - Bound the number of frames in flight
/// - Keep replaced GPU objects alive until no submitted frame can use them
pub struct FrameScheduler {
    slots: Vec<FrameSlot>,
    ledger: FrameLedger,
    graveyard: Graveyard<RetiredResource>,
    device: Arc<ash::Device>,
}

impl FrameScheduler {
    pub fn new(device: Arc<ash::Device>, frames_in_flight: usize) -> Result<Self> {
        let slot_count = frames_in_flight.max(1);
        let slots = Self::create_slots(&device, slot_count)?;

        Ok(Self {
            slots,
            ledger: FrameLedger::new(slot_count),
            graveyard: Graveyard::default(),
            device,
        })
    }

    /// Render and present one frame. Out-of-date or suboptimal surfaces are rebuilt here and
    /// never reported as errors.
    pub fn draw_frame(
        &mut self,
        target: FrameTarget,
        resize_requested: bool,
    ) -> Result<FrameStatus> {
        let slot_index = self.ledger.current();
        self.slot(slot_index)?.wait()?;
        self.ledger.slot_completed(slot_index);
        self.release_completed();

        let image_acquired = self.slot(slot_index)?.image_acquired;
        let acquired = unsafe {
            target.surface.swapchain().swapchain_loader.acquire_next_image(
                target.surface.swapchain().swapchain,
                u64::MAX,
                image_acquired,
                vk::Fence::null(),
            )
        };
        let image_index = match acquired {
            Ok((image_index, false)) => image_index as usize,
            Ok((_, true)) => {
                self.recreate_surface(target)?;
                return Ok(FrameStatus::SurfaceRecreated);
            }
            Err(result) => {
                let err = RenderError::from_vk("acquire_next_image", result);
                if err.is_recoverable() {
                    self.recreate_surface(target)?;
                    return Ok(FrameStatus::SurfaceRecreated);
                }
                return Err(err.into());
            }
        };

        if let Some(other) = self.ledger.conflicting_slot(image_index, slot_index) {
            self.slot(other)?.wait()?;
            self.ledger.slot_completed(other);
            self.release_completed();
        }

        let mut retired = Vec::new();
        let recorded = target.recorder.record(
            target.ctx,
            image_index,
            target.surface,
            target.renderables,
            target.observer.camera(),
            &mut retired,
        );
        // Bury before propagating so nothing replaced during a failed recording leaks
        self.bury(retired);
        recorded?;

        let slot = self.slot(slot_index)?;
        slot.reset()?;

        let wait_semaphores = [image_acquired];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [target.recorder.buffer(image_index)?];
        let signal_semaphores = [slot.render_complete];
        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);
        unsafe {
            self.device
                .queue_submit(
                    target.ctx.device.graphics_queue.handle,
                    &[submit_info],
                    slot.fence,
                )
                .classify("queue_submit")?;
        }
        self.ledger.submitted(slot_index, image_index);

        let swapchains = [target.surface.swapchain().swapchain];
        let image_indices = [image_index as u32];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&signal_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);
        let presented = unsafe {
            target.surface.swapchain().swapchain_loader.queue_present(
                target.ctx.device.present_queue.handle,
                &present_info,
            )
        };
        let needs_recreation = match presented {
            Ok(suboptimal) => suboptimal || resize_requested,
            Err(result) => {
                let err = RenderError::from_vk("queue_present", result);
                if !err.is_recoverable() {
                    return Err(err.into());
                }
                true
            }
        };

        self.ledger.advance();

        if needs_recreation {
            self.recreate_surface(target)?;
            return Ok(FrameStatus::SurfaceRecreated);
        }
        Ok(FrameStatus::Presented)
    }

    /// Rebuild the surface and everything sized by its image count, then record every image.
    /// Runs with the device idle, so every pending object is released too.
    pub fn recreate_surface(&mut self, target: FrameTarget) -> Result<()> {
        target.surface.recreate(target.ctx, target.window_size, target.observer)?;
        self.device_idle()?;

        let image_count = target.surface.image_count();
        target.recorder.resize(image_count)?;
        for renderable in target.renderables.iter_mut() {
            renderable.refresh_image_count(target.ctx, image_count)?;
        }

        let mut retired = Vec::new();
        let recorded = target.recorder.record_all(
            target.ctx,
            target.surface,
            target.renderables,
            target.observer.camera(),
            &mut retired,
        );
        // The device is idle, replaced objects can go right away
        drop(retired);
        recorded
    }

    /// The device is idle: complete every serial, forget image ownership and drop pending objects.
    /// Slots are rebuilt because an acquire or present that was cut short can leave a semaphore
    /// signaled.
    pub fn device_idle(&mut self) -> Result<()> {
        self.ledger.device_idle();
        self.ledger.forget_images();
        let released = self.graveyard.flush();
        if released > 0 {
            log::debug!("Released {} replaced resources", released);
        }
        self.slots = Self::create_slots(&self.device, self.ledger.slot_count())?;
        Ok(())
    }

    fn slot(&self, index: usize) -> Result<&FrameSlot> {
        self.slots.get(index).ok_or_eyre("Frame slot index out of range")
    }

    /// Keep `retired` alive until every frame submitted so far has completed
    pub fn bury(&mut self, retired: Vec<RetiredResource>) {
        if retired.is_empty() {
            return;
        }
        log::debug!(
            "Retiring {} resources until serial {}",
            retired.len(),
            self.ledger.last_submitted(),
        );
        self.graveyard.retire(&self.ledger, retired);
        self.release_completed();
    }

    fn release_completed(&mut self) {
        let released = self.graveyard.release(&self.ledger);
        if released > 0 {
            log::debug!("Released {} replaced resources", released);
        }
    }

    fn create_slots(device: &Arc<ash::Device>, count: usize) -> Result<Vec<FrameSlot>> {
        (0..count)
            .map(|_| FrameSlot::new(device.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;
    use crate::renderer::contexts::frame_ctx::graveyard::Graveyard;
    use crate::renderer::contexts::frame_ctx::ledger::FrameLedger;

    /// The scheduler's bookkeeping without a GPU. Waiting on a fence is modelled as the slot's
    /// work finishing right then.
    struct FrameLoop {
        ledger: FrameLedger,
        graveyard: Graveyard<Rc<()>>,
    }

    impl FrameLoop {
        fn new(slot_count: usize) -> Self {
            Self {
                ledger: FrameLedger::new(slot_count),
                graveyard: Graveyard::default(),
            }
        }

        /// Steps 1 and 3: wait on the current slot and on whoever still renders `image_index`
        fn begin(&mut self, image_index: usize) -> usize {
            let slot = self.ledger.current();
            self.ledger.slot_completed(slot);
            self.graveyard.release(&self.ledger);
            if let Some(other) = self.ledger.conflicting_slot(image_index, slot) {
                self.ledger.slot_completed(other);
                self.graveyard.release(&self.ledger);
            }
            slot
        }

        /// Step 4: an object replaced while recording
        fn retire(&mut self, object: &Rc<()>) {
            self.graveyard.retire(&self.ledger, [object.clone()]);
            self.graveyard.release(&self.ledger);
        }

        /// Steps 5 to 7
        fn submit(&mut self, slot: usize, image_index: usize) {
            self.ledger.submitted(slot, image_index);
            self.ledger.advance();
        }
    }

    fn alive(object: &Rc<()>) -> bool {
        Rc::strong_count(object) > 1
    }

    #[test]
    fn test_retired_object_outlives_pending_submission() {
        // Two frames in flight, three presentable images
        let mut frames = FrameLoop::new(2);

        let slot = frames.begin(0);
        frames.submit(slot, 0);

        // Slot 0's frame still runs on the GPU when the next frame replaces a buffer
        let replaced = Rc::new(());
        let slot = frames.begin(1);
        assert_eq!(slot, 1);
        frames.retire(&replaced);
        assert!(alive(&replaced));
        frames.submit(slot, 1);
        assert!(alive(&replaced));
        assert_eq!(frames.ledger.pending(), 2);

        // Waiting on slot 0 proves the only frame that could read it is done
        let slot = frames.begin(2);
        assert_eq!(slot, 0);
        assert!(!alive(&replaced));
        assert!(frames.graveyard.is_empty());
        frames.submit(slot, 2);
    }

    #[test]
    fn test_retired_before_any_submission_goes_right_away() {
        let mut frames = FrameLoop::new(2);
        let replaced = Rc::new(());
        let slot = frames.begin(0);
        frames.retire(&replaced);
        assert!(!alive(&replaced));
        frames.submit(slot, 0);
    }

    #[test]
    fn test_each_retirement_waits_for_its_own_frames() {
        let mut frames = FrameLoop::new(2);
        let early = Rc::new(());
        let late = Rc::new(());

        let slot = frames.begin(0);
        frames.submit(slot, 0);

        let slot = frames.begin(1);
        frames.retire(&early);
        frames.submit(slot, 1);

        // Slot 0 completes serial 1, the last one `early` could have been used by
        let slot = frames.begin(2);
        assert!(!alive(&early));
        frames.retire(&late);
        assert!(alive(&late));
        frames.submit(slot, 2);

        // `late` was retired after serial 2 went out and waits for slot 1
        let slot = frames.begin(1);
        assert_eq!(slot, 1);
        assert!(!alive(&late));
        frames.submit(slot, 1);
    }

    #[test]
    fn test_image_conflict_releases_through_other_slot() {
        // Three slots over two images: an image comes back on a slot that did not render it
        let mut frames = FrameLoop::new(3);
        let replaced = Rc::new(());

        let slot = frames.begin(0);
        frames.submit(slot, 0);
        let slot = frames.begin(1);
        frames.retire(&replaced);
        frames.submit(slot, 1);
        assert!(alive(&replaced));

        // Slot 2 never submitted, only the wait on slot 0 (owner of image 0) completes serial 1
        let slot = frames.begin(0);
        assert_eq!(slot, 2);
        assert_eq!(frames.ledger.completed(), 1);
        assert_eq!(frames.ledger.pending(), 1);
        assert!(!alive(&replaced));
        frames.submit(slot, 0);
    }

    #[test]
    fn test_device_idle_flushes_everything() {
        let mut frames = FrameLoop::new(3);
        let replaced = Rc::new(());
        let slot = frames.begin(0);
        frames.submit(slot, 0);
        frames.retire(&replaced);
        assert!(alive(&replaced));

        frames.ledger.device_idle();
        frames.graveyard.release(&frames.ledger);
        assert!(!alive(&replaced));
    }
}
