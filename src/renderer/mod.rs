pub mod config;
pub mod error;
pub mod observer;
pub mod renderable;
pub mod shader_data;

pub mod contexts;
pub mod resources;

use std::sync::Arc;
use ash::vk;
use color_eyre::eyre::{eyre, OptionExt};
use color_eyre::Result;
use winit::window::Window;
use crate::renderer::config::{RenderConfig, ViewMode};
use crate::renderer::contexts::command_ctx::CommandRecorder;
use crate::renderer::contexts::device_ctx::RenderContext;
use crate::renderer::contexts::device_ctx::instance::RenderInstance;
use crate::renderer::contexts::device_ctx::selection::SuitableDevice;
use crate::renderer::contexts::frame_ctx::{FrameScheduler, FrameStatus, FrameTarget};
use crate::renderer::contexts::surface_ctx::SurfaceManager;
use crate::renderer::observer::Observer;
use crate::renderer::renderable::Renderable;

/// Everything that exists once a device was chosen. Fields drop top to bottom, after the
/// device went idle.
struct Engine {
    renderables: Vec<Renderable>,
    scheduler: FrameScheduler,
    recorder: CommandRecorder,
    surface: SurfaceManager,
    ctx: RenderContext,
}

impl Engine {
    fn new(
        ctx: RenderContext,
        window_size: vk::Extent2D,
        frames_in_flight: usize,
        observer: &mut Observer,
        mut renderables: Vec<Renderable>,
    ) -> Result<Self> {
        let surface = SurfaceManager::new(&ctx, window_size, observer.view_mode())?;
        observer.update_projection(surface.extent().width, surface.extent().height);

        let image_count = surface.image_count();
        for renderable in renderables.iter_mut() {
            renderable.ensure_ready(&ctx, image_count)?;
        }

        let recorder = CommandRecorder::new(
            ctx.device.logical.clone(),
            ctx.device.graphics_queue.family.index,
            image_count,
        )?;
        let scheduler = FrameScheduler::new(ctx.device.logical.clone(), frames_in_flight)?;

        // Everything was just built, so nothing can be replaced here
        let mut retired = Vec::new();
        recorder.record_all(&ctx, &surface, &mut renderables, observer.camera(), &mut retired)?;

        log::info!(
            "Renderer started on {}: {} images, {}x{}, {} frames in flight, {} renderables",
            ctx.device.name,
            image_count,
            surface.extent().width,
            surface.extent().height,
            frames_in_flight,
            renderables.len(),
        );

        Ok(Self {
            renderables,
            scheduler,
            recorder,
            surface,
            ctx,
        })
    }

    fn target<'a>(
        &'a mut self,
        observer: &'a mut Observer,
        window_size: vk::Extent2D,
    ) -> (&'a mut FrameScheduler, FrameTarget<'a>) {
        (
            &mut self.scheduler,
            FrameTarget {
                ctx: &self.ctx,
                surface: &mut self.surface,
                recorder: &mut self.recorder,
                renderables: &mut self.renderables,
                observer,
                window_size,
            },
        )
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(e) = self.ctx.device.wait_idle() {
            log::error!("Failed to wait for device idle on shutdown: {}", e);
        }
        for renderable in self.renderables.iter_mut() {
            renderable.destroy();
        }
    }
}

/// Entry point of the stimulus renderer. Created against a window, started on one of the
/// devices able to drive it, then driven one frame at a time from the window's event loop.
pub struct Renderer {
    window: Arc<Window>,
    config: RenderConfig,
    observer: Observer,
    suitable_devices: Vec<SuitableDevice>,

    // Exactly one of these is set until cleanup
    engine: Option<Engine>,
    instance: Option<RenderInstance>,

    resize_requested: bool,
}

impl Renderer {
    /// Create the instance and window surface and list every device able to present to it
    pub fn initialize(window: Arc<Window>, config: RenderConfig) -> Result<Self> {
        let instance = RenderInstance::new(
            &window,
            config.enable_validation,
            config.enable_api_dump,
        )?;
        let suitable_devices = instance.enumerate_suitable_devices()?;
        if suitable_devices.is_empty() {
            return Err(eyre!("No suitable physical device found"));
        }
        for (index, device) in suitable_devices.iter().enumerate() {
            log::info!("Suitable device {}: {} ({:?})", index, device.name, device.device_type);
        }

        let observer = Observer::new(config.view_mode, config.distance_mm, config.pixel_pitch_mm);

        Ok(Self {
            window,
            config,
            observer,
            suitable_devices,
            engine: None,
            instance: Some(instance),
            resize_requested: false,
        })
    }

    pub fn suitable_devices(&self) -> &[SuitableDevice] {
        &self.suitable_devices
    }

    /// The configured device index, or the best ranked device
    pub fn preferred_device(&self) -> Result<&SuitableDevice> {
        let index = self.config.device_index.unwrap_or(0);
        self.suitable_devices.get(index).ok_or_eyre(format!(
            "Device index {} out of range, {} suitable devices",
            index,
            self.suitable_devices.len(),
        ))
    }

    /// Create the logical device and the surface objects, upload every renderable and record
    /// the first command buffers
    pub fn start(&mut self, device: SuitableDevice, renderables: Vec<Renderable>) -> Result<()> {
        let instance = self
            .instance
            .take()
            .ok_or_eyre("Renderer was already started or cleaned up")?;
        let ctx = RenderContext::new(instance, &device)?;
        log::info!("Using device: {}", ctx.device.name);

        let engine = Engine::new(
            ctx,
            self.window_size(),
            self.config.frames_in_flight,
            &mut self.observer,
            renderables,
        )?;
        self.engine = Some(engine);
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.engine.is_some()
    }

    pub fn request_resize(&mut self) {
        self.resize_requested = true;
    }

    /// Draw one frame. Surface loss is handled internally, a minimized window skips the frame.
    pub fn draw_frame(&mut self) -> Result<()> {
        let window_size = self.window_size();
        if window_size.width == 0 || window_size.height == 0 {
            return Ok(());
        }

        let resize_requested = self.resize_requested;
        let engine = self.engine.as_mut().ok_or_eyre("Renderer is not started")?;
        let (scheduler, target) = engine.target(&mut self.observer, window_size);
        if scheduler.draw_frame(target, resize_requested)? == FrameStatus::SurfaceRecreated {
            self.resize_requested = false;
        }
        Ok(())
    }

    pub fn view_mode(&self) -> ViewMode {
        self.observer.view_mode()
    }

    /// Switch between one full-surface pass and two half-surface passes. The surface is rebuilt
    /// right away unless the window is minimized, in which case the next resize picks it up.
    pub fn set_view_mode(&mut self, view_mode: ViewMode) -> Result<()> {
        if view_mode == self.observer.view_mode() {
            return Ok(());
        }
        self.observer.set_view_mode(view_mode);
        log::info!("View mode: {:?}", view_mode);

        let window_size = self.window_size();
        let Some(engine) = self.engine.as_mut() else {
            return Ok(());
        };
        if window_size.width == 0 || window_size.height == 0 {
            self.resize_requested = true;
            return Ok(());
        }
        let (scheduler, target) = engine.target(&mut self.observer, window_size);
        scheduler.recreate_surface(target)?;
        self.resize_requested = false;
        Ok(())
    }

    pub fn observer(&self) -> &Observer {
        &self.observer
    }

    pub fn renderables(&self) -> &[Renderable] {
        self.engine
            .as_ref()
            .map(|engine| engine.renderables.as_slice())
            .unwrap_or_default()
    }

    /// Append a renderable and return its index. GPU objects are built the first time it is
    /// drawn.
    pub fn add_renderable(&mut self, renderable: Renderable) -> Result<usize> {
        let engine = self.engine.as_mut().ok_or_eyre("Renderer is not started")?;
        engine.renderables.push(renderable);
        Ok(engine.renderables.len() - 1)
    }

    /// Take a renderable out of the scene, shifting later indices down. Its GPU objects are kept
    /// until every frame submitted so far has completed. The returned renderable can be added
    /// again.
    pub fn remove_renderable(&mut self, index: usize) -> Result<Renderable> {
        let engine = self.engine.as_mut().ok_or_eyre("Renderer is not started")?;
        if index >= engine.renderables.len() {
            return Err(eyre!(
                "Renderable index {} out of range, {} renderables",
                index,
                engine.renderables.len(),
            ));
        }
        let mut renderable = engine.renderables.remove(index);
        engine.scheduler.bury(renderable.retire().into_iter().collect());
        Ok(renderable)
    }

    /// Changes are picked up the next time the renderable is drawn
    pub fn renderable_mut(&mut self, index: usize) -> Option<&mut Renderable> {
        self.engine
            .as_mut()
            .and_then(|engine| engine.renderables.get_mut(index))
    }

    /// Number of presentable images, 0 before start
    pub fn image_count(&self) -> usize {
        self.engine
            .as_ref()
            .map_or(0, |engine| engine.surface.image_count())
    }

    /// Wait for the device to go idle and release every GPU object. Safe to call more than once.
    pub fn cleanup(&mut self) {
        if let Some(engine) = self.engine.take() {
            drop(engine);
            log::info!("Renderer cleaned up");
        }
        self.instance = None;
    }

    fn window_size(&self) -> vk::Extent2D {
        let size = self.window.inner_size();
        vk::Extent2D {
            width: size.width,
            height: size.height,
        }
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        self.cleanup();
    }
}
