mod scene;

use std::sync::Arc;
use color_eyre::{Report, Result};
use winit::application::ApplicationHandler;
use winit::dpi::LogicalSize;
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{Key, NamedKey};
use winit::window::{Window, WindowId};
use crate::renderer::config::RenderConfig;
use crate::renderer::Renderer;

/// Demo shell: one window, one renderer, a handful of stimuli
pub struct App {
    config: RenderConfig,
    window: Option<Arc<Window>>,
    renderer: Option<Renderer>,

    // State
    fixation: Option<usize>,
    close_requested: bool,
    error: Option<Report>,
}

impl App {
    pub fn new(config: RenderConfig) -> Self {
        Self {
            config,
            window: None,
            renderer: None,
            fixation: None,
            close_requested: false,
            error: None,
        }
    }

    /// Run the event loop until the window closes. The first error ends the loop and is returned.
    pub fn run(mut self) -> Result<()> {
        let event_loop = EventLoop::new()?;
        event_loop.set_control_flow(ControlFlow::Poll);
        event_loop.run_app(&mut self)?;

        // GPU objects go before the window they present to
        if let Some(mut renderer) = self.renderer.take() {
            renderer.cleanup();
        }

        match self.error.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn start(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let attributes = Window::default_attributes()
            .with_title("vistim")
            .with_inner_size(LogicalSize::new(1280.0, 720.0));
        let window = Arc::new(event_loop.create_window(attributes)?);

        let mut renderer = Renderer::initialize(window.clone(), self.config.clone())?;
        let device = renderer.preferred_device()?.clone();
        renderer.start(device, scene::build(self.config.image_path.as_deref())?)?;

        self.window = Some(window);
        self.renderer = Some(renderer);
        Ok(())
    }

    fn handle_key(&mut self, key: Key) -> Result<()> {
        let Some(renderer) = self.renderer.as_mut() else {
            return Ok(());
        };

        match key.as_ref() {
            Key::Character("m") => {
                renderer.set_view_mode(renderer.view_mode().toggled())?;
                let (fovx, fovy) = renderer.observer().field_of_view();
                log::info!(
                    "{} images, field of view {:.1}x{:.1} deg per eye",
                    renderer.image_count(),
                    fovx,
                    fovy,
                );
            }
            Key::Character("f") => {
                match self.fixation.take() {
                    Some(index) => {
                        renderer.remove_renderable(index)?;
                    }
                    None => {
                        self.fixation = Some(renderer.add_renderable(scene::fixation())?);
                    }
                }
                log::info!("{} renderables", renderer.renderables().len());
            }
            Key::Character("g") => {
                if let Some(renderable) = renderer.renderable_mut(scene::SHAPE) {
                    scene::toggle_shape(renderable);
                }
            }
            Key::Character("t") => {
                if let Some(renderable) = renderer.renderable_mut(scene::PATTERN) {
                    scene::toggle_pattern(renderable);
                }
            }
            Key::Named(NamedKey::Escape) => {
                self.close_requested = true;
            }
            _ => {}
        }
        Ok(())
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: Report) {
        log::error!("{:?}", err);
        self.error.get_or_insert(err);
        event_loop.exit();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.renderer.as_ref().is_some_and(Renderer::is_started) {
            return;
        }
        if let Err(err) = self.start(event_loop) {
            self.fail(event_loop, err);
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        if self.window.as_ref().map(|window| window.id()) != Some(window_id) {
            return;
        }

        let result = match event {
            WindowEvent::CloseRequested => {
                self.close_requested = true;
                Ok(())
            }
            WindowEvent::Resized(_) | WindowEvent::ScaleFactorChanged { .. } => {
                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.request_resize();
                }
                Ok(())
            }
            WindowEvent::RedrawRequested => match self.renderer.as_mut() {
                Some(renderer) => renderer.draw_frame(),
                None => Ok(()),
            },
            WindowEvent::KeyboardInput {
                event:
                KeyEvent {
                    logical_key: key,
                    state: ElementState::Pressed,
                    ..
                },
                ..
            } => self.handle_key(key),
            _ => Ok(()),
        };

        if let Err(err) = result {
            self.fail(event_loop, err);
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.close_requested {
            event_loop.exit();
            return;
        }

        if let Some(window) = self.window.as_ref() {
            window.request_redraw();
        }
    }
}
