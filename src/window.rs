//! Window management using winit

use std::sync::Arc;

use glam::Vec2;
use winit::{
    dpi::PhysicalSize,
    error::OsError,
    event::{ElementState, MouseButton, WindowEvent},
    event_loop::EventLoop,
    keyboard::{KeyCode, PhysicalKey},
    window::{Window as WinitWindow, WindowBuilder},
};

use crate::scene::CameraInput;

/// Keys the viewer reacts to besides movement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowCommand {
    ReloadShaders,
    NextDebugView,
    Quit,
}

/// Wrapper around winit window that tracks size and camera input
pub struct Window {
    window: Arc<WinitWindow>,
    width: u32,
    height: u32,
    resized: bool,
    input: CameraInput,
    last_cursor: Option<Vec2>,
}

impl Window {
    /// Create a new window with the given title and dimensions
    pub fn new(
        event_loop: &EventLoop<()>,
        title: &str,
        width: u32,
        height: u32,
    ) -> Result<Self, OsError> {
        let window = Arc::new(
            WindowBuilder::new()
                .with_title(title)
                .with_inner_size(PhysicalSize::new(width, height))
                .build(event_loop)?,
        );

        Ok(Self {
            window,
            width,
            height,
            resized: false,
            input: CameraInput::new(),
            last_cursor: None,
        })
    }

    /// Get arc reference to window
    pub fn window_arc(&self) -> Arc<WinitWindow> {
        Arc::clone(&self.window)
    }

    /// Get current window dimensions
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Report and clear a pending resize
    pub fn take_resize(&mut self) -> Option<(u32, u32)> {
        std::mem::take(&mut self.resized).then_some((self.width, self.height))
    }

    pub fn input(&self) -> &CameraInput {
        &self.input
    }

    pub fn input_mut(&mut self) -> &mut CameraInput {
        &mut self.input
    }

    /// Handle window events, returning a command for keys that trigger one
    pub fn handle_event(&mut self, event: &WindowEvent) -> Option<WindowCommand> {
        match event {
            WindowEvent::Resized(size) => {
                self.width = size.width;
                self.height = size.height;
                self.resized = true;
            }
            WindowEvent::CloseRequested => return Some(WindowCommand::Quit),
            WindowEvent::KeyboardInput { event, .. } => {
                let pressed = event.state == ElementState::Pressed;
                let PhysicalKey::Code(code) = event.physical_key else {
                    return None;
                };
                match code {
                    KeyCode::KeyW | KeyCode::ArrowUp => self.input.forward = pressed,
                    KeyCode::KeyS | KeyCode::ArrowDown => self.input.backward = pressed,
                    KeyCode::KeyA | KeyCode::ArrowLeft => self.input.left = pressed,
                    KeyCode::KeyD | KeyCode::ArrowRight => self.input.right = pressed,
                    KeyCode::KeyR if pressed && !event.repeat => {
                        return Some(WindowCommand::ReloadShaders)
                    }
                    KeyCode::Tab if pressed && !event.repeat => {
                        return Some(WindowCommand::NextDebugView)
                    }
                    KeyCode::Escape if pressed => return Some(WindowCommand::Quit),
                    _ => {}
                }
            }
            WindowEvent::MouseInput {
                state,
                button: MouseButton::Left,
                ..
            } => {
                self.input.mouse_look_active = *state == ElementState::Pressed;
            }
            WindowEvent::CursorMoved { position, .. } => {
                let cursor = Vec2::new(position.x as f32, position.y as f32);
                if let Some(last) = self.last_cursor {
                    self.input.mouse_delta += last - cursor;
                }
                self.last_cursor = Some(cursor);
            }
            _ => {}
        }
        None
    }

    /// Request a redraw
    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }
}
