//! winit window presenting through pixels, with gilrs gamepads.
//!
//! The event loop is pumped from [`HostPlatform::poll_events`] rather than
//! owning the thread, so the runloop keeps control of its own pacing.

use std::collections::HashSet;
use std::time::Duration;

use gilrs::{EventType, Gilrs};
use pixels::{Pixels, SurfaceTexture};
use tracing::{debug, info, warn};
use winit::application::ApplicationHandler;
use winit::dpi::LogicalSize;
use winit::event::{ElementState, WindowEvent};
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::keyboard::{KeyCode as WinitKeyCode, PhysicalKey};
use winit::platform::pump_events::{EventLoopExtPumpEvents, PumpStatus};
use winit::window::{Fullscreen, Window, WindowAttributes, WindowId};

use emu_core::KeyCode;

use crate::error::{HostError, StartupError};
use crate::input::GamepadButton;
use crate::runloop::{HostEvent, HostPlatform};
use crate::surface::{Frame, Viewport};

/// How long `open` keeps pumping while waiting for the window to appear.
const OPEN_TIMEOUT: Duration = Duration::from_secs(2);
const OPEN_PUMP_SLICE: Duration = Duration::from_millis(10);

/// Window state driven by winit callbacks.
struct App {
    title: String,
    viewport: Viewport,
    fullscreen: bool,
    window: Option<&'static Window>,
    pixels: Option<Pixels<'static>>,
    events: Vec<HostEvent>,
    held: HashSet<WinitKeyCode>,
    error: Option<String>,
}

impl App {
    fn handle_key(&mut self, keycode: WinitKeyCode, pressed: bool) {
        if pressed && keycode == WinitKeyCode::Escape {
            self.events.push(HostEvent::Quit);
            return;
        }
        // Key repeat arrives as more presses; only edges matter here.
        let changed = if pressed {
            self.held.insert(keycode)
        } else {
            self.held.remove(&keycode)
        };
        if !changed {
            return;
        }
        if let Some(code) = convert_keycode(keycode) {
            self.events.push(HostEvent::Key { code, pressed });
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let (width, height) = self.viewport.window_size();
        let mut attrs = WindowAttributes::default()
            .with_title(self.title.clone())
            .with_inner_size(LogicalSize::new(width, height));
        if self.fullscreen {
            attrs = attrs.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }

        match event_loop.create_window(attrs) {
            Ok(window) => {
                // Lives as long as the process; pixels needs a 'static handle.
                let window: &'static Window = Box::leak(Box::new(window));
                let inner = window.inner_size();
                let surface = SurfaceTexture::new(inner.width, inner.height, window);
                match Pixels::new(self.viewport.width, self.viewport.height, surface) {
                    Ok(pixels) => self.pixels = Some(pixels),
                    Err(e) => {
                        self.error = Some(format!("failed to create pixels: {e}"));
                        event_loop.exit();
                        return;
                    }
                }
                self.window = Some(window);
            }
            Err(e) => {
                self.error = Some(format!("failed to create window: {e}"));
                event_loop.exit();
            }
        }
    }

    fn window_event(
        &mut self,
        _event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                self.events.push(HostEvent::Quit);
            }
            WindowEvent::Resized(size) => {
                if size.width > 0 && size.height > 0 {
                    if let Some(pixels) = self.pixels.as_mut() {
                        if let Err(e) = pixels.resize_surface(size.width, size.height) {
                            warn!("surface resize failed: {e}");
                        }
                    }
                }
            }
            WindowEvent::Focused(false) => {
                // Keys released while unfocused never reach us.
                for keycode in std::mem::take(&mut self.held) {
                    if let Some(code) = convert_keycode(keycode) {
                        self.events.push(HostEvent::Key {
                            code,
                            pressed: false,
                        });
                    }
                }
            }
            WindowEvent::KeyboardInput { event, .. } => {
                if let PhysicalKey::Code(keycode) = event.physical_key {
                    self.handle_key(keycode, event.state == ElementState::Pressed);
                }
            }
            _ => {}
        }
    }
}

/// The desktop [`HostPlatform`].
pub struct WindowPlatform {
    event_loop: EventLoop<()>,
    app: App,
    gilrs: Option<Gilrs>,
}

impl WindowPlatform {
    /// Create the window and its framebuffer.
    pub fn open(title: &str, viewport: Viewport, fullscreen: bool) -> Result<Self, StartupError> {
        let mut event_loop = EventLoop::new()
            .map_err(|e| StartupError::Video(format!("failed to create event loop: {e}")))?;
        let mut app = App {
            title: title.to_string(),
            viewport,
            fullscreen,
            window: None,
            pixels: None,
            events: Vec::new(),
            held: HashSet::new(),
            error: None,
        };

        // The window is created on the first `resumed`, which needs a pump.
        let mut waited = Duration::ZERO;
        while app.pixels.is_none() {
            let status = event_loop.pump_app_events(Some(OPEN_PUMP_SLICE), &mut app);
            if let Some(err) = app.error.take() {
                return Err(StartupError::Video(err));
            }
            if let PumpStatus::Exit(code) = status {
                return Err(StartupError::Video(format!(
                    "event loop exited during startup ({code})"
                )));
            }
            waited += OPEN_PUMP_SLICE;
            if waited >= OPEN_TIMEOUT && app.pixels.is_none() {
                return Err(StartupError::Video("window was never created".into()));
            }
        }

        let gilrs = match Gilrs::new() {
            Ok(gilrs) => Some(gilrs),
            Err(e) => {
                warn!("gamepad support unavailable: {e}");
                None
            }
        };

        info!(
            width = viewport.width,
            height = viewport.height,
            scale = viewport.scale,
            fullscreen,
            "window open"
        );
        Ok(Self {
            event_loop,
            app,
            gilrs,
        })
    }

    fn poll_gamepads(&mut self, events: &mut Vec<HostEvent>) {
        let Some(gilrs) = self.gilrs.as_mut() else {
            return;
        };
        while let Some(gilrs::Event { id, event, .. }) = gilrs.next_event() {
            let (button, pressed) = match event {
                EventType::ButtonPressed(button, _) => (button, true),
                EventType::ButtonReleased(button, _) => (button, false),
                EventType::Connected => {
                    debug!(?id, "gamepad connected");
                    continue;
                }
                EventType::Disconnected => {
                    debug!(?id, "gamepad disconnected");
                    continue;
                }
                _ => continue,
            };
            if let Some(button) = convert_gamepad_button(button) {
                events.push(HostEvent::Gamepad { button, pressed });
            }
        }
    }
}

impl HostPlatform for WindowPlatform {
    fn poll_events(&mut self, events: &mut Vec<HostEvent>) -> Result<(), HostError> {
        let status = self
            .event_loop
            .pump_app_events(Some(Duration::ZERO), &mut self.app);
        if let Some(err) = self.app.error.take() {
            return Err(HostError::Poll(err));
        }
        events.append(&mut self.app.events);
        if let PumpStatus::Exit(_) = status {
            events.push(HostEvent::Quit);
        }
        self.poll_gamepads(events);
        Ok(())
    }

    fn present(&mut self, frame: &Frame) -> Result<(), HostError> {
        let Some(pixels) = self.app.pixels.as_mut() else {
            return Err(HostError::Present("no framebuffer".into()));
        };

        let expected = frame.width as usize * frame.height as usize * 4;
        if pixels.frame().len() != expected {
            pixels
                .resize_buffer(frame.width, frame.height)
                .map_err(|e| HostError::Present(format!("buffer resize failed: {e}")))?;
        }
        let target = pixels.frame_mut();
        if target.len() != frame.pixels.len() {
            return Err(HostError::Present(format!(
                "frame {} has {} bytes, framebuffer has {}",
                frame.seq,
                frame.pixels.len(),
                target.len()
            )));
        }
        target.copy_from_slice(&frame.pixels);

        pixels
            .render()
            .map_err(|e| HostError::Present(format!("render failed: {e}")))
    }
}

fn convert_gamepad_button(button: gilrs::Button) -> Option<GamepadButton> {
    match button {
        gilrs::Button::South => Some(GamepadButton::South),
        gilrs::Button::East => Some(GamepadButton::East),
        gilrs::Button::North => Some(GamepadButton::North),
        gilrs::Button::West => Some(GamepadButton::West),
        gilrs::Button::LeftTrigger => Some(GamepadButton::LeftTrigger),
        gilrs::Button::RightTrigger => Some(GamepadButton::RightTrigger),
        gilrs::Button::LeftTrigger2 => Some(GamepadButton::LeftTrigger2),
        gilrs::Button::RightTrigger2 => Some(GamepadButton::RightTrigger2),
        gilrs::Button::Select => Some(GamepadButton::Select),
        gilrs::Button::Start => Some(GamepadButton::Start),
        gilrs::Button::DPadUp => Some(GamepadButton::DPadUp),
        gilrs::Button::DPadDown => Some(GamepadButton::DPadDown),
        gilrs::Button::DPadLeft => Some(GamepadButton::DPadLeft),
        gilrs::Button::DPadRight => Some(GamepadButton::DPadRight),
        _ => None,
    }
}

/// Convert winit KeyCode to our internal KeyCode.
fn convert_keycode(keycode: WinitKeyCode) -> Option<KeyCode> {
    match keycode {
        // Letters
        WinitKeyCode::KeyA => Some(KeyCode::KeyA),
        WinitKeyCode::KeyB => Some(KeyCode::KeyB),
        WinitKeyCode::KeyC => Some(KeyCode::KeyC),
        WinitKeyCode::KeyD => Some(KeyCode::KeyD),
        WinitKeyCode::KeyE => Some(KeyCode::KeyE),
        WinitKeyCode::KeyF => Some(KeyCode::KeyF),
        WinitKeyCode::KeyG => Some(KeyCode::KeyG),
        WinitKeyCode::KeyH => Some(KeyCode::KeyH),
        WinitKeyCode::KeyI => Some(KeyCode::KeyI),
        WinitKeyCode::KeyJ => Some(KeyCode::KeyJ),
        WinitKeyCode::KeyK => Some(KeyCode::KeyK),
        WinitKeyCode::KeyL => Some(KeyCode::KeyL),
        WinitKeyCode::KeyM => Some(KeyCode::KeyM),
        WinitKeyCode::KeyN => Some(KeyCode::KeyN),
        WinitKeyCode::KeyO => Some(KeyCode::KeyO),
        WinitKeyCode::KeyP => Some(KeyCode::KeyP),
        WinitKeyCode::KeyQ => Some(KeyCode::KeyQ),
        WinitKeyCode::KeyR => Some(KeyCode::KeyR),
        WinitKeyCode::KeyS => Some(KeyCode::KeyS),
        WinitKeyCode::KeyT => Some(KeyCode::KeyT),
        WinitKeyCode::KeyU => Some(KeyCode::KeyU),
        WinitKeyCode::KeyV => Some(KeyCode::KeyV),
        WinitKeyCode::KeyW => Some(KeyCode::KeyW),
        WinitKeyCode::KeyX => Some(KeyCode::KeyX),
        WinitKeyCode::KeyY => Some(KeyCode::KeyY),
        WinitKeyCode::KeyZ => Some(KeyCode::KeyZ),

        // Numbers
        WinitKeyCode::Digit0 => Some(KeyCode::Digit0),
        WinitKeyCode::Digit1 => Some(KeyCode::Digit1),
        WinitKeyCode::Digit2 => Some(KeyCode::Digit2),
        WinitKeyCode::Digit3 => Some(KeyCode::Digit3),
        WinitKeyCode::Digit4 => Some(KeyCode::Digit4),
        WinitKeyCode::Digit5 => Some(KeyCode::Digit5),
        WinitKeyCode::Digit6 => Some(KeyCode::Digit6),
        WinitKeyCode::Digit7 => Some(KeyCode::Digit7),
        WinitKeyCode::Digit8 => Some(KeyCode::Digit8),
        WinitKeyCode::Digit9 => Some(KeyCode::Digit9),

        // Modifiers
        WinitKeyCode::ShiftLeft => Some(KeyCode::ShiftLeft),
        WinitKeyCode::ShiftRight => Some(KeyCode::ShiftRight),
        WinitKeyCode::ControlLeft => Some(KeyCode::ControlLeft),
        WinitKeyCode::ControlRight => Some(KeyCode::ControlRight),
        WinitKeyCode::AltLeft => Some(KeyCode::AltLeft),
        WinitKeyCode::AltRight => Some(KeyCode::AltRight),

        // Special
        WinitKeyCode::Enter => Some(KeyCode::Enter),
        WinitKeyCode::Space => Some(KeyCode::Space),
        WinitKeyCode::Backspace => Some(KeyCode::Backspace),
        WinitKeyCode::Tab => Some(KeyCode::Tab),

        // Arrow keys
        WinitKeyCode::ArrowUp => Some(KeyCode::ArrowUp),
        WinitKeyCode::ArrowDown => Some(KeyCode::ArrowDown),
        WinitKeyCode::ArrowLeft => Some(KeyCode::ArrowLeft),
        WinitKeyCode::ArrowRight => Some(KeyCode::ArrowRight),

        // Function keys
        WinitKeyCode::F1 => Some(KeyCode::F1),
        WinitKeyCode::F2 => Some(KeyCode::F2),
        WinitKeyCode::F3 => Some(KeyCode::F3),
        WinitKeyCode::F4 => Some(KeyCode::F4),
        WinitKeyCode::F5 => Some(KeyCode::F5),
        WinitKeyCode::F6 => Some(KeyCode::F6),
        WinitKeyCode::F7 => Some(KeyCode::F7),
        WinitKeyCode::F8 => Some(KeyCode::F8),
        WinitKeyCode::F9 => Some(KeyCode::F9),
        WinitKeyCode::F10 => Some(KeyCode::F10),
        WinitKeyCode::F11 => Some(KeyCode::F11),
        WinitKeyCode::F12 => Some(KeyCode::F12),

        _ => None,
    }
}
