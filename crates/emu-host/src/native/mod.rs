//! Desktop platform: winit window, pixels framebuffer, gilrs gamepads and a
//! cpal output stream.

mod audio;
mod window;

pub use audio::AudioOutput;
pub use window::WindowPlatform;
