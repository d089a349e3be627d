//! The audio output device and exclusive playback of reply clips

pub mod device;
pub mod playback;
pub mod rodio_output;

pub use device::{AudioOutput, SilentOutput};
pub use playback::{PlaybackController, audio_url};
pub use rodio_output::RodioOutput;
