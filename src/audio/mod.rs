pub mod levels;
pub mod media_stream;
pub mod system_source;

pub use levels::{LevelMeter, SILENCE_FLOOR_DB};
pub use media_stream::{AudioTrack, MediaStream, ReadyState, SharedStream, StreamId, TrackKind};
pub use system_source::SystemAudioCapture;
