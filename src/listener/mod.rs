//! Listener side: status polling, playback and recovery UI state.

pub mod banner;
#[cfg(unix)]
pub mod mpv_output;
pub mod playback;
pub mod poller;
pub mod session;
pub mod status;

pub use banner::{RecoveryBanner, RecoveryDebouncer};
#[cfg(unix)]
pub use mpv_output::MpvOutput;
pub use playback::{
    MediaFault, MediaOutput, PlaybackEngine, PlaybackError, PlaybackSession, PlaybackState,
};
pub use poller::{PollSnapshot, StatusPoller};
pub use session::{ListenerSession, ListenerSettings};
pub use status::{
    normalize_stream_url, BroadcastStreamStatus, HttpStatusClient, ServerState, StatusClient,
    StatusError, StreamMetadata,
};
