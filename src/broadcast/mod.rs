//! DJ side: outbound transport, control panel, source switching.

pub mod aircheck;
pub mod control_panel;
pub mod coordinator;
pub mod session;
pub mod transport;

pub use aircheck::AircheckTransport;
pub use control_panel::{ControlError, ControlPanel, ControlPanelState};
pub use coordinator::{SwitchCoordinator, SwitchError, SwitchPhase, SwitchReport, SwitchStatus};
pub use session::BroadcastSession;
pub use transport::{OutboundTransport, OutputNode, TransportError};
