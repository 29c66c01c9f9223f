//! Exit node routing: discovery, interface detection, rule installation and
//! the mode state machine that ties them together.

pub mod background;
pub mod exit_nodes;
pub mod interfaces;
pub mod mode;
pub mod restore;
pub mod routing;
pub mod state;

pub use exit_nodes::{DirectoryError, ExitNode, ExitNodeDirectory, ExitNodeMap};
pub use interfaces::{InterfaceDetector, InterfaceError};
pub use mode::{Mode, ModeError, ModeStore};
pub use restore::{restore_previous_mode, RestoreOutcome, RestorePolicy};
pub use routing::{RoutingConfigurator, RoutingError, RoutingSettings};
pub use state::{RouterState, StatusSnapshot};
