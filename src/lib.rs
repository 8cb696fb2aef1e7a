pub mod client;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod logger;
pub mod media;
pub mod peer;
pub mod projection;
pub mod signaling;
pub mod sync;
pub mod utils;

pub use client::StreamClient;
pub use config::CoordinatorConfig;
pub use error::{CoordinatorError, Result};
pub use lifecycle::{Collaborators, Coordinator, OpenOutcome};
pub use media::{CaptureDevice, MediaHandle, PermissionState, SampleCaptureDevice};
pub use peer::state::SlotStatus;
pub use projection::{ChannelStatus, LogProjection, NullProjection, Projection, SlotView};
pub use signaling::{HttpSignaling, SignalingApi};
pub use sync::{PushConnector, PushSubscription, StateSync, WsPushConnector};
