//! Message relay core.
//!
//! - [`job`]: relay jobs and the inbound post shape they are built from
//! - [`queue`]: the in-memory delivery queue
//! - [`gate`]: readiness gate over the shared link state
//! - [`lifecycle`]: connection state machine for the outbound transport
//! - [`destination`]: destination chat lookup on `Ready`
//! - [`dispatch`]: batched, concurrent queue drainer
//! - [`service`]: wiring, background tasks and the public handle

pub mod destination;
pub mod dispatch;
pub mod gate;
pub mod job;
pub mod lifecycle;
pub mod queue;
pub mod service;

pub use destination::resolve_destination;
pub use dispatch::{DispatchSettings, DispatchStats, Dispatcher, DrainReport, StatsSnapshot};
pub use gate::{DestinationHandle, LinkState, ReadinessGate, SharedLink};
pub use job::{
    InboundFile, InboundPost, JobKind, JobPayload, MediaKind, MediaRef, PollContent, RelayJob,
    ResolvedMedia,
};
pub use lifecycle::{
    ConnectionLifecycle, ConnectionState, LifecycleAction, LifecycleEvent, ReconnectPolicy,
};
pub use queue::{DeliveryQueue, Enqueued};
pub use service::{RelayHandle, RelayService, RelayStatus};
