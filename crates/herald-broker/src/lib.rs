//! System message broker.
//!
//! Herald delivers typed, platform-originated messages ("system messages" —
//! an alarm firing, a push event, an app launch) to the application pages
//! that registered for them. Pages live in independently-restartable
//! processes; a destination page may or may not be running when a message is
//! sent. Messages for absent pages are queued (bounded, FIFO), and every
//! delivery attempt takes a refcounted CPU wake lock with a watchdog so a
//! page gets execution time without being able to pin the lock forever.
//!
//! All broker state is owned by a single task; [`service::BrokerHandle`] is
//! the only way in.

pub mod config;
pub mod dispatch;
pub mod lifecycle;
pub mod protocol;
pub mod registry;
pub mod service;
pub mod startup;
pub mod targets;
pub mod wakelock;

pub use config::BrokerConfig;
pub use dispatch::{AppOpener, MessageTypePolicy, OpenRequest, PermissionChecker, SendOutcome};
pub use lifecycle::AppRegistry;
pub use protocol::{Delivery, ProcessRequest};
pub use service::{Broker, BrokerHandle, Collaborators, RequestReply};
pub use targets::TargetChannel;
pub use wakelock::{PowerManager, Timer, TimerHandle, TokioTimer, WakeLock, WakeLockKey};
