pub mod errors;
pub mod id;
pub mod types;

pub use errors::{BrokerError, ConfigError, ProtocolError};
pub use id::{new_message_id, ChannelId};
pub use types::PageAddress;

pub type Result<T> = std::result::Result<T, BrokerError>;
