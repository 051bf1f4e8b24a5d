use std::path::PathBuf;

use crate::id::ChannelId;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("config parse error: {0}")]
    ParseError(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("channel {channel} does not host {manifest_url} / {page_url}")]
    ManifestMismatch {
        channel: ChannelId,
        manifest_url: String,
        page_url: String,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("broker is shut down")]
    ChannelClosed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_display() {
        let err = ConfigError::FileNotFound(PathBuf::from("/tmp/missing.toml"));
        assert_eq!(err.to_string(), "config file not found: /tmp/missing.toml");

        let err = ConfigError::ParseError("unexpected token".into());
        assert_eq!(err.to_string(), "config parse error: unexpected token");
    }

    #[test]
    fn protocol_error_display() {
        let err = ProtocolError::ManifestMismatch {
            channel: ChannelId(7),
            manifest_url: "https://x/manifest.json".into(),
            page_url: "/index.html".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("channel 7"));
        assert!(msg.contains("https://x/manifest.json"));
    }

    #[test]
    fn broker_error_from_config() {
        let config_err = ConfigError::ParseError("bad toml".into());
        let broker_err: BrokerError = config_err.into();
        assert!(matches!(broker_err, BrokerError::Config(_)));
        assert!(broker_err.to_string().contains("bad toml"));
    }

    #[test]
    fn broker_error_from_protocol() {
        let proto_err = ProtocolError::ManifestMismatch {
            channel: ChannelId(1),
            manifest_url: "https://a/m.json".into(),
            page_url: "/a".into(),
        };
        let broker_err: BrokerError = proto_err.into();
        assert!(matches!(broker_err, BrokerError::Protocol(_)));
    }
}
