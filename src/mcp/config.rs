use std::time::Duration;

use super::protocol::ProtocolVersion;

/// Runtime tunables for the session server.
#[derive(Debug, Clone)]
pub struct McpServerConfig {
    /// Deadline for HTTP-to-entity asks.
    pub request_timeout: Duration,
    /// Idle timeout for initialized sessions.
    pub session_ttl: Duration,
    /// How long a session may stay uninitialized before it is reaped.
    /// None derives ttl/10 with a one second floor.
    pub initialize_timeout: Option<Duration>,
    /// Preferred wire variant for outbound endpoint URLs.
    pub protocol_version: ProtocolVersion,
    /// Path prefix of the streamable HTTP endpoint.
    pub mcp_path: String,
    /// Path prefix of the legacy client-to-server endpoint.
    pub message_path: String,
    /// Optional URL prefix prepended to emitted endpoint URLs.
    pub base_path: String,
}

impl Default for McpServerConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            session_ttl: Duration::from_secs(300),
            initialize_timeout: None,
            protocol_version: ProtocolVersion::V20250326,
            mcp_path: "/mcp".to_string(),
            message_path: "/messages".to_string(),
            base_path: String::new(),
        }
    }
}

impl McpServerConfig {
    pub fn effective_initialize_timeout(&self) -> Duration {
        self.initialize_timeout
            .unwrap_or_else(|| (self.session_ttl / 10).max(Duration::from_secs(1)))
    }

    /// Sessions police their TTL at half the idle timeout, so an expired
    /// session is reaped within 1.5x the TTL of its last activity.
    pub fn ttl_check_interval(&self) -> Duration {
        self.session_ttl / 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialize_timeout_defaults_to_tenth_of_ttl() {
        let config = McpServerConfig {
            session_ttl: Duration::from_secs(600),
            ..Default::default()
        };
        assert_eq!(
            config.effective_initialize_timeout(),
            Duration::from_secs(60)
        );
    }

    #[test]
    fn test_initialize_timeout_has_one_second_floor() {
        let config = McpServerConfig {
            session_ttl: Duration::from_secs(5),
            ..Default::default()
        };
        assert_eq!(
            config.effective_initialize_timeout(),
            Duration::from_secs(1)
        );
    }

    #[test]
    fn test_explicit_initialize_timeout_wins() {
        let config = McpServerConfig {
            initialize_timeout: Some(Duration::from_millis(100)),
            ..Default::default()
        };
        assert_eq!(
            config.effective_initialize_timeout(),
            Duration::from_millis(100)
        );
    }
}
