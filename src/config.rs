use std::time::Duration;

use crate::codec::MAX_FRAME_LEN;

/// Connection and client tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Largest frame accepted from or sent to the peer, in bytes; at most
    /// 65535, the reach of the length prefix
    pub max_packet_size: usize,

    /// How long a fresh connection may stay silent before it is closed
    pub heartbeat: Duration,

    /// How long a connection may stay silent after traffic before it is closed
    pub session: Duration,

    /// How long a client waits for the reply to a confirmable request
    pub response_timeout: Duration,

    /// Idle time before TCP keep-alive probes are sent
    pub keep_alive: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_packet_size: 3000,
            heartbeat: Duration::from_secs(5),
            session: Duration::from_secs(30),
            response_timeout: Duration::from_secs(2),
            keep_alive: Duration::from_secs(15),
        }
    }
}

impl Config {
    pub fn with_max_packet_size(mut self, max_packet_size: usize) -> Self {
        self.max_packet_size = max_packet_size.min(MAX_FRAME_LEN);
        self
    }

    /// The packet limit actually enforced, even if the field was set past
    /// what a frame can carry.
    pub fn frame_limit(&self) -> usize {
        self.max_packet_size.min(MAX_FRAME_LEN)
    }

    pub fn with_heartbeat(mut self, heartbeat: Duration) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    pub fn with_session(mut self, session: Duration) -> Self {
        self.session = session;
        self
    }

    pub fn with_response_timeout(mut self, response_timeout: Duration) -> Self {
        self.response_timeout = response_timeout;
        self
    }

    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }
}
