//! Configuration and limits for WebSocket client connections.

use std::time::Duration;

/// Resource limits for a connection.
///
/// These bound the memory a misbehaving server can make the client allocate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    /// Maximum payload size of a single received frame in bytes.
    ///
    /// Default: 16 MB (16 * 1024 * 1024)
    pub max_frame_size: usize,

    /// Maximum size of a reassembled message in bytes.
    ///
    /// Default: 64 MB (64 * 1024 * 1024)
    pub max_message_size: usize,

    /// Maximum size of the handshake response in bytes.
    ///
    /// Default: 8 KB (8192)
    pub max_handshake_size: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_frame_size: 16 * 1024 * 1024,   // 16 MB
            max_message_size: 64 * 1024 * 1024, // 64 MB
            max_handshake_size: 8192,
        }
    }
}

impl Limits {
    /// Create new limits with custom values.
    #[must_use]
    pub const fn new(
        max_frame_size: usize,
        max_message_size: usize,
        max_handshake_size: usize,
    ) -> Self {
        Self {
            max_frame_size,
            max_message_size,
            max_handshake_size,
        }
    }

    /// Create limits suitable for small embedded systems.
    ///
    /// - Max frame: 64 KB
    /// - Max message: 256 KB
    /// - Max handshake: 4 KB
    #[must_use]
    pub const fn embedded() -> Self {
        Self {
            max_frame_size: 64 * 1024,
            max_message_size: 256 * 1024,
            max_handshake_size: 4096,
        }
    }

    /// Validate that a declared frame payload size is within limits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FrameTooLarge`](crate::Error::FrameTooLarge) if `size` exceeds the configured maximum.
    pub const fn check_frame_size(&self, size: u64) -> Result<(), crate::Error> {
        if size > self.max_frame_size as u64 {
            Err(crate::Error::FrameTooLarge {
                size,
                max: self.max_frame_size,
            })
        } else {
            Ok(())
        }
    }

    /// Validate that message size is within limits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MessageTooLarge`](crate::Error::MessageTooLarge) if `size` exceeds the configured maximum.
    pub const fn check_message_size(&self, size: usize) -> Result<(), crate::Error> {
        if size > self.max_message_size {
            Err(crate::Error::MessageTooLarge {
                size,
                max: self.max_message_size,
            })
        } else {
            Ok(())
        }
    }

    /// Validate that handshake size is within limits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HandshakeTooLarge`](crate::Error::HandshakeTooLarge) if `size` exceeds the configured maximum.
    pub const fn check_handshake_size(&self, size: usize) -> Result<(), crate::Error> {
        if size > self.max_handshake_size {
            Err(crate::Error::HandshakeTooLarge {
                size,
                max: self.max_handshake_size,
            })
        } else {
            Ok(())
        }
    }
}

/// Timeout configuration, enforced by the transport drivers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timeouts {
    /// Maximum time to complete the opening handshake.
    ///
    /// Default: 5 seconds
    pub handshake: Duration,

    /// Maximum time to wait for the peer's close frame after sending ours,
    /// and for our echo to flush after receiving theirs.
    ///
    /// Default: 5 seconds
    pub close: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            handshake: Duration::from_secs(5),
            close: Duration::from_secs(5),
        }
    }
}

impl Timeouts {
    /// Create new timeouts with custom values.
    #[must_use]
    pub const fn new(handshake: Duration, close: Duration) -> Self {
        Self { handshake, close }
    }
}

/// How fragmented text messages are turned into a `String`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextDecoding {
    /// Concatenate the raw fragment bytes, then decode once. Invalid UTF-8
    /// is a protocol error.
    #[default]
    WholeMessage,
    /// Decode each fragment on its own (lossily) and concatenate the text.
    /// A character split across two fragments is replaced with U+FFFD.
    PerFragment,
}

/// WebSocket client connection configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Resource limits.
    pub limits: Limits,

    /// Handshake and close timeouts.
    pub timeouts: Timeouts,

    /// Default fragment size for outgoing binary messages (bytes) and text
    /// messages (characters). `None` sends every message in one frame.
    ///
    /// Default: `None`
    pub fragment_size: Option<usize>,

    /// Reply to every received ping with a pong carrying the same data.
    ///
    /// Default: true
    pub auto_pong: bool,

    /// Echo the server's close frame back when it initiates the close.
    ///
    /// Default: true
    pub echo_close: bool,

    /// Text reassembly policy.
    pub text_decoding: TextDecoding,

    /// Reject fragmented or oversized control frames.
    ///
    /// Default: true
    pub strict_control_frames: bool,

    /// Size of each read from the transport in bytes.
    ///
    /// Default: 8 KB (8192)
    pub read_buffer_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            limits: Limits::default(),
            timeouts: Timeouts::default(),
            fragment_size: None,
            auto_pong: true,
            echo_close: true,
            text_decoding: TextDecoding::default(),
            strict_control_frames: true,
            read_buffer_size: 8192,
        }
    }
}

impl Config {
    /// Create a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set custom limits.
    #[must_use]
    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Set custom timeouts.
    #[must_use]
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Set the handshake timeout.
    #[must_use]
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.handshake = timeout;
        self
    }

    /// Set the close timeout.
    #[must_use]
    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.close = timeout;
        self
    }

    /// Set the default outgoing fragment size.
    #[must_use]
    pub fn with_fragment_size(mut self, size: Option<usize>) -> Self {
        self.fragment_size = size.map(|s| s.max(1));
        self
    }

    /// Enable or disable automatic pong replies.
    #[must_use]
    pub fn with_auto_pong(mut self, enabled: bool) -> Self {
        self.auto_pong = enabled;
        self
    }

    /// Enable or disable echoing the server's close frame.
    #[must_use]
    pub fn with_echo_close(mut self, enabled: bool) -> Self {
        self.echo_close = enabled;
        self
    }

    /// Choose the text reassembly policy.
    #[must_use]
    pub fn with_text_decoding(mut self, decoding: TextDecoding) -> Self {
        self.text_decoding = decoding;
        self
    }

    /// Enable or disable the control-frame checks.
    #[must_use]
    pub fn with_strict_control_frames(mut self, strict: bool) -> Self {
        self.strict_control_frames = strict;
        self
    }

    /// Set the read buffer size (at least 1 byte).
    #[must_use]
    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.max(1);
        self
    }
}
