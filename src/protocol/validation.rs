//! Validation of frames received from the server (RFC 6455 Section 5).
//!
//! The base rules live in [`Frame::validate`]. The validator adds the
//! control-frame rules and the configured frame size limit.

use crate::config::Limits;
use crate::error::{Error, Result};
use crate::protocol::Frame;
use crate::protocol::frame::MAX_CONTROL_FRAME_PAYLOAD;

/// Frame validator for incoming WebSocket frames.
#[derive(Debug, Clone)]
pub struct FrameValidator {
    limits: Limits,
    strict_control_frames: bool,
}

impl FrameValidator {
    /// Create a new frame validator enforcing `limits`.
    pub fn new(limits: Limits) -> Self {
        Self {
            limits,
            strict_control_frames: true,
        }
    }

    /// Enable or disable the control-frame checks (FIN set, payload <= 125).
    pub fn with_strict_control_frames(mut self, strict: bool) -> Self {
        self.strict_control_frames = strict;
        self
    }

    /// Validate an incoming frame.
    ///
    /// # Errors
    ///
    /// - Any error from [`Frame::validate`]
    /// - `Error::FragmentedControlFrame` - control frame with FIN=0
    /// - `Error::ControlFrameTooLarge` - control frame payload above 125 bytes
    /// - `Error::FrameTooLarge` - payload exceeds `limits.max_frame_size`
    pub fn validate(&self, frame: &Frame) -> Result<()> {
        frame.validate()?;

        let payload_len = frame.application_data().len();
        if self.strict_control_frames && frame.opcode.is_control() {
            if !frame.fin {
                return Err(Error::FragmentedControlFrame);
            }
            if payload_len > MAX_CONTROL_FRAME_PAYLOAD {
                return Err(Error::ControlFrameTooLarge(payload_len));
            }
        }

        self.limits.check_frame_size(payload_len as u64)
    }
}
