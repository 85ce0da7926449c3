//! WebSocket protocol core (RFC 6455), free of any I/O.
//!
//! Bytes flow through [`FrameReassembler`] (or [`reader::read_frame`] on a
//! blocking source) into [`Frame`]s, which [`FrameValidator`] checks and
//! [`MessageAssembler`] joins into messages.

pub mod assembler;
pub mod control;
pub mod frame;
pub mod handshake;
pub mod mask;
pub mod opcode;
pub mod reader;
pub mod reassembler;
pub mod validation;

pub use assembler::{Message, MessageAssembler};
pub use control::{CloseCode, CloseFrame, PingFrame, PongFrame};
pub use frame::Frame;
pub use handshake::{
    HandshakeKey, HandshakeRequest, HandshakeResponse, WS_GUID, compute_accept_key,
};
pub use mask::{apply_mask, apply_mask_fast};
pub use opcode::OpCode;
pub use reassembler::{FrameReassembler, reassemble};
pub use validation::FrameValidator;
