//! A narrow message-passing contract, standing in for whatever concrete
//! multi-process transport a real deployment would use. Only one primitive
//! matters to the coordinator/worker protocol: send a length-prefixed frame,
//! receive one back. A zero-length frame is the end-of-stream sentinel; it is
//! never a valid payload on its own, since every real message carries at
//! least one encoded record or a non-empty byte run.

use std::sync::mpsc;

use crate::error::SortError;

pub trait Transport {
    fn send_frame(&self, data: Vec<u8>) -> Result<(), SortError>;
    fn recv_frame(&self) -> Result<Vec<u8>, SortError>;
}

/// One end of an in-process, channel-backed link. Each `recv_frame` call
/// allocates a buffer sized to exactly the frame received; nothing is ever
/// reused across frames of different sizes.
pub struct ChannelTransport {
    sender: mpsc::Sender<Vec<u8>>,
    receiver: mpsc::Receiver<Vec<u8>>,
}

impl Transport for ChannelTransport {
    fn send_frame(&self, data: Vec<u8>) -> Result<(), SortError> {
        self.sender
            .send(data)
            .map_err(|_| SortError::InvariantViolation("transport: peer end was dropped".to_string()))
    }

    fn recv_frame(&self) -> Result<Vec<u8>, SortError> {
        self.receiver
            .recv()
            .map_err(|_| SortError::InvariantViolation("transport: peer end was dropped".to_string()))
    }
}

/// Build one bidirectional in-process link: `a` and `b` each see the other's
/// sends as their own receives.
pub fn channel_pair() -> (ChannelTransport, ChannelTransport) {
    let (tx_a, rx_b) = mpsc::channel();
    let (tx_b, rx_a) = mpsc::channel();
    (
        ChannelTransport { sender: tx_a, receiver: rx_a },
        ChannelTransport { sender: tx_b, receiver: rx_b },
    )
}
