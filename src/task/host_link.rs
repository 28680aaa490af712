//! Receive side of the host link.
//!
//! The receiver reads whole frames off the link and hands them to the packet
//! task by value through the `host_rx` mailbox, then raises `RX_COMPLETE`.

use alloc::format;
use embassy_time::{Instant, Timer, with_deadline, with_timeout};
use embedded_io_async::Read;

use crate::{
    codec::{Framing, HostCommand, Packet},
    config::{PacketConfig, ReceiveTimeouts},
    error::{CodecError, Error},
    notify::packet::RX_COMPLETE,
    registry::{SharedResources, TaskId},
};

/// Longest frame accepted from the host, terminator excluded.
pub const MAX_FRAME_LEN: usize = 128;

/// Frames waiting for the packet task.
pub const HOST_RX_CAPACITY: usize = 2;

pub type Frame = heapless::Vec<u8, MAX_FRAME_LEN>;

/// Reads one frame into `frame`.
///
/// Waits up to `timeouts.overall` for the first byte ([`Error::Timeout`]),
/// then at most `timeouts.inter_byte` for each following one
/// ([`Error::Stalled`]). JSON frames end at the newline, which is not
/// stored; binary frames end after a full inbound packet.
pub async fn receive_frame<R: Read>(
    link: &mut R,
    framing: Framing,
    timeouts: &ReceiveTimeouts,
    frame: &mut Frame,
) -> Result<(), Error> {
    frame.clear();
    let deadline = Instant::now() + timeouts.overall();
    let fixed_len = match framing {
        Framing::Json => None,
        Framing::Binary => Some(HostCommand::BINARY_LEN),
    };

    loop {
        let mut byte = [0u8; 1];
        let read = if frame.is_empty() {
            with_deadline(deadline, link.read(&mut byte))
                .await
                .map_err(|_| Error::Timeout)?
        } else {
            with_timeout(timeouts.inter_byte(), link.read(&mut byte))
                .await
                .map_err(|_| Error::Stalled)?
        };

        match read {
            Ok(0) | Err(_) => return Err(Error::Fail),
            Ok(_) => {}
        }

        if framing.terminator() == Some(byte[0]) {
            // Blank lines between frames.
            if frame.iter().all(|&b| b == b'\r') {
                frame.clear();
                continue;
            }
            return Ok(());
        }

        frame
            .push(byte[0])
            .map_err(|_| Error::Codec(CodecError::FrameTooLong))?;

        if fixed_len == Some(frame.len()) {
            return Ok(());
        }
    }
}

/// Host receiver task body. Never returns.
pub async fn host_receiver<R: Read>(mut link: R, resources: SharedResources, config: PacketConfig) {
    let notifier = resources.notifier(TaskId::Packet).isr_handle();
    let mut frame = Frame::new();

    loop {
        match receive_frame(&mut link, config.framing, &config.receive, &mut frame).await {
            Ok(()) => {
                if let Err(error) = resources.host_rx.try_send(frame.clone()) {
                    resources.log.warn(format!("host link: {error}")).await;
                }
                notifier.notify_from_isr(RX_COMPLETE);
            }
            // An idle host is normal.
            Err(Error::Timeout) => {}
            Err(error) => {
                resources.log.warn(format!("host link: {error}")).await;
                Timer::after(config.receive.inter_byte()).await;
            }
        }
    }
}
