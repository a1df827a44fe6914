//! Splits the receive byte stream into text command frames and register RPC frames.

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::channel::Channel;
use embassy_time::{Duration, Timer, with_timeout};
use heapless::Vec;

use crate::byte_queue::ByteQueue;
use crate::config::{Config, FRAME_QUEUE_DEPTH, RPC_FRAME_MAX_LEN, TEXT_FRAME_MAX_LEN};
use crate::crc::{self, ModbusCrc};
use crate::modbus;

/// Text command, CRLF terminator included.
pub type TextFrame = Vec<u8, TEXT_FRAME_MAX_LEN>;
/// Checksum-verified RPC request with the checksum removed.
pub type RpcFrame = Vec<u8, RPC_FRAME_MAX_LEN>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(TextFrame),
    Rpc(RpcFrame),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    /// First byte was `A`; the second decides.
    Pending,
    Text,
    Rpc,
}

/// Frame reassembly state. Feed it one byte at a time.
pub struct FrameDemux {
    buf: Vec<u8, TEXT_FRAME_MAX_LEN>,
    kind: Kind,
}

impl FrameDemux {
    pub const fn new() -> Self {
        Self {
            buf: Vec::new(),
            kind: Kind::Pending,
        }
    }

    fn reset(&mut self) {
        self.buf.clear();
        self.kind = Kind::Pending;
    }

    fn limit(&self) -> usize {
        match self.kind {
            Kind::Text => TEXT_FRAME_MAX_LEN,
            Kind::Pending | Kind::Rpc => RPC_FRAME_MAX_LEN,
        }
    }

    /// Appends one byte and returns a frame when it completes one.
    pub fn push(&mut self, byte: u8) -> Option<Frame> {
        if self.buf.len() >= self.limit() {
            warn!("demux: frame buffer overflow, {} bytes dropped", self.buf.len());
            self.reset();
        }
        // The limit check above keeps a free slot.
        let _ = self.buf.push(byte);

        match self.buf.len() {
            1 => self.kind = if byte == b'A' { Kind::Pending } else { Kind::Rpc },
            2 if self.kind == Kind::Pending => {
                self.kind = if byte == b'T' { Kind::Text } else { Kind::Rpc };
            }
            _ => {}
        }

        match self.kind {
            Kind::Pending => None,
            Kind::Text => self.complete_text(),
            Kind::Rpc => self.complete_rpc(),
        }
    }

    fn complete_text(&mut self) -> Option<Frame> {
        if !self.buf.ends_with(b"\r\n") {
            return None;
        }
        let frame = self.buf.clone();
        self.reset();
        trace!("demux: text frame, {} bytes", frame.len());
        Some(Frame::Text(frame))
    }

    fn complete_rpc(&mut self) -> Option<Frame> {
        if self.buf.len() < 4 {
            return None;
        }
        let expected = modbus::expected_len(&self.buf)?;
        if expected > RPC_FRAME_MAX_LEN {
            warn!("demux: rpc frame of {} bytes exceeds buffer", expected);
            self.reset();
            return None;
        }
        if self.buf.len() < expected {
            return None;
        }

        let frame = if crc::verify(&self.buf) {
            let body = &self.buf[..self.buf.len() - ModbusCrc::LENGTH];
            RpcFrame::from_slice(body).ok().map(Frame::Rpc)
        } else {
            debug!("demux: rpc checksum mismatch, {} bytes dropped", self.buf.len());
            None
        };
        self.reset();
        frame
    }
}

impl Default for FrameDemux {
    fn default() -> Self {
        Self::new()
    }
}

/// Outbound frame queues, one per consumer.
pub struct FrameQueues<M: RawMutex> {
    pub text: Channel<M, TextFrame, FRAME_QUEUE_DEPTH>,
    pub rpc: Channel<M, RpcFrame, FRAME_QUEUE_DEPTH>,
}

impl<M: RawMutex> FrameQueues<M> {
    pub const fn new() -> Self {
        Self {
            text: Channel::new(),
            rpc: Channel::new(),
        }
    }

    /// Queues a frame, dropping it if its queue stays full for `timeout`.
    pub async fn dispatch(&self, frame: Frame, timeout: Duration) {
        let sent = match frame {
            Frame::Text(frame) => with_timeout(timeout, self.text.send(frame)).await,
            Frame::Rpc(frame) => with_timeout(timeout, self.rpc.send(frame)).await,
        };
        if sent.is_err() {
            warn!("demux: frame queue full, frame dropped");
        }
    }
}

impl<M: RawMutex> Default for FrameQueues<M> {
    fn default() -> Self {
        Self::new()
    }
}

/// Drains `bytes` into frames forever, sleeping `demux_poll` whenever the queue is empty.
pub async fn run_demux<M: RawMutex, const N: usize>(
    bytes: &ByteQueue<N>,
    queues: &FrameQueues<M>,
    config: Config,
) -> ! {
    let mut demux = FrameDemux::new();
    let mut chunk = [0u8; 16];
    loop {
        let n = bytes.read_many(&mut chunk);
        if n == 0 {
            Timer::after(config.demux_poll).await;
            continue;
        }
        for &byte in &chunk[..n] {
            if let Some(frame) = demux.push(byte) {
                queues.dispatch(frame, config.frame_send_timeout).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_futures::block_on;
    use embassy_futures::select::{Either, select};
    use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;

    fn feed(demux: &mut FrameDemux, bytes: &[u8]) -> std::vec::Vec<Frame> {
        bytes.iter().filter_map(|&b| demux.push(b)).collect()
    }

    fn with_crc(body: &[u8]) -> std::vec::Vec<u8> {
        let mut frame = body.to_vec();
        frame.extend_from_slice(&ModbusCrc::compute(body).to_le_bytes());
        frame
    }

    #[test]
    fn text_frame_keeps_terminator() {
        let mut demux = FrameDemux::new();
        let frames = feed(&mut demux, b"AT+STATUS?\r\n");
        assert_eq!(frames.len(), 1);
        match &frames[0] {
            Frame::Text(text) => assert_eq!(&text[..], b"AT+STATUS?\r\n"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn rpc_frame_is_stripped_of_checksum() {
        let mut demux = FrameDemux::new();
        let frames = feed(&mut demux, &with_crc(&[0x01, 0x03, 0x00, 0x07, 0x00, 0x02]));
        assert_eq!(
            frames,
            [Frame::Rpc(
                RpcFrame::from_slice(&[0x01, 0x03, 0x00, 0x07, 0x00, 0x02]).unwrap()
            )]
        );
    }

    #[test]
    fn write_frame_length_follows_byte_count() {
        let mut demux = FrameDemux::new();
        let body = [0x01, 0x10, 0x00, 0x07, 0x00, 0x02, 0x04, 0x00, 0x01, 0x00, 0x02];
        let wire = with_crc(&body);
        let frames = feed(&mut demux, &wire[..wire.len() - 1]);
        assert!(frames.is_empty());
        let frames = feed(&mut demux, &wire[wire.len() - 1..]);
        assert_eq!(frames, [Frame::Rpc(RpcFrame::from_slice(&body).unwrap())]);
    }

    #[test]
    fn corrupted_rpc_frames_are_dropped() {
        let wire = with_crc(&[0x01, 0x03, 0x00, 0x07, 0x00, 0x02]);
        for byte in 0..wire.len() {
            for bit in 0..8 {
                let mut corrupted = wire.clone();
                corrupted[byte] ^= 1 << bit;
                let mut demux = FrameDemux::new();
                let frames = feed(&mut demux, &corrupted);
                assert!(
                    frames.iter().all(|f| !matches!(f, Frame::Rpc(_))),
                    "byte {} bit {}",
                    byte,
                    bit
                );
            }
        }
    }

    #[test]
    fn frames_interleave_in_order() {
        let mut demux = FrameDemux::new();
        let mut stream = b"AT\r\n".to_vec();
        stream.extend(with_crc(&[0x01, 0x03, 0x00, 0x08, 0x00, 0x01]));
        stream.extend_from_slice(b"AT+POWER=1\r\n");
        let frames = feed(&mut demux, &stream);
        assert_eq!(frames.len(), 3);
        assert!(matches!(&frames[0], Frame::Text(t) if &t[..] == b"AT\r\n"));
        assert!(matches!(&frames[1], Frame::Rpc(r) if r[3] == 0x08));
        assert!(matches!(&frames[2], Frame::Text(t) if &t[..] == b"AT+POWER=1\r\n"));
    }

    #[test]
    fn unterminated_text_overflows_and_recovers() {
        let mut demux = FrameDemux::new();
        let mut stream = b"AT".to_vec();
        stream.extend(core::iter::repeat_n(b'x', TEXT_FRAME_MAX_LEN - 2));
        assert!(feed(&mut demux, &stream).is_empty());

        let frames = feed(&mut demux, b"AT\r\n");
        assert_eq!(frames, [Frame::Text(TextFrame::from_slice(b"AT\r\n").unwrap())]);
    }

    #[test]
    fn oversized_write_is_discarded() {
        let mut demux = FrameDemux::new();
        // Byte count 200 cannot fit the frame buffer.
        assert!(feed(&mut demux, &[0x01, 0x10, 0x00, 0x00, 0x00, 0x64, 200]).is_empty());
        let frames = feed(&mut demux, b"AT\r\n");
        assert_eq!(frames, [Frame::Text(TextFrame::from_slice(b"AT\r\n").unwrap())]);
    }

    #[test]
    fn full_queue_drops_newest_after_timeout() {
        let queues: FrameQueues<CriticalSectionRawMutex> = FrameQueues::new();
        block_on(async {
            for i in 0..FRAME_QUEUE_DEPTH + 2 {
                let frame = RpcFrame::from_slice(&[i as u8, 0x03]).unwrap();
                queues
                    .dispatch(Frame::Rpc(frame), Duration::from_millis(1))
                    .await;
            }
            assert_eq!(queues.rpc.len(), FRAME_QUEUE_DEPTH);
            assert_eq!(queues.rpc.try_receive().unwrap()[0], 0);
        });
    }

    #[test]
    fn run_demux_moves_bytes_to_queues() {
        let bytes: ByteQueue<64> = ByteQueue::new();
        let queues: FrameQueues<CriticalSectionRawMutex> = FrameQueues::new();
        for &b in b"AT+LEVEL?\r\n" {
            bytes.write_from_interrupt(b).unwrap();
        }
        let config = Config::default();
        block_on(async {
            let pump = run_demux(&bytes, &queues, config);
            let text = queues.text.receive();
            let Either::Second(frame) = select(pump, text).await;
            assert_eq!(&frame[..], b"AT+LEVEL?\r\n");
        });
    }
}
