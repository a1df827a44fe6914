//! Register RPC server speaking the Modbus RTU subset the app uses.
//!
//! Request frames arrive checksum-verified and with the checksum stripped. Replies are built
//! here, checksum appended, and handed to the serial link.

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::channel::Receiver;
use heapless::Vec;

use crate::config::{FRAME_QUEUE_DEPTH, RPC_FRAME_MAX_LEN};
use crate::control::ControlSurface;
use crate::crc::ModbusCrc;
use crate::demux::RpcFrame;
use crate::hardware::traits::{Clock, SerialLink};
use crate::registers::{Exception, RegisterId};

pub const FN_READ_HOLDING: u8 = 0x03;
pub const FN_WRITE_MULTIPLE: u8 = 0x10;

/// Read request on the wire: address, function, start, count, checksum.
pub const READ_REQUEST_LEN: usize = 8;
/// Write request header before the payload: address, function, start, count, byte count.
pub const WRITE_HEADER_LEN: usize = 7;

const EXCEPTION_FLAG: u8 = 0x80;

/// Reply frame, checksum included.
pub type Reply = Vec<u8, RPC_FRAME_MAX_LEN>;

/// Total on-wire length of the frame starting in `head`, once enough of it is known.
///
/// Returns `None` while the header is still too short to tell. Unknown function codes are
/// given the longest frame the link accepts.
pub fn expected_len(head: &[u8]) -> Option<usize> {
    match *head.get(1)? {
        FN_READ_HOLDING => Some(READ_REQUEST_LEN),
        FN_WRITE_MULTIPLE => {
            let byte_count = usize::from(*head.get(WRITE_HEADER_LEN - 1)?);
            Some(WRITE_HEADER_LEN + byte_count + ModbusCrc::LENGTH)
        }
        _ => Some(RPC_FRAME_MAX_LEN),
    }
}

fn be16(bytes: &[u8], at: usize) -> Option<u16> {
    Some(u16::from_be_bytes([*bytes.get(at)?, *bytes.get(at + 1)?]))
}

fn seal(mut reply: Reply) -> Reply {
    let mut crc = ModbusCrc::default();
    crc.add_bytes(&reply);
    // Every reply body leaves room for the checksum.
    let _ = reply.extend_from_slice(&crc.to_wire());
    reply
}

fn exception_reply(address: u8, function: u8, exception: Exception) -> Reply {
    debug!("rpc: fn {:#x} -> exception {}", function, exception.code());
    let mut reply = Reply::new();
    let _ = reply.extend_from_slice(&[address, function | EXCEPTION_FLAG, exception.code()]);
    seal(reply)
}

pub struct RegisterServer<'a, M: RawMutex, C: Clock> {
    control: ControlSurface<'a, M, C>,
}

impl<'a, M: RawMutex, C: Clock> RegisterServer<'a, M, C> {
    pub fn new(control: ControlSurface<'a, M, C>) -> Self {
        Self { control }
    }

    /// Executes one request frame (checksum already stripped) and builds the reply.
    ///
    /// Frames too short to carry an address and function code get no reply. A start address
    /// past the table is rejected before the function code is looked at.
    pub async fn respond(&self, frame: &[u8]) -> Option<Reply> {
        let (&address, &function) = (frame.first()?, frame.get(1)?);
        let result = match be16(frame, 2) {
            Some(start) if usize::from(start) >= RegisterId::COUNT => {
                Err(Exception::IllegalAddress)
            }
            _ => match function {
                FN_READ_HOLDING => self.read(address, frame).await,
                FN_WRITE_MULTIPLE => self.write(address, frame).await,
                _ => Err(Exception::IllegalFunction),
            },
        };
        Some(result.unwrap_or_else(|exception| exception_reply(address, function, exception)))
    }

    async fn read(&self, address: u8, frame: &[u8]) -> Result<Reply, Exception> {
        let start = be16(frame, 2).ok_or(Exception::IllegalValue)?;
        let count = be16(frame, 4).ok_or(Exception::IllegalValue)?;
        let values = self.control.read(start, count).await?;
        trace!("rpc: read {} @ {}", count, start);

        let mut reply = Reply::new();
        let _ = reply.extend_from_slice(&[address, FN_READ_HOLDING, (values.len() * 2) as u8]);
        for value in values.iter() {
            let _ = reply.extend_from_slice(&value.to_be_bytes());
        }
        Ok(seal(reply))
    }

    async fn write(&self, address: u8, frame: &[u8]) -> Result<Reply, Exception> {
        let start = be16(frame, 2).ok_or(Exception::IllegalValue)?;
        let count = be16(frame, 4).ok_or(Exception::IllegalValue)?;
        let byte_count = usize::from(*frame.get(6).ok_or(Exception::IllegalValue)?);
        let payload = &frame[WRITE_HEADER_LEN.min(frame.len())..];
        if byte_count != usize::from(count) * 2 || payload.len() != byte_count {
            return Err(Exception::IllegalValue);
        }
        if usize::from(count) > RegisterId::COUNT {
            return Err(Exception::IllegalAddress);
        }

        let values: Vec<u16, { RegisterId::COUNT }> = payload
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        self.control.write(start, &values).await?;
        trace!("rpc: wrote {} @ {}", count, start);

        let mut reply = Reply::new();
        let _ = reply.extend_from_slice(&[address, FN_WRITE_MULTIPLE]);
        let _ = reply.extend_from_slice(&start.to_be_bytes());
        let _ = reply.extend_from_slice(&count.to_be_bytes());
        Ok(seal(reply))
    }

    /// Serves request frames one at a time, in arrival order.
    pub async fn serve(
        &self,
        frames: Receiver<'_, M, RpcFrame, FRAME_QUEUE_DEPTH>,
        serial: &impl SerialLink,
    ) -> ! {
        loop {
            let frame = frames.receive().await;
            if let Some(reply) = self.respond(&frame).await {
                serial.send(&reply);
            }
        }
    }
}
