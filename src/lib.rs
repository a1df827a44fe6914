//! Control core of a serial-controlled heating pad.
//!
//! Bytes from the UART interrupt land in a [`byte_queue::ByteQueue`], get split into text
//! command frames and register RPC frames by [`demux`], and are answered by [`command`] and
//! [`modbus`]. Both act on the device through [`control::ControlSurface`], which drives the
//! [`heat`] controller and the [`alarm`] scheduler.
#![cfg_attr(not(test), no_std)]

mod fmt;

pub mod alarm;
pub mod byte_queue;
pub mod command;
pub mod config;
pub mod control;
pub mod crc;
pub mod demux;
pub mod hardware;
pub mod heat;
pub mod keypad;
pub mod modbus;
pub mod pid;
pub mod registers;
pub mod sync;
