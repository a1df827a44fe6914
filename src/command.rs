//! AT text command responder.
//!
//! Supported commands:
//!
//! | Command            | Effect                               |
//! |--------------------|--------------------------------------|
//! | `AT`               | ping                                 |
//! | `AT+POWER=<0\|1>`  | power switch register                |
//! | `AT+HEATING=<n>`   | heating level, 1..=3                 |
//! | `AT+TIMER=<n>`     | heating timer in minutes, 0..=120    |
//! | `AT+STATUS?`       | status line                          |
//! | `AT+LEVEL?`        | current level                        |
//!
//! Every reply ends in CRLF; unknown or rejected commands answer `ERROR`.

use core::fmt::Write;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::channel::Receiver;
use heapless::String;

use crate::config::FRAME_QUEUE_DEPTH;
use crate::control::ControlSurface;
use crate::demux::TextFrame;
use crate::hardware::traits::{Clock, SerialLink};
use crate::registers::RegisterId;

pub type Response = String<64>;

const OK: &str = "OK\r\n";
const ERROR: &str = "ERROR\r\n";

enum Command {
    Ping,
    Set(RegisterId, u16),
    Status,
    Level,
}

fn parse(line: &str) -> Option<Command> {
    let set = |id, value: &str| value.parse().ok().map(|v| Command::Set(id, v));
    match line {
        "AT" => Some(Command::Ping),
        "AT+STATUS?" => Some(Command::Status),
        "AT+LEVEL?" => Some(Command::Level),
        _ => {
            if let Some(value) = line.strip_prefix("AT+POWER=") {
                set(RegisterId::PowerSwitch, value)
            } else if let Some(value) = line.strip_prefix("AT+HEATING=") {
                set(RegisterId::HeatingLevel, value)
            } else if let Some(value) = line.strip_prefix("AT+TIMER=") {
                set(RegisterId::HeatingTimer, value)
            } else {
                None
            }
        }
    }
}

pub struct CommandResponder<'a, M: RawMutex, C: Clock> {
    control: ControlSurface<'a, M, C>,
}

impl<'a, M: RawMutex, C: Clock> CommandResponder<'a, M, C> {
    pub fn new(control: ControlSurface<'a, M, C>) -> Self {
        Self { control }
    }

    /// Executes one text frame and returns the reply line.
    pub async fn respond(&self, frame: &[u8]) -> Response {
        let mut reply = Response::new();
        let line = core::str::from_utf8(frame)
            .ok()
            .and_then(|text| text.strip_suffix("\r\n"));
        let Some(command) = line.and_then(parse) else {
            debug!("at: unknown command");
            let _ = reply.push_str(ERROR);
            return reply;
        };

        let written = match command {
            Command::Ping => reply.push_str(OK).map_err(|_| core::fmt::Error),
            Command::Set(id, value) => match self.control.write_one(id, value).await {
                Ok(()) => reply.push_str(OK).map_err(|_| core::fmt::Error),
                Err(_) => reply.push_str(ERROR).map_err(|_| core::fmt::Error),
            },
            Command::Status => match self.control.status().await {
                Ok(s) => write!(
                    reply,
                    "POWER={},HEATING={},LEVEL={},TIMER={},REMAIN={}\r\n",
                    s.power, s.status as u16, s.level as u16, s.timer_minutes, s.remain_sec
                ),
                Err(_) => reply.push_str(ERROR).map_err(|_| core::fmt::Error),
            },
            Command::Level => match self.control.status().await {
                Ok(s) => write!(reply, "LEVEL={}\r\n", s.level as u16),
                Err(_) => reply.push_str(ERROR).map_err(|_| core::fmt::Error),
            },
        };
        if written.is_err() {
            reply.clear();
            let _ = reply.push_str(ERROR);
        }
        reply
    }

    /// Answers text frames one at a time, in arrival order.
    pub async fn serve(
        &self,
        frames: Receiver<'_, M, TextFrame, FRAME_QUEUE_DEPTH>,
        serial: &impl SerialLink,
    ) -> ! {
        loop {
            let frame = frames.receive().await;
            let reply = self.respond(&frame).await;
            serial.send(reply.as_bytes());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::tests::Fixture;
    use crate::heat::{HeatLevel, HeatStatus};
    use embassy_futures::block_on;

    fn ask(fx: &Fixture, line: &[u8]) -> Response {
        block_on(CommandResponder::new(fx.surface()).respond(line))
    }

    #[test]
    fn ping_and_unknown() {
        let fx = Fixture::new();
        assert_eq!(ask(&fx, b"AT\r\n"), OK);
        assert_eq!(ask(&fx, b"AT+FOO\r\n"), ERROR);
        assert_eq!(ask(&fx, b"AT"), ERROR);
        assert_eq!(ask(&fx, b"AT\xff\r\n"), ERROR);
    }

    #[test]
    fn status_line_reflects_state() {
        let fx = Fixture::new();
        assert_eq!(
            ask(&fx, b"AT+STATUS?\r\n"),
            "POWER=1,HEATING=0,LEVEL=1,TIMER=0,REMAIN=0\r\n"
        );

        assert_eq!(ask(&fx, b"AT+HEATING=3\r\n"), OK);
        block_on(fx.heat.set_status(HeatStatus::Running)).unwrap();
        assert_eq!(ask(&fx, b"AT+TIMER=2\r\n"), OK);
        assert_eq!(
            ask(&fx, b"AT+STATUS?\r\n"),
            "POWER=1,HEATING=1,LEVEL=3,TIMER=2,REMAIN=120\r\n"
        );
        assert_eq!(ask(&fx, b"AT+LEVEL?\r\n"), "LEVEL=3\r\n");
    }

    #[test]
    fn parameters_are_range_checked() {
        let fx = Fixture::new();
        assert_eq!(ask(&fx, b"AT+HEATING=4\r\n"), ERROR);
        assert_eq!(ask(&fx, b"AT+HEATING=0\r\n"), ERROR);
        assert_eq!(ask(&fx, b"AT+HEATING=x\r\n"), ERROR);
        assert_eq!(ask(&fx, b"AT+TIMER=121\r\n"), ERROR);
        assert_eq!(ask(&fx, b"AT+POWER=2\r\n"), ERROR);
        assert_eq!(block_on(fx.heat.snapshot()).unwrap().level, HeatLevel::L1);
    }

    #[test]
    fn power_off_stops_heating() {
        let fx = Fixture::new();
        block_on(fx.heat.set_status(HeatStatus::Running)).unwrap();
        assert_eq!(ask(&fx, b"AT+POWER=0\r\n"), OK);
        assert!(!block_on(fx.heat.snapshot()).unwrap().is_running());
        assert_eq!(
            ask(&fx, b"AT+STATUS?\r\n"),
            "POWER=0,HEATING=0,LEVEL=1,TIMER=0,REMAIN=0\r\n"
        );
    }
}
