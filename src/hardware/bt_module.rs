//! AT-command driver for the BT401 Bluetooth audio module.

use core::fmt::Write;

use embassy_time::{Duration, Timer};
use heapless::String;

use super::traits::{BtCommand, BtModule, SerialLink};

/// Pause the module needs between configuration commands.
const COMMAND_GAP: Duration = Duration::from_millis(50);

/// Background mode on, auto-switch off, calls off, auto-return off, wait at power-on.
const SETUP: [&str; 5] = [
    "AT+CG01\r\n",
    "AT+CK00\r\n",
    "AT+B200\r\n",
    "AT+CR00\r\n",
    "AT+CP01\r\n",
];

impl BtCommand {
    /// Command line understood by the module.
    pub fn at_line(self) -> &'static str {
        match self {
            Self::MusicMode => "AT+CM04\r\n",
            Self::BluetoothMode => "AT+CM01\r\n",
            Self::PlayPause => "AT+CB\r\n",
            Self::Next => "AT+CC\r\n",
            Self::Previous => "AT+CD\r\n",
            Self::VolumeUp => "AT+CE\r\n",
            Self::VolumeDown => "AT+CF\r\n",
        }
    }
}

pub struct AtBtModule<S> {
    link: S,
}

impl<S: SerialLink> AtBtModule<S> {
    pub fn new(link: S) -> Self {
        Self { link }
    }

    /// Names the module (classic and BLE) and sends the setup sequence.
    pub async fn start(&mut self, name: &str) {
        let mut line: String<40> = String::new();
        for prefix in ["AT+BD", "AT+BM"] {
            line.clear();
            let suffix = if prefix == "AT+BM" { "_BLE" } else { "" };
            if write!(line, "{}{}{}\r\n", prefix, name, suffix).is_err() {
                warn!("bt: name too long, not set");
                continue;
            }
            self.link.send(line.as_bytes());
            Timer::after(COMMAND_GAP).await;
        }
        for (i, command) in SETUP.iter().enumerate() {
            self.link.send(command.as_bytes());
            if i + 1 < SETUP.len() {
                Timer::after(COMMAND_GAP).await;
            }
        }
        info!("bt: module configured");
    }
}

impl<S: SerialLink> BtModule for AtBtModule<S> {
    fn command(&mut self, command: BtCommand) {
        debug!("bt: {}", command);
        self.link.send(command.at_line().as_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_futures::block_on;
    use std::cell::RefCell;

    #[derive(Default)]
    struct MockSerial(RefCell<std::vec::Vec<u8>>);

    impl SerialLink for MockSerial {
        fn send(&self, bytes: &[u8]) {
            self.0.borrow_mut().extend_from_slice(bytes);
        }
    }

    fn sent(bt: &AtBtModule<MockSerial>) -> std::string::String {
        std::string::String::from_utf8(bt.link.0.borrow().clone()).unwrap()
    }

    #[test]
    fn media_commands() {
        let mut bt = AtBtModule::new(MockSerial::default());
        bt.command(BtCommand::PlayPause);
        bt.command(BtCommand::VolumeDown);
        bt.command(BtCommand::MusicMode);
        assert_eq!(sent(&bt), "AT+CB\r\nAT+CF\r\nAT+CM04\r\n");
    }

    #[test]
    fn start_names_the_module_then_configures_it() {
        let mut bt = AtBtModule::new(MockSerial::default());
        block_on(bt.start("HEATPAD"));
        assert_eq!(
            sent(&bt),
            "AT+BDHEATPAD\r\nAT+BMHEATPAD_BLE\r\n\
             AT+CG01\r\nAT+CK00\r\nAT+B200\r\nAT+CR00\r\nAT+CP01\r\n"
        );
    }

    #[test]
    fn overlong_name_is_skipped() {
        let mut bt = AtBtModule::new(MockSerial::default());
        block_on(bt.start("A-NAME-FAR-TOO-LONG-FOR-THE-LINE-BUFFER"));
        assert!(sent(&bt).starts_with("AT+CG01\r\n"));
    }
}
