//! Keypad scanning and the actions bound to it: heating shortcuts, plus the media keys that
//! drive the Bluetooth audio module.

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_time::Ticker;

use crate::config::Config;
use crate::control::ControlSurface;
use crate::hardware::traits::{BtCommand, BtModule, Clock, KeySource};
use crate::registers::{Exception, RegisterId};

/// Scan codes reported by the key matrix.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Key {
    Music = 1,
    Bluetooth = 2,
    PlayPause = 3,
    Min10 = 4,
    Min60 = 5,
    Prev = 6,
    Next = 7,
    VolumeDown = 8,
    VolumeUp = 9,
    HeatPlus = 10,
    HeatMinus = 11,
    Shortcut1 = 12,
    Shortcut2 = 13,
    Min30 = 14,
    Heat = 15,
    Power = 18,
}

impl Key {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Music),
            2 => Some(Self::Bluetooth),
            3 => Some(Self::PlayPause),
            4 => Some(Self::Min10),
            5 => Some(Self::Min60),
            6 => Some(Self::Prev),
            7 => Some(Self::Next),
            8 => Some(Self::VolumeDown),
            9 => Some(Self::VolumeUp),
            10 => Some(Self::HeatPlus),
            11 => Some(Self::HeatMinus),
            12 => Some(Self::Shortcut1),
            13 => Some(Self::Shortcut2),
            14 => Some(Self::Min30),
            15 => Some(Self::Heat),
            18 => Some(Self::Power),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    /// Media command sent to the Bluetooth module, for the media keys.
    pub fn bt_command(self) -> Option<BtCommand> {
        match self {
            Self::Music => Some(BtCommand::MusicMode),
            Self::Bluetooth => Some(BtCommand::BluetoothMode),
            Self::PlayPause => Some(BtCommand::PlayPause),
            Self::Prev => Some(BtCommand::Previous),
            Self::Next => Some(BtCommand::Next),
            Self::VolumeDown => Some(BtCommand::VolumeDown),
            Self::VolumeUp => Some(BtCommand::VolumeUp),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum KeyEvent {
    /// Released before the long-press threshold.
    Short(Key),
    /// Held past the threshold; reported once per press.
    Long(Key),
}

/// Turns periodic key samples into press events.
pub struct KeyScanner {
    held: Option<Key>,
    count: u32,
    long_reported: bool,
    long_after: u32,
}

impl KeyScanner {
    /// `long_after` is the number of held scans that make a long press.
    pub const fn new(long_after: u32) -> Self {
        Self {
            held: None,
            count: 0,
            long_reported: false,
            long_after,
        }
    }

    /// Feeds one sample; returns the event it completes, if any.
    pub fn scan(&mut self, now: Option<Key>) -> Option<KeyEvent> {
        let before = self.held;
        self.held = now;
        match (before, now) {
            (None, None) => None,
            (None, Some(_)) => {
                self.count = 0;
                self.long_reported = false;
                None
            }
            (Some(key), None) => {
                let short = !self.long_reported && self.count < self.long_after;
                short.then_some(KeyEvent::Short(key))
            }
            (Some(_), Some(key)) => {
                self.count = self.count.saturating_add(1);
                if self.count >= self.long_after && !self.long_reported {
                    self.long_reported = true;
                    Some(KeyEvent::Long(key))
                } else {
                    None
                }
            }
        }
    }
}

/// Applies a key event to the heating controller or the Bluetooth module.
pub async fn handle<M: RawMutex, C: Clock>(
    event: KeyEvent,
    control: &ControlSurface<'_, M, C>,
    bt: &mut impl BtModule,
) -> Result<(), Exception> {
    const FAILED: Exception = Exception::ServerDeviceFailure;

    let key = match event {
        KeyEvent::Short(key) => key,
        KeyEvent::Long(key) => {
            debug!("key: long press {}", key.code());
            return Ok(());
        }
    };
    debug!("key: short press {}", key.code());

    let heat = control.heat();
    match key {
        Key::Heat => heat.toggle().await.map(|_| ()).map_err(|_| FAILED),
        Key::HeatPlus => heat.level_up().await.map(|_| ()).map_err(|_| FAILED),
        Key::HeatMinus => heat.level_down().await.map(|_| ()).map_err(|_| FAILED),
        Key::Min10 => control.write_one(RegisterId::HeatingTimer, 10).await,
        Key::Min30 => control.write_one(RegisterId::HeatingTimer, 30).await,
        Key::Min60 => control.write_one(RegisterId::HeatingTimer, 60).await,
        Key::Shortcut1 => control.write_one(RegisterId::ExecuteShortcut, 1).await,
        Key::Shortcut2 => control.write_one(RegisterId::ExecuteShortcut, 2).await,
        Key::Power => Ok(()),
        media => {
            if let Some(command) = media.bt_command() {
                bt.command(command);
            }
            Ok(())
        }
    }
}

/// Samples `keys` every scan period and acts on completed presses.
pub async fn run_keypad<M: RawMutex, C: Clock>(
    mut keys: impl KeySource,
    control: ControlSurface<'_, M, C>,
    mut bt: impl BtModule,
    config: Config,
) -> ! {
    let mut scanner = KeyScanner::new(config.long_press_scans());
    let mut ticker = Ticker::every(config.key_scan_period);
    loop {
        if let Some(event) = scanner.scan(keys.pressed()) {
            if handle(event, &control, &mut bt).await.is_err() {
                warn!("key: press not applied");
            }
        }
        ticker.next().await;
    }
}
