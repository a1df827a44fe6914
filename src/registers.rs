//! Register address space and the per-register access and range tables.

/// Request-level failures reported to the RPC peer as an exception reply.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Exception {
    IllegalFunction = 0x01,
    IllegalAddress = 0x02,
    IllegalValue = 0x03,
    /// Lock timeout or collaborator failure while executing a valid request.
    ServerDeviceFailure = 0x04,
}

impl Exception {
    pub fn code(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Access {
    /// Control registers: writes trigger side effects, reads are refused.
    WriteOnly,
    ReadWrite,
}

#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RegisterId {
    PowerSwitch = 0,
    UtcHigh = 1,
    UtcLow = 2,
    AlarmSetHigh = 3,
    AlarmSetLow = 4,
    DeleteAlarm = 5,
    ExecuteShortcut = 6,
    HeatingStatus = 7,
    HeatingLevel = 8,
    HeatingTimer = 9,
    Shortcut1 = 10,
    Shortcut2 = 11,
}

/// Longest heating timer in minutes.
pub const MAX_TIMER_MINUTES: u16 = 120;

impl RegisterId {
    pub const COUNT: usize = 12;

    /// Every register in address order.
    pub const ALL: [RegisterId; Self::COUNT] = [
        Self::PowerSwitch,
        Self::UtcHigh,
        Self::UtcLow,
        Self::AlarmSetHigh,
        Self::AlarmSetLow,
        Self::DeleteAlarm,
        Self::ExecuteShortcut,
        Self::HeatingStatus,
        Self::HeatingLevel,
        Self::HeatingTimer,
        Self::Shortcut1,
        Self::Shortcut2,
    ];

    pub fn from_address(address: u16) -> Option<Self> {
        Self::ALL.get(usize::from(address)).copied()
    }

    pub fn address(self) -> u16 {
        self as u16
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn access(self) -> Access {
        match self {
            Self::PowerSwitch
            | Self::UtcHigh
            | Self::UtcLow
            | Self::AlarmSetHigh
            | Self::AlarmSetLow
            | Self::DeleteAlarm
            | Self::ExecuteShortcut => Access::WriteOnly,
            Self::HeatingStatus
            | Self::HeatingLevel
            | Self::HeatingTimer
            | Self::Shortcut1
            | Self::Shortcut2 => Access::ReadWrite,
        }
    }

    /// Value range check for a single register in isolation.
    ///
    /// Rules that span registers (the UTC pair, the alarm halves) are checked by the
    /// write path that sees the whole transaction.
    pub fn validate(self, value: u16) -> Result<(), Exception> {
        let ok = match self {
            Self::PowerSwitch | Self::HeatingStatus => value <= 1,
            Self::UtcHigh | Self::UtcLow | Self::AlarmSetHigh | Self::AlarmSetLow => true,
            Self::DeleteAlarm => usize::from(value) < crate::config::ALARM_COUNT,
            Self::ExecuteShortcut => matches!(value, 1 | 2),
            Self::HeatingLevel => (1..=3).contains(&value),
            Self::HeatingTimer => value <= MAX_TIMER_MINUTES,
            Self::Shortcut1 | Self::Shortcut2 => ShortcutConfig::decode(value).is_some(),
        };
        if ok { Ok(()) } else { Err(Exception::IllegalValue) }
    }
}

/// Resolves a `(start, count)` request to the registers it addresses.
pub fn span(start: u16, count: u16) -> Result<&'static [RegisterId], Exception> {
    if count == 0 {
        return Err(Exception::IllegalValue);
    }
    let start = usize::from(start);
    let end = start + usize::from(count);
    if start >= RegisterId::COUNT || end > RegisterId::COUNT {
        return Err(Exception::IllegalAddress);
    }
    let all: &'static [RegisterId; RegisterId::COUNT] = &RegisterId::ALL;
    Ok(&all[start..end])
}

/// Stored shortcut: `timer_minutes[15:8] | level[7:0]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ShortcutConfig {
    pub level: u8,
    pub minutes: u8,
}

impl ShortcutConfig {
    pub const DEFAULT_1: Self = Self {
        level: 2,
        minutes: 30,
    };
    pub const DEFAULT_2: Self = Self {
        level: 3,
        minutes: 60,
    };

    pub fn decode(raw: u16) -> Option<Self> {
        let level = (raw & 0xff) as u8;
        let minutes = (raw >> 8) as u8;
        if !(1..=3).contains(&level) || u16::from(minutes) > MAX_TIMER_MINUTES {
            return None;
        }
        Some(Self { level, minutes })
    }

    pub fn encode(self) -> u16 {
        (u16::from(self.minutes) << 8) | u16::from(self.level)
    }
}

/// Backing store of register values, indexed by [`RegisterId`].
#[derive(Debug, Clone)]
pub struct RegisterTable {
    values: [u16; RegisterId::COUNT],
}

impl RegisterTable {
    pub const fn new() -> Self {
        let mut values = [0; RegisterId::COUNT];
        values[RegisterId::PowerSwitch as usize] = 1;
        values[RegisterId::HeatingLevel as usize] = 1;
        values[RegisterId::Shortcut1 as usize] = 30 << 8 | 2;
        values[RegisterId::Shortcut2 as usize] = 60 << 8 | 3;
        Self { values }
    }

    pub fn get(&self, id: RegisterId) -> u16 {
        self.values[id.index()]
    }

    /// Range-checks `value` and stores it.
    pub fn set(&mut self, id: RegisterId, value: u16) -> Result<(), Exception> {
        id.validate(value)?;
        self.values[id.index()] = value;
        Ok(())
    }

    pub fn shortcut(&self, which: u16) -> Option<ShortcutConfig> {
        let id = match which {
            1 => RegisterId::Shortcut1,
            2 => RegisterId::Shortcut2,
            _ => return None,
        };
        ShortcutConfig::decode(self.get(id))
    }
}

impl Default for RegisterTable {
    fn default() -> Self {
        Self::new()
    }
}
