/// CRC-16/MODBUS accumulator.
#[derive(Debug, Clone, Copy)]
pub struct ModbusCrc(u16);

impl Default for ModbusCrc {
    fn default() -> Self {
        Self(Self::INIT_VALUE)
    }
}

impl ModbusCrc {
    pub const LENGTH: usize = 2;
    const INIT_VALUE: u16 = 0xffff;
    // Reflected form of 0x8005.
    const POLYNOMIAL: u16 = 0xa001;

    pub fn add(&mut self, byte: u8) {
        self.0 ^= u16::from(byte);
        for _bit in 0..8 {
            if (self.0 & 0x0001) != 0 {
                self.0 = (self.0 >> 1) ^ Self::POLYNOMIAL;
            } else {
                self.0 >>= 1;
            }
        }
    }

    pub fn add_bytes(&mut self, bytes: &[u8]) {
        bytes.iter().for_each(|&byte| self.add(byte));
    }

    pub fn get(&self) -> u16 {
        self.0
    }

    pub fn compute(bytes: &[u8]) -> u16 {
        let mut crc = Self::default();
        crc.add_bytes(bytes);
        crc.get()
    }

    /// Checksum in transmission order, low byte first.
    pub fn to_wire(&self) -> [u8; 2] {
        self.0.to_le_bytes()
    }
}

/// Checks the trailing checksum of a complete frame.
pub fn verify(frame: &[u8]) -> bool {
    let Some(split) = frame.len().checked_sub(ModbusCrc::LENGTH) else {
        return false;
    };
    let (body, tail) = frame.split_at(split);
    ModbusCrc::compute(body).to_le_bytes() == tail
}
