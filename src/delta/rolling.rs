/// Adler-32 style rolling checksum, rsync variant.
///
/// A = s[i] + ... + s[i+w-1]
/// B = w*s[i] + (w-1)*s[i+1] + ... + 1*s[i+w-1]
///
/// Checksum = (B << 16) | A, each half truncated to 16 bits.
pub struct RollingChecksum {
    a: u32,
    b: u32,
    window_size: usize,
}

impl RollingChecksum {
    pub fn new() -> Self {
        Self { a: 0, b: 0, window_size: 0 }
    }

    /// Checksum of a whole block in one call
    pub fn of(data: &[u8]) -> u32 {
        let mut rc = Self::new();
        rc.update(data);
        rc.digest()
    }

    /// Seed the window with `data`
    pub fn update(&mut self, data: &[u8]) {
        self.a = 0;
        self.b = 0;
        self.window_size = data.len();

        for (i, &byte) in data.iter().enumerate() {
            let val = byte as u32;
            self.a = self.a.wrapping_add(val);
            self.b = self.b.wrapping_add(((data.len() - i) as u32).wrapping_mul(val));
        }
    }

    /// Slide the window one byte: drop `old_byte`, take `new_byte`
    ///
    /// New A = Old A - old_byte + new_byte
    /// New B = Old B - (window_size * old_byte) + New A
    #[inline]
    pub fn roll(&mut self, old_byte: u8, new_byte: u8) {
        let old_val = old_byte as u32;
        let new_val = new_byte as u32;

        self.a = self.a.wrapping_sub(old_val).wrapping_add(new_val);
        self.b = self
            .b
            .wrapping_sub((self.window_size as u32).wrapping_mul(old_val))
            .wrapping_add(self.a);
    }

    pub fn digest(&self) -> u32 {
        ((self.b & 0xffff) << 16) | (self.a & 0xffff)
    }
}

impl Default for RollingChecksum {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rolling() {
        let data = b"abcdefgh";

        // "abcd"
        let mut rc = RollingChecksum::new();
        rc.update(&data[0..4]);

        // a = 97+98+99+100 = 394
        // b = 4*97 + 3*98 + 2*99 + 1*100 = 980
        assert_eq!(rc.a, 394);
        assert_eq!(rc.b, 980);

        // "bcde"
        rc.roll(b'a', b'e');

        // b = 980 - 4*97 + 398 = 990
        assert_eq!(rc.a, 398);
        assert_eq!(rc.b, 990);

        let mut rc2 = RollingChecksum::new();
        rc2.update(&data[1..5]);
        assert_eq!(rc.digest(), rc2.digest());
    }

    #[test]
    fn test_roll_matches_fresh_over_long_input() {
        let data: Vec<u8> = (0..2000u32).map(|i| (i.wrapping_mul(31) % 251) as u8).collect();
        let window = 64;

        let mut rc = RollingChecksum::new();
        rc.update(&data[..window]);
        for pos in 1..=(data.len() - window) {
            rc.roll(data[pos - 1], data[pos + window - 1]);
            assert_eq!(rc.digest(), RollingChecksum::of(&data[pos..pos + window]), "offset {}", pos);
        }
    }
}
