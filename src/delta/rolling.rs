/// Rolling checksum over a sliding window, in the Adler-32 family.
///
/// A = s[i] + ... + s[i+w-1]
/// B = w*s[i] + (w-1)*s[i+1] + ... + 1*s[i+w-1]
///
/// Digest = (B & 0xffff) << 16 | (A & 0xffff)
#[derive(Debug, Default)]
pub struct RollingChecksum {
    a: u32,
    b: u32,
    window: usize,
}

impl RollingChecksum {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.a = 0;
        self.b = 0;
        self.window = 0;
    }

    /// Initialize the checksum over a full window of data.
    pub fn update(&mut self, data: &[u8]) {
        self.a = 0;
        self.b = 0;
        self.window = data.len();
        for (i, &byte) in data.iter().enumerate() {
            let val = u32::from(byte);
            self.a = self.a.wrapping_add(val);
            self.b = self.b.wrapping_add((data.len() - i) as u32 * val);
        }
    }

    /// Slide the window one byte: drop `old_byte`, take in `new_byte`.
    #[inline]
    pub fn roll(&mut self, old_byte: u8, new_byte: u8) {
        let old_val = u32::from(old_byte);
        let new_val = u32::from(new_byte);
        self.a = self.a.wrapping_sub(old_val).wrapping_add(new_val);
        self.b = self
            .b
            .wrapping_sub(self.window as u32 * old_val)
            .wrapping_add(self.a);
    }

    pub fn digest(&self) -> u32 {
        ((self.b & 0xffff) << 16) | (self.a & 0xffff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rolled_digest_matches_fresh_digest() {
        let data = b"the quick brown fox jumps over the lazy dog";
        let window = 16;

        let mut rolled = RollingChecksum::new();
        rolled.update(&data[0..window]);

        for start in 1..=data.len() - window {
            rolled.roll(data[start - 1], data[start + window - 1]);

            let mut fresh = RollingChecksum::new();
            fresh.update(&data[start..start + window]);
            assert_eq!(rolled.digest(), fresh.digest(), "window at {start}");
        }
    }

    #[test]
    fn reset_clears_state() {
        let mut rc = RollingChecksum::new();
        rc.update(b"abcd");
        assert_ne!(rc.digest(), 0);
        rc.reset();
        assert_eq!(rc.digest(), 0);
    }

    #[test]
    fn empty_window_digest_is_zero() {
        let mut rc = RollingChecksum::new();
        rc.update(b"");
        assert_eq!(rc.digest(), 0);
    }
}
