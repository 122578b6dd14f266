// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Implementation of kernel time.

/// In-kernel timestamp representation.
///
/// Measured in ticks of the periodic timer, which the board configures to
/// one millisecond.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd)]
#[repr(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const ZERO: Self = Self(0);

    /// The time `ms` ticks after `self`. Saturates rather than wrapping, so a
    /// huge delay means "never" instead of "immediately".
    pub fn after(self, ms: u32) -> Self {
        Self(self.0.saturating_add(u64::from(ms)))
    }

    /// Splits into `[low, high]` words for storage in a block envelope.
    pub fn to_words(self) -> [u32; 2] {
        [self.0 as u32, (self.0 >> 32) as u32]
    }
}

impl From<u64> for Timestamp {
    fn from(v: u64) -> Self {
        Timestamp(v)
    }
}

impl From<[u32; 2]> for Timestamp {
    fn from(v: [u32; 2]) -> Self {
        Self::from(u64::from(v[0]) | u64::from(v[1]) << 32)
    }
}

impl From<Timestamp> for u64 {
    fn from(v: Timestamp) -> Self {
        v.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn words_split_low_first() {
        let t = Timestamp::from(0x0000_0001_0000_0002);
        assert_eq!(t.to_words(), [2, 1]);
        assert_eq!(Timestamp::from(t.to_words()), t);
    }

    #[test]
    fn after_saturates() {
        assert_eq!(Timestamp::from(u64::MAX).after(5), Timestamp::from(u64::MAX));
        assert_eq!(Timestamp::ZERO.after(25), Timestamp::from(25));
    }
}
