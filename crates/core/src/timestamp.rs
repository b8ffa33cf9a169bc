//! Hybrid-logical timestamp type
//!
//! Every multi-version record carries a timestamp made of a wall-time
//! component and a logical counter. Ordering is lexicographic on
//! `(wall_time, logical)`.
//!
//! ## Reserved value
//!
//! The zero timestamp is reserved: a key at `Timestamp::ZERO` addresses the
//! MVCC metadata record of that key, never a data version. Anything that
//! writes data versions must advance a zero timestamp with
//! [`Timestamp::next`] first.
//!
//! ## Textual form
//!
//! ```
//! use strata_core::Timestamp;
//!
//! let ts: Timestamp = "42".parse().unwrap();
//! assert_eq!(ts, Timestamp::from_wall(42));
//! assert_eq!(Timestamp::new(42, 3).to_string(), "42,3");
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Hybrid-logical timestamp
///
/// ## Invariants
///
/// - `next()` is strictly greater than `self` (saturating at `MAX`)
/// - The zero value is the metadata timestamp
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Timestamp {
    wall_time: u64,
    logical: u32,
}

impl Timestamp {
    /// The metadata timestamp
    pub const ZERO: Timestamp = Timestamp {
        wall_time: 0,
        logical: 0,
    };

    /// Maximum representable timestamp
    pub const MAX: Timestamp = Timestamp {
        wall_time: u64::MAX,
        logical: u32::MAX,
    };

    /// Create a timestamp from both components
    #[inline]
    pub const fn new(wall_time: u64, logical: u32) -> Self {
        Timestamp { wall_time, logical }
    }

    /// Create a timestamp with a zero logical component
    #[inline]
    pub const fn from_wall(wall_time: u64) -> Self {
        Timestamp {
            wall_time,
            logical: 0,
        }
    }

    /// Wall-time component
    #[inline]
    pub const fn wall_time(&self) -> u64 {
        self.wall_time
    }

    /// Logical component
    #[inline]
    pub const fn logical(&self) -> u32 {
        self.logical
    }

    /// True for the reserved metadata timestamp
    #[inline]
    pub fn is_zero(&self) -> bool {
        *self == Timestamp::ZERO
    }

    /// Smallest timestamp strictly greater than this one
    pub fn next(&self) -> Timestamp {
        if self.logical == u32::MAX {
            if self.wall_time == u64::MAX {
                return *self;
            }
            return Timestamp::new(self.wall_time + 1, 0);
        }
        Timestamp::new(self.wall_time, self.logical + 1)
    }

    /// Largest timestamp strictly smaller than this one
    ///
    /// Saturates at `ZERO`.
    pub fn prev(&self) -> Timestamp {
        if self.logical > 0 {
            Timestamp::new(self.wall_time, self.logical - 1)
        } else if self.wall_time > 0 {
            Timestamp::new(self.wall_time - 1, u32::MAX)
        } else {
            Timestamp::ZERO
        }
    }

    /// Ratchet this timestamp forward to `other` if it is later
    ///
    /// Returns true if the timestamp moved.
    pub fn forward(&mut self, other: Timestamp) -> bool {
        if other > *self {
            *self = other;
            true
        } else {
            false
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.logical == 0 {
            write!(f, "{}", self.wall_time)
        } else {
            write!(f, "{},{}", self.wall_time, self.logical)
        }
    }
}

impl FromStr for Timestamp {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidArgument(format!("invalid timestamp {:?}", s));
        match s.split_once(',') {
            Some((wall, logical)) => {
                let wall = wall.parse::<u64>().map_err(|_| invalid())?;
                let logical = logical.parse::<u32>().map_err(|_| invalid())?;
                Ok(Timestamp::new(wall, logical))
            }
            None => s
                .parse::<u64>()
                .map(Timestamp::from_wall)
                .map_err(|_| invalid()),
        }
    }
}
