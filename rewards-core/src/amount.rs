use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, AddAssign, Mul, Neg, Sub};
use std::str::FromStr;

use num_bigint::BigInt;
use num_traits::{Signed, Zero};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Arbitrary-precision signed amount. Balances are always nonnegative but
/// deltas applied during replay may be negative, and overstake math
/// (`factor · staked / PRECISION`) overflows 64 bits for realistic stake
/// sizes, so every balance computation happens in `Z` and is narrowed to
/// `i64` only at the persistence boundary.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Z(BigInt);

pub const OVERSTAKE_PRECISION: i64 = 1_000_000;

impl Z {
    pub fn zero() -> Self {
        Z(BigInt::zero())
    }

    pub fn from_i64(v: i64) -> Self {
        Z(BigInt::from(v))
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_positive(&self) -> bool {
        self.0.is_positive()
    }

    pub fn is_negative(&self) -> bool {
        self.0.is_negative()
    }

    /// Saturates to i64::MIN/MAX rather than panicking; every persisted
    /// field is expected to fit for realistic chain state, but this must
    /// never panic on data that doesn't.
    pub fn to_i64_saturating(&self) -> i64 {
        use num_traits::ToPrimitive;
        self.0.to_i64().unwrap_or_else(|| {
            if self.0.is_negative() {
                i64::MIN
            } else {
                i64::MAX
            }
        })
    }

    pub fn abs_diff(&self, other: &Z) -> Z {
        let diff = &self.0 - &other.0;
        Z(diff.abs())
    }

    /// Integer division truncating toward zero, matching the Go
    /// implementation's `int64`-based `/` used throughout the overstake and
    /// unstake math.
    pub fn div(&self, denom: i64) -> Z {
        Z(&self.0 / BigInt::from(denom))
    }

    /// Integer division by another `Z`, truncating toward zero.
    pub fn div_by(&self, denom: &Z) -> Z {
        Z(&self.0 / &denom.0)
    }

    pub fn mul_i64(&self, factor: i64) -> Z {
        Z(&self.0 * BigInt::from(factor))
    }
}

impl FromStr for Z {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<BigInt>()
            .map(Z)
            .map_err(|_| CoreError::InvalidAmount(s.to_string()))
    }
}

impl fmt::Display for Z {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Z {
    fn from(v: i64) -> Self {
        Z::from_i64(v)
    }
}

impl Add for Z {
    type Output = Z;
    fn add(self, rhs: Z) -> Z {
        Z(self.0 + rhs.0)
    }
}

impl Add<&Z> for &Z {
    type Output = Z;
    fn add(self, rhs: &Z) -> Z {
        Z(&self.0 + &rhs.0)
    }
}

impl AddAssign<&Z> for Z {
    fn add_assign(&mut self, rhs: &Z) {
        self.0 += &rhs.0;
    }
}

impl Sub for Z {
    type Output = Z;
    fn sub(self, rhs: Z) -> Z {
        Z(self.0 - rhs.0)
    }
}

impl Sub<&Z> for &Z {
    type Output = Z;
    fn sub(self, rhs: &Z) -> Z {
        Z(&self.0 - &rhs.0)
    }
}

impl Mul for &Z {
    type Output = Z;
    fn mul(self, rhs: &Z) -> Z {
        Z(&self.0 * &rhs.0)
    }
}

impl Neg for Z {
    type Output = Z;
    fn neg(self) -> Z {
        Z(-self.0)
    }
}

impl PartialOrd for Z {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Z {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}
