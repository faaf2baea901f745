use std::fmt;

/// Fixed-point money with 2 decimal places, stored as an integer count of minor units (pence).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct Amount(i64);

impl Amount {
    const SCALE: i64 = 100;

    pub const ZERO: Amount = Amount(0);

    pub fn from_float(value: f64) -> Self {
        Amount((value * Self::SCALE as f64).round() as i64)
    }

    pub fn from_minor(value: i64) -> Self {
        Amount(value)
    }

    pub fn minor(self) -> i64 {
        self.0
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    /// Absolute distance between two amounts.
    pub fn abs_diff(self, other: Amount) -> Amount {
        Amount((self.0 - other.0).abs())
    }

    /// `self - rhs`, floored at zero.
    pub fn saturating_sub(self, rhs: Amount) -> Amount {
        Amount((self.0 - rhs.0).max(0))
    }

    /// Split into `parts` shares rounded to the minor unit, half away from zero.
    ///
    /// Falls back to a floored share when rounding up would leave a negative
    /// remainder for the last part.
    pub fn share(self, parts: u32) -> Amount {
        let parts = i64::from(parts.max(1));
        let rounded = (self.0 * 2 + parts) / (parts * 2);
        if rounded * (parts - 1) > self.0 {
            Amount(self.0 / parts)
        } else {
            Amount(rounded)
        }
    }

    pub fn times(self, factor: u32) -> Amount {
        Amount(self.0 * i64::from(factor))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.abs();
        let whole = abs / Self::SCALE;
        let frac = abs % Self::SCALE;
        write!(f, "{sign}{whole}.{frac:02}")
    }
}

impl std::ops::Add for Amount {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Amount(self.0 + rhs.0)
    }
}

impl std::ops::Sub for Amount {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Amount(self.0 - rhs.0)
    }
}

impl std::ops::AddAssign for Amount {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl std::ops::SubAssign for Amount {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

impl std::iter::Sum for Amount {
    fn sum<I: Iterator<Item = Amount>>(iter: I) -> Self {
        iter.fold(Amount::ZERO, |acc, x| acc + x)
    }
}
