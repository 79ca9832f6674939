// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! I2C device drivers
//!
//! - [`bmp085`]: BMP085 barometric pressure and temperature sensor

#![cfg_attr(target_os = "none", no_std)]

use core::fmt;

pub mod bmp085;

/// Temperature in tenths of a degree Celsius.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub struct DeciCelsius(pub i32);

impl fmt::Display for DeciCelsius {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{}C", abs / 10, abs % 10)
    }
}

/// Pressure in pascals.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub struct Pascals(pub i32);

impl fmt::Display for Pascals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}Pa", self.0)
    }
}

pub trait TempSensor<T> {
    fn read_temperature(&self) -> Result<DeciCelsius, T>;
}

pub trait Validate<T> {
    /// Checks that the device on the other end is the part we expect.
    fn validate(&self) -> Result<bool, T>;
}
