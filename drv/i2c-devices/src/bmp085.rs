// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Driver for the BMP085 barometric pressure and temperature sensor
//!
//! The part reports uncompensated readings; turning them into degrees and
//! pascals takes the eleven per-part calibration constants in its ROM and the
//! fixed-point algorithm from the datasheet. That algorithm is reproduced
//! here in 32-bit wrapping arithmetic so that it computes the same values on
//! the target and on a development machine.

use crate::{DeciCelsius, Pascals, TempSensor, Validate};
use drv_picosoc_i2c::{I2cController, Registers, ResponseCode};
use drv_picosoc_sys::Cycles;
use ringbuf::*;

/// Fixed bus address of the part.
pub const ADDRESS: u8 = 0x77;

/// Expected contents of [`Register::ChipId`].
pub const CHIP_ID: u8 = 0x55;

const CMD_TEMPERATURE: u8 = 0x2e;
const CMD_PRESSURE: u8 = 0x34;

/// Temperature conversion time is 4.5 ms; this is well past it at the
/// reference core clock.
const TEMPERATURE_CYCLES: u32 = 20 * 12_000;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Register {
    Ac1 = 0xaa,
    Ac2 = 0xac,
    Ac3 = 0xae,
    Ac4 = 0xb0,
    Ac5 = 0xb2,
    Ac6 = 0xb4,
    B1 = 0xb6,
    B2 = 0xb8,
    Mb = 0xba,
    Mc = 0xbc,
    Md = 0xbe,
    ChipId = 0xd0,
    Control = 0xf4,
    OutMsb = 0xf6,
}

/// Pressure oversampling setting.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum Oversampling {
    #[default]
    UltraLowPower = 0,
    Standard = 1,
    HighResolution = 2,
    UltraHighResolution = 3,
}

impl Oversampling {
    pub fn bits(self) -> u8 {
        self as u8
    }

    /// Control register value that starts a pressure conversion.
    pub fn pressure_command(self) -> u8 {
        CMD_PRESSURE | self.bits() << 6
    }

    /// Cycles to wait for a pressure conversion.
    pub fn conversion_cycles(self) -> u32 {
        24_000 + (36_000 << self.bits())
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Calibration {
    pub ac1: i16,
    pub ac2: i16,
    pub ac3: i16,
    pub ac4: u16,
    pub ac5: u16,
    pub ac6: u16,
    pub b1: i16,
    pub b2: i16,
    pub mb: i16,
    pub mc: i16,
    pub md: i16,
}

/// Number of bytes of calibration ROM, starting at [`Register::Ac1`].
pub const CALIBRATION_LEN: usize = 22;

impl Calibration {
    /// Decodes the calibration ROM; every constant is big-endian.
    pub fn from_be_bytes(raw: &[u8; CALIBRATION_LEN]) -> Self {
        let w = |i: usize| [raw[2 * i], raw[2 * i + 1]];
        Self {
            ac1: i16::from_be_bytes(w(0)),
            ac2: i16::from_be_bytes(w(1)),
            ac3: i16::from_be_bytes(w(2)),
            ac4: u16::from_be_bytes(w(3)),
            ac5: u16::from_be_bytes(w(4)),
            ac6: u16::from_be_bytes(w(5)),
            b1: i16::from_be_bytes(w(6)),
            b2: i16::from_be_bytes(w(7)),
            mb: i16::from_be_bytes(w(8)),
            mc: i16::from_be_bytes(w(9)),
            md: i16::from_be_bytes(w(10)),
        }
    }
}

/// The `B5` intermediate of the temperature computation, needed again to
/// compensate pressure.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct B5(pub i32);

// Division as RV32M defines it: no traps, x / 0 is all ones.
fn div(n: i32, d: i32) -> i32 {
    if d == 0 {
        -1
    } else {
        n.wrapping_div(d)
    }
}

fn udiv(n: u32, d: u32) -> u32 {
    n.checked_div(d).unwrap_or(u32::MAX)
}

/// Compensates a raw temperature sample.
pub fn true_temperature(ut: u16, cal: &Calibration) -> (DeciCelsius, B5) {
    let x1 = (i32::from(ut) - i32::from(cal.ac6))
        .wrapping_mul(i32::from(cal.ac5))
        >> 15;
    let x2 = div(i32::from(cal.mc) << 11, x1.wrapping_add(i32::from(cal.md)));
    let b5 = x1.wrapping_add(x2);

    (DeciCelsius(b5.wrapping_add(8) >> 4), B5(b5))
}

/// Compensates a raw pressure sample taken with oversampling `oss`.
pub fn true_pressure(
    up: u32,
    b5: B5,
    cal: &Calibration,
    oss: Oversampling,
) -> Pascals {
    let oss = u32::from(oss.bits());
    let b6 = b5.0.wrapping_sub(4000);
    let b6sq = b6.wrapping_mul(b6) >> 12;

    let x1 = i32::from(cal.b2).wrapping_mul(b6sq) >> 11;
    let x2 = i32::from(cal.ac2).wrapping_mul(b6) >> 11;
    let x3 = x1.wrapping_add(x2);
    let b3 = ((i32::from(cal.ac1).wrapping_mul(4).wrapping_add(x3) << oss)
        .wrapping_add(2))
        >> 2;

    let x1 = i32::from(cal.ac3).wrapping_mul(b6) >> 13;
    let x2 = i32::from(cal.b1).wrapping_mul(b6sq) >> 16;
    let x3 = x1.wrapping_add(x2).wrapping_add(2) >> 2;
    let b4 = u32::from(cal.ac4).wrapping_mul(x3.wrapping_add(32768) as u32) >> 15;

    let b7 = up.wrapping_sub(b3 as u32).wrapping_mul(50_000 >> oss);

    // Doubling first keeps precision, but only while it can't carry out of
    // bit 31.
    let p = if b7 < 0x8000_0000 {
        udiv(b7 << 1, b4)
    } else {
        udiv(b7, b4) << 1
    };
    let p = p as i32;

    let x1 = (p >> 8).wrapping_mul(p >> 8);
    let x1 = x1.wrapping_mul(3038) >> 16;
    let x2 = (-7357i32).wrapping_mul(p) >> 16;

    Pascals(p.wrapping_add(x1.wrapping_add(x2).wrapping_add(3791) >> 4))
}

#[derive(Debug)]
pub enum Error {
    BadRegisterRead { reg: Register, code: ResponseCode },
    BadRegisterWrite { reg: Register, code: ResponseCode },
}

impl From<Error> for ResponseCode {
    fn from(err: Error) -> Self {
        match err {
            Error::BadRegisterRead { code, .. } => code,
            Error::BadRegisterWrite { code, .. } => code,
        }
    }
}

/// A complete sensor session.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Reading {
    pub calibration: Calibration,
    pub ut: u16,
    pub up: u32,
    pub temperature: DeciCelsius,
    pub pressure: Pascals,
}

#[derive(Copy, Clone, Debug, PartialEq)]
enum Trace {
    None,
    Calibration(Calibration),
    RawTemperature(u16),
    RawPressure(u32, Oversampling),
    Compensated(DeciCelsius, Pascals),
    ReadFailed(Register, ResponseCode),
    WriteFailed(Register, ResponseCode),
}

ringbuf!(Trace, 16, Trace::None);

pub struct Bmp085<'a, R, C> {
    i2c: &'a I2cController<R, C>,
    oss: Oversampling,
}

impl<'a, R: Registers, C: Cycles> Bmp085<'a, R, C> {
    pub fn new(i2c: &'a I2cController<R, C>, oss: Oversampling) -> Self {
        Self { i2c, oss }
    }

    fn read_block(&self, reg: Register, buf: &mut [u8]) -> Result<(), Error> {
        self.i2c
            .write_read(ADDRESS, &[reg as u8], buf)
            .map_err(|code| {
                ringbuf_entry!(Trace::ReadFailed(reg, code));
                Error::BadRegisterRead { reg, code }
            })
    }

    fn write_reg(&self, reg: Register, val: u8) -> Result<(), Error> {
        self.i2c
            .write_read(ADDRESS, &[reg as u8, val], &mut [])
            .map_err(|code| {
                ringbuf_entry!(Trace::WriteFailed(reg, code));
                Error::BadRegisterWrite { reg, code }
            })
    }

    pub fn read_byte(&self, reg: Register) -> Result<u8, Error> {
        let mut buf = [0u8; 1];
        self.read_block(reg, &mut buf)?;
        Ok(buf[0])
    }

    /// Reads `reg` and the register after it, most significant byte first.
    pub fn read_word(&self, reg: Register) -> Result<u16, Error> {
        let mut buf = [0u8; 2];
        self.read_block(reg, &mut buf)?;
        Ok(u16::from_be_bytes(buf))
    }

    pub fn read_calibration(&self) -> Result<Calibration, Error> {
        let mut raw = [0u8; CALIBRATION_LEN];
        self.read_block(Register::Ac1, &mut raw)?;
        let cal = Calibration::from_be_bytes(&raw);
        ringbuf_entry!(Trace::Calibration(cal));
        Ok(cal)
    }

    pub fn read_raw_temperature(&self) -> Result<u16, Error> {
        self.write_reg(Register::Control, CMD_TEMPERATURE)?;
        self.i2c.cycles().delay(TEMPERATURE_CYCLES);
        let ut = self.read_word(Register::OutMsb)?;
        ringbuf_entry!(Trace::RawTemperature(ut));
        Ok(ut)
    }

    pub fn read_raw_pressure(&self) -> Result<u32, Error> {
        self.write_reg(Register::Control, self.oss.pressure_command())?;
        self.i2c.cycles().delay(self.oss.conversion_cycles());

        let mut buf = [0u8; 3];
        self.read_block(Register::OutMsb, &mut buf)?;
        let [msb, lsb, xlsb] = buf;
        let up = (u32::from(msb) << 16 | u32::from(lsb) << 8 | u32::from(xlsb))
            >> (8 - self.oss.bits());
        ringbuf_entry!(Trace::RawPressure(up, self.oss));
        Ok(up)
    }

    /// Reads calibration, temperature and pressure, and compensates both.
    /// Calibration is read afresh every time.
    pub fn read(&self) -> Result<Reading, Error> {
        let calibration = self.read_calibration()?;
        let ut = self.read_raw_temperature()?;
        let (temperature, b5) = true_temperature(ut, &calibration);
        let up = self.read_raw_pressure()?;
        let pressure = true_pressure(up, b5, &calibration, self.oss);
        ringbuf_entry!(Trace::Compensated(temperature, pressure));

        Ok(Reading {
            calibration,
            ut,
            up,
            temperature,
            pressure,
        })
    }
}

impl<R: Registers, C: Cycles> Validate<Error> for Bmp085<'_, R, C> {
    fn validate(&self) -> Result<bool, Error> {
        Ok(self.read_byte(Register::ChipId)? == CHIP_ID)
    }
}

impl<R: Registers, C: Cycles> TempSensor<Error> for Bmp085<'_, R, C> {
    fn read_temperature(&self) -> Result<DeciCelsius, Error> {
        let cal = self.read_calibration()?;
        let ut = self.read_raw_temperature()?;
        Ok(true_temperature(ut, &cal).0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drv_picosoc_i2c::{Config, Register as I2cReg, WaitPolicy};
    use std::cell::{Cell, RefCell};

    /// Calibration set from the datasheet's worked example.
    const DATASHEET: Calibration = Calibration {
        ac1: 408,
        ac2: -72,
        ac3: -14383,
        ac4: 32741,
        ac5: 32757,
        ac6: 23153,
        b1: 6190,
        b2: 4,
        mb: -32768,
        mc: -8711,
        md: 2868,
    };

    #[test]
    fn datasheet_temperature() {
        let (t, b5) = true_temperature(27898, &DATASHEET);
        assert_eq!(t, DeciCelsius(150));
        assert_eq!(b5, B5(2400));
        assert_eq!(true_temperature(27898, &DATASHEET), (t, b5));
    }

    #[test]
    fn datasheet_pressure() {
        let (_, b5) = true_temperature(27898, &DATASHEET);
        let p = true_pressure(23843, b5, &DATASHEET, Oversampling::UltraLowPower);
        assert_eq!(p, Pascals(69964));
    }

    #[test]
    fn pressure_across_oversampling() {
        let b5 = B5(2400);
        let expect = [69964, 69962, 69963, 69963];
        for (bits, want) in expect.into_iter().enumerate() {
            let oss = match bits {
                0 => Oversampling::UltraLowPower,
                1 => Oversampling::Standard,
                2 => Oversampling::HighResolution,
                _ => Oversampling::UltraHighResolution,
            };
            let up = 23843 << bits;
            assert_eq!(true_pressure(up, b5, &DATASHEET, oss), Pascals(want));
        }
    }

    #[test]
    fn b7_below_boundary_shifts_first() {
        // b3 = 422 and b7 = (up - 422) * 50000 = 2147450000 < 2^31.
        let p = true_pressure(43371, B5(2400), &DATASHEET, Oversampling::UltraLowPower);
        assert_eq!(p, Pascals(128433));
    }

    #[test]
    fn b7_above_boundary_divides_first() {
        // b7 = 2147500000 >= 2^31: doubling first would wrap and give a raw
        // quotient of 0.
        let p = true_pressure(43372, B5(2400), &DATASHEET, Oversampling::UltraLowPower);
        assert_eq!(p, Pascals(128435));
    }

    #[test]
    fn zero_divisors_do_not_trap() {
        // x1 + md == 0 and ac4 == 0.
        let cal = Calibration {
            ac4: 0,
            ac5: 0,
            md: 0,
            ..DATASHEET
        };
        let (t, b5) = true_temperature(0, &cal);
        assert_eq!(b5, B5(-1));
        assert_eq!(t, DeciCelsius(0));
        let _ = true_pressure(0, b5, &cal, Oversampling::UltraHighResolution);
    }

    #[test]
    fn oversampling_commands() {
        assert_eq!(Oversampling::UltraLowPower.pressure_command(), 0x34);
        assert_eq!(Oversampling::UltraHighResolution.pressure_command(), 0xf4);
        assert_eq!(Oversampling::UltraLowPower.conversion_cycles(), 60_000);
        assert_eq!(Oversampling::UltraHighResolution.conversion_cycles(), 312_000);
    }

    #[test]
    fn calibration_decode() {
        let mut raw = [0u8; CALIBRATION_LEN];
        raw[..4].copy_from_slice(&[0x01, 0x98, 0xff, 0xb8]);
        raw[6..8].copy_from_slice(&[0x7f, 0xe5]);
        raw[20..].copy_from_slice(&[0x0b, 0x34]);
        let cal = Calibration::from_be_bytes(&raw);
        assert_eq!(cal.ac1, 408);
        assert_eq!(cal.ac2, -72);
        assert_eq!(cal.ac4, 32741);
        assert_eq!(cal.md, 2868);
    }

    /// A BMP085 seen through the I2C core's register file.
    struct Sensor {
        mem: RefCell<[u8; 256]>,
        ptr: Cell<u8>,
        txdr: Cell<u8>,
        /// `Some(is_read)` while addressed.
        addressed: Cell<Option<bool>>,
        expect_pointer: Cell<bool>,
        present: bool,
        ut: u16,
        up: u32,
        commands: RefCell<Vec<u8>>,
        conversions: RefCell<Vec<u8>>,
    }

    impl Sensor {
        fn new(cal: &Calibration, ut: u16, up: u32) -> Self {
            let mut mem = [0u8; 256];
            let words = [
                cal.ac1 as u16,
                cal.ac2 as u16,
                cal.ac3 as u16,
                cal.ac4,
                cal.ac5,
                cal.ac6,
                cal.b1 as u16,
                cal.b2 as u16,
                cal.mb as u16,
                cal.mc as u16,
                cal.md as u16,
            ];
            for (i, w) in words.iter().enumerate() {
                let at = 0xaa + 2 * i;
                mem[at..at + 2].copy_from_slice(&w.to_be_bytes());
            }
            mem[0xd0] = CHIP_ID;
            Self {
                mem: RefCell::new(mem),
                ptr: Cell::new(0),
                txdr: Cell::new(0),
                addressed: Cell::new(None),
                expect_pointer: Cell::new(false),
                present: true,
                ut,
                up,
                commands: RefCell::new(Vec::new()),
                conversions: RefCell::new(Vec::new()),
            }
        }

        fn store(&self, reg: u8, val: u8) {
            let mut mem = self.mem.borrow_mut();
            mem[usize::from(reg)] = val;
            if reg != 0xf4 {
                return;
            }
            self.conversions.borrow_mut().push(val);
            let out = if val == CMD_TEMPERATURE {
                u32::from(self.ut) << 8
            } else {
                let oss = val >> 6;
                self.up << (8 - oss)
            };
            mem[0xf6..0xf9].copy_from_slice(&out.to_be_bytes()[1..]);
        }
    }

    impl Registers for Sensor {
        fn read(&self, reg: I2cReg) -> u8 {
            match reg {
                I2cReg::SR if self.addressed.get().is_some() => 0x14,
                I2cReg::RXDR if self.addressed.get() == Some(true) => {
                    let p = self.ptr.get();
                    self.ptr.set(p.wrapping_add(1));
                    self.mem.borrow()[usize::from(p)]
                }
                _ => 0,
            }
        }

        fn write(&self, reg: I2cReg, val: u8) {
            match reg {
                I2cReg::TXDR => self.txdr.set(val),
                I2cReg::CMDR => {
                    if val != 0 {
                        self.commands.borrow_mut().push(val);
                    }
                    match val {
                        0x94 => {
                            let tx = self.txdr.get();
                            let me = self.present && tx >> 1 == ADDRESS;
                            self.addressed.set(me.then_some(tx & 1 == 1));
                            self.expect_pointer.set(tx & 1 == 0);
                        }
                        0x14 if self.addressed.get() == Some(false) => {
                            let tx = self.txdr.get();
                            if self.expect_pointer.replace(false) {
                                self.ptr.set(tx);
                            } else {
                                let p = self.ptr.get();
                                self.store(p, tx);
                                self.ptr.set(p.wrapping_add(1));
                            }
                        }
                        0x44 => self.addressed.set(None),
                        _ => (),
                    }
                }
                _ => (),
            }
        }
    }

    struct Clock(Cell<u32>);

    impl Cycles for Clock {
        fn now(&self) -> u32 {
            let t = self.0.get();
            self.0.set(t.wrapping_add(1000));
            t
        }
    }

    fn bus(sensor: &Sensor, wait: WaitPolicy) -> I2cController<&Sensor, Clock> {
        I2cController::new(
            sensor,
            Clock(Cell::new(0)),
            Config {
                wait,
                ..Config::default()
            },
        )
    }

    #[test]
    fn full_reading() {
        let sensor = Sensor::new(&DATASHEET, 27898, 23843);
        let i2c = bus(&sensor, WaitPolicy::Forever);
        let bmp = Bmp085::new(&i2c, Oversampling::UltraLowPower);

        let r = bmp.read().unwrap();
        assert_eq!(r.calibration, DATASHEET);
        assert_eq!(r.ut, 27898);
        assert_eq!(r.up, 23843);
        assert_eq!(r.temperature, DeciCelsius(150));
        assert_eq!(r.pressure, Pascals(69964));
        assert_eq!(*sensor.conversions.borrow(), [0x2e, 0x34]);
    }

    #[test]
    fn high_resolution_reading() {
        let sensor = Sensor::new(&DATASHEET, 27898, 23843 << 3);
        let i2c = bus(&sensor, WaitPolicy::Forever);
        let bmp = Bmp085::new(&i2c, Oversampling::UltraHighResolution);

        let r = bmp.read().unwrap();
        assert_eq!(r.up, 23843 << 3);
        assert_eq!(r.pressure, Pascals(69963));
        assert_eq!(*sensor.conversions.borrow(), [0x2e, 0xf4]);
    }

    #[test]
    fn word_read_transaction() {
        let sensor = Sensor::new(&DATASHEET, 0, 0);
        let i2c = bus(&sensor, WaitPolicy::Forever);
        let bmp = Bmp085::new(&i2c, Oversampling::default());

        assert_eq!(bmp.read_word(Register::Ac1).unwrap(), 408);
        assert_eq!(
            *sensor.commands.borrow(),
            [0x94, 0x14, 0x94, 0x24, 0x6c, 0x44]
        );
        assert_eq!(bmp.read_byte(Register::Ac2).unwrap(), 0xff);
        assert_eq!(bmp.read_word(Register::Md).unwrap(), 2868);
    }

    #[test]
    fn calibration_words_match_block_read() {
        let sensor = Sensor::new(&DATASHEET, 0, 0);
        let i2c = bus(&sensor, WaitPolicy::Forever);
        let bmp = Bmp085::new(&i2c, Oversampling::default());

        let cal = bmp.read_calibration().unwrap();
        let words = [
            (Register::Ac1, cal.ac1 as u16),
            (Register::Ac2, cal.ac2 as u16),
            (Register::Ac3, cal.ac3 as u16),
            (Register::Ac4, cal.ac4),
            (Register::Ac5, cal.ac5),
            (Register::Ac6, cal.ac6),
            (Register::B1, cal.b1 as u16),
            (Register::B2, cal.b2 as u16),
            (Register::Mb, cal.mb as u16),
            (Register::Mc, cal.mc as u16),
            (Register::Md, cal.md as u16),
        ];
        for (reg, want) in words {
            assert_eq!(bmp.read_word(reg).unwrap(), want, "{reg:?}");
        }
    }

    #[test]
    fn validate_checks_chip_id() {
        let sensor = Sensor::new(&DATASHEET, 0, 0);
        let i2c = bus(&sensor, WaitPolicy::Forever);
        assert!(Bmp085::new(&i2c, Oversampling::default()).validate().unwrap());

        sensor.mem.borrow_mut()[0xd0] = 0x58;
        assert!(!Bmp085::new(&i2c, Oversampling::default()).validate().unwrap());
    }

    #[test]
    fn temperature_only() {
        let sensor = Sensor::new(&DATASHEET, 27898, 0);
        let i2c = bus(&sensor, WaitPolicy::Forever);
        let bmp = Bmp085::new(&i2c, Oversampling::default());
        assert_eq!(bmp.read_temperature().unwrap(), DeciCelsius(150));
    }

    #[test]
    fn missing_sensor_reports_register() {
        let sensor = Sensor {
            present: false,
            ..Sensor::new(&DATASHEET, 0, 0)
        };
        let i2c = bus(&sensor, WaitPolicy::Polls(10));
        let bmp = Bmp085::new(&i2c, Oversampling::default());

        match bmp.read() {
            Err(Error::BadRegisterRead { reg, code }) => {
                assert_eq!(reg, Register::Ac1);
                assert_eq!(code, ResponseCode::NoDevice);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(sensor.commands.borrow().last(), Some(&0x44));
        assert_eq!(
            ResponseCode::from(Error::BadRegisterWrite {
                reg: Register::Control,
                code: ResponseCode::BusLocked
            }),
            ResponseCode::BusLocked
        );
    }
}
