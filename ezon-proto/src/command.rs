//! Outbound commands and their byte layouts

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};

/// Alarm header shared by `SetAlarm` and `DisableAlarm`
pub const ALARM_PREFIX: [u8; 3] = [0x41, 0x43, 0x01];
/// Trailer byte that arms the alarm
pub const ALARM_ENABLE: u8 = 0x45;
pub const ALARM_DISABLE: [u8; 6] = [0x41, 0x43, 0x01, 0x00, 0x00, 0x44];

pub const TIME_PREFIX: &[u8; 4] = b"TIME";
/// 24h flag followed by the end-of-message marker
pub const TIME_SUFFIX: [u8; 3] = [0x01, 0xD0, 0x02];

pub const REQUEST_PIN: [u8; 6] = [0x43, 0x00, 0x03, 0x09, 0x06, 0x08];
pub const CALL_REMINDER: &[u8; 12] = b"N\0EZONIPHONE";

/// Probe length, the tracker checks every trailing zero
pub const CONNECT_PROBE_LEN: usize = 21;

pub const GET_STEPS_PREFIX: [u8; 2] = [0x43, 0x02];
pub const END_OF_MESSAGE: [u8; 2] = [0xD0, 0x02];

pub const TARGET_ENABLE: &[u8; 8] = b"STARGETE";
pub const TARGET_DISABLE: &[u8; 8] = b"STARGETD";
const TARGET_PADDING: usize = 11;

pub const TARGET_STEP: u32 = 1000;
pub const TARGET_MIN: u32 = 1000;
pub const TARGET_MAX: u32 = 10_000;

/// A command the tracker understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    SetAlarm { hour: u8, minute: u8 },
    DisableAlarm,
    SyncTime {
        year: u16,
        month: u8,
        day: u8,
        hour: u8,
        minute: u8,
        second: u8,
    },
    RequestPin,
    /// Shows the incoming call icon on the watch
    CallReminder,
    ConnectProbe,
    /// Request the per-minute step series of one day
    GetSteps { year2digit: u8, month: u8, day: u8 },
    /// Daily goal, one of 1000, 2000, ... 10000
    SetTarget { target: u32 },
    DisableTarget,
}

/// Rejected command field
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("invalid {field}: {value} (expected {expected})")]
    InvalidArgument {
        field: &'static str,
        value: u32,
        expected: &'static str,
    },
}

fn check(
    field: &'static str,
    value: u32,
    ok: bool,
    expected: &'static str,
) -> Result<(), EncodeError> {
    if ok {
        Ok(())
    } else {
        Err(EncodeError::InvalidArgument { field, value, expected })
    }
}

fn check_hour(hour: u8) -> Result<(), EncodeError> {
    check("hour", hour.into(), hour <= 23, "0-23")
}

fn check_minute(minute: u8) -> Result<(), EncodeError> {
    check("minute", minute.into(), minute <= 59, "0-59")
}

fn check_date(month: u8, day: u8) -> Result<(), EncodeError> {
    check("month", month.into(), (1..=12).contains(&month), "1-12")?;
    check("day", day.into(), (1..=31).contains(&day), "1-31")
}

impl Command {
    /// Sync the watch clock to the given local time
    pub fn sync_time(now: &NaiveDateTime) -> Result<Self, EncodeError> {
        let year = now.year();
        check("year", year.max(0) as u32, (0..=i32::from(u16::MAX)).contains(&year), "0-65535")?;
        Ok(Self::SyncTime {
            year: year as u16,
            month: now.month() as u8,
            day: now.day() as u8,
            hour: now.hour() as u8,
            minute: now.minute() as u8,
            // leap seconds are reported as 59
            second: now.second().min(59) as u8,
        })
    }

    /// Request steps for `date`; the tracker only knows years 2000-2099
    pub fn get_steps(date: &NaiveDate) -> Result<Self, EncodeError> {
        let year = date.year();
        check("year", year.max(0) as u32, (2000..=2099).contains(&year), "2000-2099")?;
        Ok(Self::GetSteps {
            year2digit: (year - 2000) as u8,
            month: date.month() as u8,
            day: date.day() as u8,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::SetAlarm { .. } => "set-alarm",
            Self::DisableAlarm => "disable-alarm",
            Self::SyncTime { .. } => "sync-time",
            Self::RequestPin => "request-pin",
            Self::CallReminder => "call-reminder",
            Self::ConnectProbe => "connect-probe",
            Self::GetSteps { .. } => "get-steps",
            Self::SetTarget { .. } => "set-target",
            Self::DisableTarget => "disable-target",
        }
    }

    /// Encode into the payload written to the EZON characteristic.
    ///
    /// Out-of-range fields are rejected before any byte is produced.
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let buf = match *self {
            Self::SetAlarm { hour, minute } => {
                check_hour(hour)?;
                check_minute(minute)?;
                let mut buf = Vec::with_capacity(6);
                buf.extend_from_slice(&ALARM_PREFIX);
                buf.push(hour);
                buf.push(minute);
                buf.push(ALARM_ENABLE);
                buf
            }
            Self::DisableAlarm => ALARM_DISABLE.to_vec(),
            Self::SyncTime { year, month, day, hour, minute, second } => {
                check_date(month, day)?;
                check_hour(hour)?;
                check_minute(minute)?;
                check("second", second.into(), second <= 59, "0-59")?;
                let mut buf = Vec::with_capacity(14);
                buf.extend_from_slice(TIME_PREFIX);
                buf.extend_from_slice(&year.to_be_bytes());
                buf.extend_from_slice(&[month, day, hour, minute, second]);
                buf.extend_from_slice(&TIME_SUFFIX);
                buf
            }
            Self::RequestPin => REQUEST_PIN.to_vec(),
            Self::CallReminder => CALL_REMINDER.to_vec(),
            Self::ConnectProbe => {
                let mut buf = vec![0u8; CONNECT_PROBE_LEN];
                buf[0] = 0x43;
                buf
            }
            Self::GetSteps { year2digit, month, day } => {
                check("year2digit", year2digit.into(), year2digit <= 99, "0-99")?;
                check_date(month, day)?;
                let mut buf = Vec::with_capacity(7);
                buf.extend_from_slice(&GET_STEPS_PREFIX);
                buf.extend_from_slice(&[year2digit, month, day]);
                buf.extend_from_slice(&END_OF_MESSAGE);
                buf
            }
            Self::SetTarget { target } => {
                check(
                    "target",
                    target,
                    (TARGET_MIN..=TARGET_MAX).contains(&target) && target % TARGET_STEP == 0,
                    "1000-10000 in steps of 1000",
                )?;
                let mut buf = Vec::with_capacity(TARGET_ENABLE.len() + 1 + TARGET_PADDING);
                buf.extend_from_slice(TARGET_ENABLE);
                // max 10000 / 100 = 100, always fits a byte
                buf.push((target / 100) as u8);
                buf.extend_from_slice(&[0u8; TARGET_PADDING]);
                buf
            }
            Self::DisableTarget => TARGET_DISABLE.to_vec(),
        };
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_alarm_layout() {
        let bytes = Command::SetAlarm { hour: 8, minute: 0 }.encode().unwrap();
        assert_eq!(bytes, [0x41, 0x43, 0x01, 0x08, 0x00, 0x45]);

        let bytes = Command::SetAlarm { hour: 23, minute: 59 }.encode().unwrap();
        assert_eq!(bytes, [0x41, 0x43, 0x01, 23, 59, 0x45]);
    }

    #[test]
    fn fixed_payloads() {
        assert_eq!(Command::DisableAlarm.encode().unwrap(), [0x41, 0x43, 0x01, 0x00, 0x00, 0x44]);
        assert_eq!(Command::RequestPin.encode().unwrap(), [0x43, 0x00, 0x03, 0x09, 0x06, 0x08]);
        assert_eq!(
            Command::CallReminder.encode().unwrap(),
            [0x4E, 0x00, 0x45, 0x5A, 0x4F, 0x4E, 0x49, 0x50, 0x48, 0x4F, 0x4E, 0x45]
        );
        assert_eq!(Command::DisableTarget.encode().unwrap(), b"STARGETD");
    }

    #[test]
    fn connect_probe_is_0x43_and_twenty_zeros() {
        let bytes = Command::ConnectProbe.encode().unwrap();
        assert_eq!(bytes.len(), 21);
        assert_eq!(bytes[0], 0x43);
        assert!(bytes[1..].iter().all(|b| *b == 0));
    }

    #[test]
    fn sync_time_layout() {
        let cmd = Command::SyncTime {
            year: 2016,
            month: 9,
            day: 29,
            hour: 15,
            minute: 4,
            second: 43,
        };
        assert_eq!(
            cmd.encode().unwrap(),
            [0x54, 0x49, 0x4D, 0x45, 0x07, 0xE0, 0x09, 0x1D, 0x0F, 0x04, 0x2B, 0x01, 0xD0, 0x02]
        );
    }

    #[test]
    fn sync_time_from_clock() {
        let now = NaiveDate::from_ymd_opt(2016, 9, 29)
            .unwrap()
            .and_hms_opt(15, 4, 43)
            .unwrap();
        let cmd = Command::sync_time(&now).unwrap();
        assert_eq!(
            cmd,
            Command::SyncTime { year: 2016, month: 9, day: 29, hour: 15, minute: 4, second: 43 }
        );
    }

    #[test]
    fn get_steps_layout() {
        let date = NaiveDate::from_ymd_opt(2016, 11, 12).unwrap();
        let cmd = Command::get_steps(&date).unwrap();
        assert_eq!(cmd.encode().unwrap(), [0x43, 0x02, 16, 11, 12, 0xD0, 0x02]);

        let date = NaiveDate::from_ymd_opt(1999, 1, 1).unwrap();
        assert!(Command::get_steps(&date).is_err());
    }

    #[test]
    fn set_target_layout() {
        let bytes = Command::SetTarget { target: 8000 }.encode().unwrap();
        assert_eq!(bytes.len(), 20);
        assert_eq!(&bytes[..8], b"STARGETE");
        assert_eq!(bytes[8], 80);
        assert!(bytes[9..].iter().all(|b| *b == 0));

        let bytes = Command::SetTarget { target: 10_000 }.encode().unwrap();
        assert_eq!(bytes[8], 100);
    }

    #[test]
    fn fixed_lengths_per_command() {
        let lengths = [
            (Command::SetAlarm { hour: 1, minute: 2 }, 6),
            (Command::DisableAlarm, 6),
            (
                Command::SyncTime {
                    year: 2024,
                    month: 2,
                    day: 29,
                    hour: 0,
                    minute: 0,
                    second: 0,
                },
                14,
            ),
            (Command::RequestPin, 6),
            (Command::CallReminder, 12),
            (Command::ConnectProbe, 21),
            (Command::GetSteps { year2digit: 24, month: 2, day: 29 }, 7),
            (Command::SetTarget { target: 1000 }, 20),
            (Command::DisableTarget, 8),
        ];
        for (cmd, len) in lengths {
            assert_eq!(cmd.encode().unwrap().len(), len, "{}", cmd.name());
        }
    }

    #[test]
    fn rejects_out_of_range_fields() {
        let err = Command::SetAlarm { hour: 24, minute: 0 }.encode().unwrap_err();
        assert_eq!(
            err,
            EncodeError::InvalidArgument { field: "hour", value: 24, expected: "0-23" }
        );
        assert!(Command::SetAlarm { hour: 0, minute: 60 }.encode().is_err());
        assert!(Command::SyncTime { year: 2016, month: 13, day: 1, hour: 0, minute: 0, second: 0 }
            .encode()
            .is_err());
        assert!(Command::SyncTime { year: 2016, month: 1, day: 1, hour: 0, minute: 0, second: 60 }
            .encode()
            .is_err());
        assert!(Command::GetSteps { year2digit: 100, month: 1, day: 1 }.encode().is_err());
        assert!(Command::GetSteps { year2digit: 16, month: 1, day: 0 }.encode().is_err());
        assert!(Command::SetTarget { target: 1500 }.encode().is_err());
        assert!(Command::SetTarget { target: 0 }.encode().is_err());
        assert!(Command::SetTarget { target: 11_000 }.encode().is_err());
    }
}
