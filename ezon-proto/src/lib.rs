//! EZON tracker wire protocol - commands, inbound frames and step transfers
//!
//! Everything here is pure: no I/O, no clock. The session controller in
//! `ezon-ble-controller` feeds it bytes and hands it the current time.

pub mod ble;
mod command;
mod frame;
mod reassembly;
pub mod steps;

pub use command::{
    ALARM_DISABLE, ALARM_ENABLE, ALARM_PREFIX, CALL_REMINDER, CONNECT_PROBE_LEN, Command,
    END_OF_MESSAGE, EncodeError, GET_STEPS_PREFIX, REQUEST_PIN, TARGET_DISABLE, TARGET_ENABLE,
    TARGET_MAX, TARGET_MIN, TARGET_STEP, TIME_PREFIX, TIME_SUFFIX,
};
pub use frame::{
    CHUNK_PAYLOAD_LEN, CHUNK_PAYLOAD_OFFSET, FrameKind, STEP_END, STEP_FRAME, STEP_START,
    chunk_payload, classify, hex_dump, text_lossy,
};
pub use reassembly::{
    MINUTES_PER_DAY, ProtocolAnomaly, Reassembler, ReassemblyEvent, ReassemblyState, StepSeries,
};
pub use steps::StepSummary;

/// Valid daily step targets, as offered to the user
pub fn target_choices() -> impl Iterator<Item = u32> {
    (TARGET_MIN..=TARGET_MAX).step_by(TARGET_STEP as usize)
}
