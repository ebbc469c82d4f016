//! Inbound notification frames

/// Leading byte of every step transfer frame
pub const STEP_FRAME: u8 = 0x50;
/// Sequence marker of the first frame of a transfer
pub const STEP_START: u8 = 0x00;
/// Sequence marker of the last frame of a transfer
pub const STEP_END: u8 = 0x4F;

/// Step counts carried by one chunk (frame bytes 2..19)
pub const CHUNK_PAYLOAD_LEN: usize = 17;
pub const CHUNK_PAYLOAD_OFFSET: usize = 2;

/// Classification of one inbound frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind<'a> {
    StepTransferStart,
    /// Ordinary chunk; `marker` is the device's sequence byte
    StepTransferChunk { marker: u8 },
    StepTransferEnd,
    Other(&'a [u8]),
}

/// Classify a frame by its leading bytes.
///
/// A `0x50` frame without a second byte has no sequence marker and is
/// surfaced as `Other`.
pub fn classify(frame: &[u8]) -> FrameKind<'_> {
    match frame {
        [STEP_FRAME, STEP_START, ..] => FrameKind::StepTransferStart,
        [STEP_FRAME, STEP_END, ..] => FrameKind::StepTransferEnd,
        [STEP_FRAME, marker, ..] => FrameKind::StepTransferChunk { marker: *marker },
        _ => FrameKind::Other(frame),
    }
}

/// Space separated uppercase hex, e.g. `50 00 1A`
pub fn hex_dump(frame: &[u8]) -> String {
    frame
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// The frame read as text, invalid UTF-8 replaced
pub fn text_lossy(frame: &[u8]) -> String {
    String::from_utf8_lossy(frame).into_owned()
}

/// The 17 step counts of a step frame, zero padded when the frame is short.
///
/// Returns the payload and whether padding was needed.
pub fn chunk_payload(frame: &[u8]) -> ([u8; CHUNK_PAYLOAD_LEN], bool) {
    let mut payload = [0u8; CHUNK_PAYLOAD_LEN];
    let available = frame.get(CHUNK_PAYLOAD_OFFSET..).unwrap_or(&[]);
    let n = available.len().min(CHUNK_PAYLOAD_LEN);
    payload[..n].copy_from_slice(&available[..n]);
    (payload, n < CHUNK_PAYLOAD_LEN)
}
