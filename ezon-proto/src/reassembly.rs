//! Step transfer reassembly
//!
//! The tracker sends one day of per-minute step counts as a sequence of
//! `0x50` frames: a start frame, any number of chunks, and an end frame.
//! Chunks and the end frame each carry 17 counts. The [`Reassembler`] turns
//! that sequence back into one [`StepSeries`].

use crate::frame::{self, CHUNK_PAYLOAD_LEN, FrameKind};

/// Minutes in a day, the nominal length of a complete series
pub const MINUTES_PER_DAY: usize = 24 * 60;

/// Per-minute step counts for one day, in transfer order
pub type StepSeries = Vec<u8>;

/// Reassembly state
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ReassemblyState {
    #[default]
    Idle,
    /// Buffer length is always a multiple of [`CHUNK_PAYLOAD_LEN`]
    Accumulating(Vec<u8>),
}

/// A frame that makes no sense for the current state. Reported, never fatal.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolAnomaly {
    #[error("end of step transfer without a start")]
    EndWithoutStart,
    #[error("step chunk 0x{marker:02X} outside a transfer")]
    ChunkOutsideTransfer { marker: u8 },
    #[error("short step frame ({len} bytes), payload zero padded")]
    ShortChunk { len: usize },
}

/// What a fed frame did to the transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReassemblyEvent {
    /// A transfer began, `discarded` bytes of an unfinished one were dropped
    Started { discarded: usize },
    Progress { bytes_so_far: usize },
    Complete(StepSeries),
    /// Frame dropped
    Ignored(ProtocolAnomaly),
    /// Not a step transfer frame
    NotStepFrame,
}

#[derive(Debug, Default)]
pub struct Reassembler {
    state: ReassemblyState,
    anomalies: Vec<ProtocolAnomaly>,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &ReassemblyState {
        &self.state
    }

    pub fn is_accumulating(&self) -> bool {
        matches!(self.state, ReassemblyState::Accumulating(_))
    }

    /// Bytes received so far in the current transfer
    pub fn bytes_so_far(&self) -> usize {
        match &self.state {
            ReassemblyState::Idle => 0,
            ReassemblyState::Accumulating(buf) => buf.len(),
        }
    }

    /// Anomalies seen while accumulating the current transfer, such as
    /// padded short chunks. Cleared when a transfer starts.
    pub fn anomalies(&self) -> &[ProtocolAnomaly] {
        &self.anomalies
    }

    /// Abandon any transfer in flight
    pub fn reset(&mut self) {
        if let ReassemblyState::Accumulating(buf) = &self.state {
            tracing::debug!(discarded = buf.len(), "step transfer abandoned");
        }
        self.state = ReassemblyState::Idle;
        self.anomalies.clear();
    }

    /// Classify and feed a raw frame
    pub fn feed_frame(&mut self, data: &[u8]) -> ReassemblyEvent {
        self.feed(frame::classify(data), data)
    }

    /// Feed an already classified frame; `data` is the raw frame
    pub fn feed(&mut self, kind: FrameKind<'_>, data: &[u8]) -> ReassemblyEvent {
        match kind {
            FrameKind::StepTransferStart => {
                let discarded = self.bytes_so_far();
                if self.is_accumulating() {
                    tracing::warn!(discarded, "step transfer restarted, partial data dropped");
                }
                let capacity = MINUTES_PER_DAY + CHUNK_PAYLOAD_LEN;
                self.state = ReassemblyState::Accumulating(Vec::with_capacity(capacity));
                self.anomalies.clear();
                ReassemblyEvent::Started { discarded }
            }
            FrameKind::StepTransferChunk { marker } => match &mut self.state {
                ReassemblyState::Accumulating(buf) => {
                    append(buf, &mut self.anomalies, data);
                    ReassemblyEvent::Progress { bytes_so_far: buf.len() }
                }
                ReassemblyState::Idle => dropped(ProtocolAnomaly::ChunkOutsideTransfer { marker }),
            },
            FrameKind::StepTransferEnd => match std::mem::take(&mut self.state) {
                ReassemblyState::Accumulating(mut series) => {
                    append(&mut series, &mut self.anomalies, data);
                    tracing::info!(minutes = series.len(), "step transfer complete");
                    ReassemblyEvent::Complete(series)
                }
                ReassemblyState::Idle => dropped(ProtocolAnomaly::EndWithoutStart),
            },
            FrameKind::Other(_) => ReassemblyEvent::NotStepFrame,
        }
    }
}

/// Append the 17 counts of a chunk or end frame
fn append(buf: &mut Vec<u8>, anomalies: &mut Vec<ProtocolAnomaly>, data: &[u8]) {
    let (payload, padded) = frame::chunk_payload(data);
    if padded {
        let anomaly = ProtocolAnomaly::ShortChunk { len: data.len() };
        tracing::warn!(%anomaly, "step frame padded");
        anomalies.push(anomaly);
    }
    buf.extend_from_slice(&payload);
}

fn dropped(anomaly: ProtocolAnomaly) -> ReassemblyEvent {
    tracing::warn!(%anomaly, "step frame dropped");
    ReassemblyEvent::Ignored(anomaly)
}
