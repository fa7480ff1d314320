// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Output batch model and wire framing.
//!
//! One `LoggerBatch` is emitted per logger per successful poll and published
//! as a single bus message: a u32 big-endian length prefix followed by the
//! bincode-encoded body. The `transmission_id` doubles as the JetStream
//! `Nats-Msg-Id` dedupe key.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Link layer the samples arrived over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalType {
    Unspecified,
    NbIot,
}

/// One measurement value for one channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Platform channel ID the value belongs to.
    pub channel_id: u64,
    pub value: f64,
    /// Sample timestamp (epoch seconds).
    pub ts: u64,
}

/// One radio signal-strength reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoggerSignal {
    pub ts: u64,
    pub value: f64,
}

/// Everything observed for one logger in one poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggerBatch {
    /// Platform logger ID.
    pub logger_id: u64,
    /// Timestamp of the newest sample in this batch (epoch seconds).
    pub last_seen: u64,
    pub signal_type: SignalType,
    pub samples: Vec<Sample>,
    pub signals: Vec<LoggerSignal>,
    /// Mean of the per-sample battery voltage readings, when any were seen.
    pub battery: Option<f64>,
    /// Dedupe key attached as the per-message `Nats-Msg-Id` header.
    pub transmission_id: String,
}

impl LoggerBatch {
    /// Empty batch for `logger_id`.
    pub fn new(logger_id: u64, signal_type: SignalType) -> Self {
        Self {
            logger_id,
            last_seen: 0,
            signal_type,
            samples: Vec::new(),
            signals: Vec::new(),
            battery: None,
            transmission_id: String::new(),
        }
    }

    /// Seal the batch: set the watermark and derive the dedupe key from it.
    pub fn seal(&mut self, last_seen: u64) {
        self.last_seen = last_seen;
        self.transmission_id = format!("{}-{}", self.logger_id, last_seen);
    }
}

/// Wire framing errors (decode side).
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame truncated: {have} bytes, need {need}")]
    Truncated { have: usize, need: usize },

    #[error(transparent)]
    Codec(#[from] bincode::Error),
}

/// Encode a batch as a length-prefixed bincode frame.
pub fn encode_frame(batch: &LoggerBatch) -> Result<Vec<u8>, bincode::Error> {
    let body = bincode::serialize(batch)?;
    let mut frame = Vec::with_capacity(4 + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Decode a frame produced by [`encode_frame`].
pub fn decode_frame(frame: &[u8]) -> Result<LoggerBatch, FrameError> {
    if frame.len() < 4 {
        return Err(FrameError::Truncated {
            have: frame.len(),
            need: 4,
        });
    }
    let len = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
    let body = &frame[4..];
    if body.len() < len {
        return Err(FrameError::Truncated {
            have: body.len(),
            need: len,
        });
    }
    Ok(bincode::deserialize(&body[..len])?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_batch() -> LoggerBatch {
        let mut batch = LoggerBatch::new(7, SignalType::NbIot);
        batch.samples.push(Sample {
            channel_id: 101,
            value: 45.2,
            ts: 1_700_000_900,
        });
        batch.signals.push(LoggerSignal {
            ts: 1_700_000_900,
            value: -82.0,
        });
        batch.battery = Some(3.6);
        batch.seal(1_700_000_900);
        batch
    }

    #[test]
    fn test_seal_derives_transmission_id() {
        let batch = sample_batch();
        assert_eq!(batch.last_seen, 1_700_000_900);
        assert_eq!(batch.transmission_id, "7-1700000900");
    }

    #[test]
    fn test_frame_round_trip() {
        let batch = sample_batch();
        let frame = encode_frame(&batch).expect("encode");
        assert_eq!(
            u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize,
            frame.len() - 4
        );
        let decoded = decode_frame(&frame).expect("decode");
        assert_eq!(decoded, batch);
    }

    #[test]
    fn test_decode_rejects_truncated_frame() {
        let frame = encode_frame(&sample_batch()).expect("encode");
        assert!(matches!(
            decode_frame(&frame[..2]),
            Err(FrameError::Truncated { .. })
        ));
        assert!(matches!(
            decode_frame(&frame[..frame.len() - 1]),
            Err(FrameError::Truncated { .. })
        ));
    }
}
