//! Wire frames exchanged between the root rank and the worker ranks.
//!
//! Frames are serialized with `serde_json` (with `float_roundtrip`, so every
//! `f64` survives the trip bit for bit).

use serde::{Deserialize, Serialize};
use wavefront_core::Chunk;

use crate::backend::TransportError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Frame {
    /// Matrix size and seeded main diagonal, broadcast once.
    Seed { size: usize, diagonal: Vec<f64> },
    /// This rank's share of the active diagonal, if any.
    Work { chunk: Option<Chunk> },
    /// Values computed for a chunk, in row order.
    Partial { chunk: Option<Chunk>, values: Vec<f64> },
    /// A completed upper diagonal.
    Diagonal { k: usize, values: Vec<f64> },
    /// The full authoritative matrix, row-major.
    Matrix { cells: Vec<f64> },
    Stop,
}

impl Frame {
    pub fn encode(&self) -> Result<Vec<u8>, TransportError> {
        serde_json::to_vec(self).map_err(|e| TransportError::Encode(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, TransportError> {
        serde_json::from_slice(bytes).map_err(|e| TransportError::Decode(e.to_string()))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Seed { .. } => "seed",
            Frame::Work { .. } => "work",
            Frame::Partial { .. } => "partial",
            Frame::Diagonal { .. } => "diagonal",
            Frame::Matrix { .. } => "matrix",
            Frame::Stop => "stop",
        }
    }

    /// Error for a frame that arrived where `expected` was due.
    pub fn unexpected(&self, expected: &str) -> TransportError {
        TransportError::UnexpectedFrame {
            expected: expected.into(),
            found: self.kind().into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_values_survive_exactly() {
        let values = vec![1.0 / 3.0, -0.1, f64::MIN_POSITIVE, 2.0_f64.cbrt()];
        let frame = Frame::Diagonal { k: 3, values: values.clone() };
        match Frame::decode(&frame.encode().unwrap()).unwrap() {
            Frame::Diagonal { k, values: decoded } => {
                assert_eq!(k, 3);
                for (a, b) in values.iter().zip(&decoded) {
                    assert_eq!(a.to_bits(), b.to_bits());
                }
            }
            other => panic!("unexpected frame {:?}", other),
        }
    }

    #[test]
    fn test_garbage_is_a_decode_error() {
        assert!(matches!(
            Frame::decode(b"not a frame"),
            Err(TransportError::Decode(_))
        ));
    }
}
