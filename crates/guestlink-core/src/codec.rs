//! NUL-delimited frame codec.
//!
//! Guest workers terminate every result with a single `0x00` byte and never
//! escape it, so an embedded NUL in command output splits a frame. Chunks
//! read from a worker connection arrive with arbitrary boundaries; the codec
//! keeps the bytes received since the last boundary and hands back completed
//! frames in stream order.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Frame delimiter byte.
pub const DELIMITER: u8 = 0x00;

/// How a chunk that ends mid-frame is split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoundaryMode {
    /// The piece immediately before the incomplete tail is discarded.
    ///
    /// This is what existing guest tooling was built against: a chunk
    /// `a\0b\0c` yields `a`, keeps `c` pending and loses `b`.
    #[default]
    Legacy,
    /// Every delimited piece becomes a frame.
    Complete,
}

impl fmt::Display for BoundaryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Legacy => f.write_str("legacy"),
            Self::Complete => f.write_str("complete"),
        }
    }
}

impl FromStr for BoundaryMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "legacy" => Ok(Self::Legacy),
            "complete" => Ok(Self::Complete),
            other => Err(Error::Config(format!(
                "Unknown framing mode '{other}' (expected 'legacy' or 'complete')"
            ))),
        }
    }
}

/// Output of decoding one chunk.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Decoded {
    /// Completed frames, in stream order.
    pub frames: Vec<String>,
    /// Piece discarded at a mid-frame chunk boundary ([`BoundaryMode::Legacy`] only).
    pub dropped: Option<String>,
}

/// Per-worker frame accumulator.
#[derive(Debug, Default)]
pub struct FrameCodec {
    buffer: Vec<u8>,
    mode: BoundaryMode,
}

impl FrameCodec {
    pub const fn new(mode: BoundaryMode) -> Self {
        Self {
            buffer: Vec::new(),
            mode,
        }
    }

    pub const fn mode(&self) -> BoundaryMode {
        self.mode
    }

    /// Bytes received since the last frame boundary.
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }

    /// Discard any partially accumulated frame.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Feed one chunk, exactly as read from the connection.
    ///
    /// Must be called in arrival order. Whether the stream currently ends on
    /// a frame boundary is decided by the last byte of `chunk`, not of the
    /// accumulated buffer.
    pub fn decode(&mut self, chunk: &[u8]) -> Decoded {
        self.buffer.extend_from_slice(chunk);
        if !chunk.contains(&DELIMITER) {
            return Decoded::default();
        }

        let buffer = std::mem::take(&mut self.buffer);
        let mut pieces: Vec<&[u8]> = buffer.split(|b| *b == DELIMITER).collect();
        // `split` always yields at least one piece.
        let tail = pieces.pop().unwrap_or_default();

        let mut dropped = None;
        if chunk.last() != Some(&DELIMITER) {
            self.buffer = tail.to_vec();
            if self.mode == BoundaryMode::Legacy {
                dropped = pieces.pop().map(lossy);
            }
        }

        Decoded {
            frames: pieces.into_iter().map(lossy).collect(),
            dropped,
        }
    }
}

fn lossy(piece: &[u8]) -> String {
    String::from_utf8_lossy(piece).into_owned()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn frames(codec: &mut FrameCodec, chunk: &[u8]) -> Vec<String> {
        codec.decode(chunk).frames
    }

    #[test]
    fn chunk_ending_mid_frame_drops_adjacent_piece() {
        let mut codec = FrameCodec::default();
        let decoded = codec.decode(b"a\0b\0c");

        assert_eq!(decoded.frames, vec!["a"]);
        assert_eq!(decoded.dropped.as_deref(), Some("b"));
        assert_eq!(codec.pending(), b"c");
    }

    #[test]
    fn chunk_ending_on_delimiter_resets_buffer() {
        let mut codec = FrameCodec::default();
        let decoded = codec.decode(b"a\0b\0");

        assert_eq!(decoded.frames, vec!["a", "b"]);
        assert!(decoded.dropped.is_none());
        assert!(codec.pending().is_empty());
    }

    #[test]
    fn consecutive_chunks_keep_order() {
        let mut codec = FrameCodec::default();
        let mut all = frames(&mut codec, b"a\0");
        all.extend(frames(&mut codec, b"b\0"));
        assert_eq!(all, vec!["a", "b"]);
    }

    #[test]
    fn partial_frame_accumulates_until_delimiter() {
        let mut codec = FrameCodec::default();
        assert!(frames(&mut codec, b"hel").is_empty());
        assert!(frames(&mut codec, b"lo wo").is_empty());
        assert_eq!(codec.pending(), b"hello wo");
        assert_eq!(frames(&mut codec, b"rld\0"), vec!["hello world"]);
        assert!(codec.pending().is_empty());
    }

    #[test]
    fn single_frame_then_tail_loses_the_frame_in_legacy_mode() {
        let mut codec = FrameCodec::default();
        let decoded = codec.decode(b"x\0y");
        assert!(decoded.frames.is_empty());
        assert_eq!(decoded.dropped.as_deref(), Some("x"));
        assert_eq!(codec.pending(), b"y");
    }

    #[test]
    fn complete_mode_keeps_adjacent_piece() {
        let mut codec = FrameCodec::new(BoundaryMode::Complete);
        let decoded = codec.decode(b"a\0b\0c");
        assert_eq!(decoded.frames, vec!["a", "b"]);
        assert!(decoded.dropped.is_none());
        assert_eq!(codec.pending(), b"c");
        assert_eq!(frames(&mut codec, b"\0"), vec!["c"]);
    }

    #[test]
    fn empty_frames_are_preserved() {
        let mut codec = FrameCodec::default();
        assert_eq!(frames(&mut codec, b"a\0\0"), vec!["a", ""]);
    }

    #[test]
    fn empty_chunk_is_a_no_op() {
        let mut codec = FrameCodec::default();
        codec.decode(b"abc");
        assert!(frames(&mut codec, b"").is_empty());
        assert_eq!(codec.pending(), b"abc");
    }

    #[test]
    fn multibyte_character_split_across_chunks() {
        let mut codec = FrameCodec::default();
        let text = "caf\u{e9}\0".as_bytes();
        let (head, rest) = text.split_at(4);
        assert!(frames(&mut codec, head).is_empty());
        assert_eq!(frames(&mut codec, rest), vec!["caf\u{e9}"]);
    }

    #[test]
    fn every_delimiter_yields_one_frame_in_complete_mode() {
        let stream = b"one\0two\0\0three four\0five\0";
        let expected = stream.iter().filter(|b| **b == DELIMITER).count();

        for split in 0..=stream.len() {
            let (head, tail) = stream.split_at(split);
            let mut codec = FrameCodec::new(BoundaryMode::Complete);
            let mut all = frames(&mut codec, head);
            all.extend(frames(&mut codec, tail));
            assert_eq!(all.len(), expected, "split at {split}");
            assert_eq!(all, vec!["one", "two", "", "three four", "five"]);
        }
    }

    #[test]
    fn legacy_mode_is_lossless_when_chunks_end_on_boundaries() {
        let mut codec = FrameCodec::default();
        let mut all = Vec::new();
        for chunk in [&b"pa"[..], b"rt\0", b"x\0y\0", b"z", b"\0"] {
            all.extend(frames(&mut codec, chunk));
        }
        assert_eq!(all, vec!["part", "x", "y", "z"]);
    }

    #[test]
    fn reset_discards_pending_bytes() {
        let mut codec = FrameCodec::default();
        codec.decode(b"partial");
        codec.reset();
        assert!(codec.pending().is_empty());
        assert_eq!(frames(&mut codec, b"next\0"), vec!["next"]);
    }

    #[test]
    fn reset_keeps_boundary_mode() {
        let mut codec = FrameCodec::new(BoundaryMode::Complete);
        codec.decode(b"a\0b\0par");
        codec.reset();
        assert_eq!(codec.mode(), BoundaryMode::Complete);
        let decoded = codec.decode(b"x\0y\0z");
        assert_eq!(decoded.frames, vec!["x", "y"]);
        assert!(decoded.dropped.is_none());
    }

    #[test]
    fn boundary_mode_parses_from_str() {
        assert_eq!("legacy".parse::<BoundaryMode>().unwrap(), BoundaryMode::Legacy);
        assert_eq!(" Complete ".parse::<BoundaryMode>().unwrap(), BoundaryMode::Complete);
        assert!("strict".parse::<BoundaryMode>().is_err());
    }
}
