//! Integration tests for byte sources
//!
//! These tests exercise sources from the outside: windowed reads over
//! concatenations of fragments from distinct backing buffers, parsing
//! over partially-available streams, and availability as the boundary
//! between backtracking and fatal failure.

use std::sync::Arc;

use byteform::prelude::*;
use byteform::ImmutableList;

/// A stream over a fixed array with a fixed availability frontier.
struct FrontierStream {
    bytes: Vec<u8>,
    frontier: u64,
}

impl ByteStream for FrontierStream {
    fn is_available(&self, offset: u64, length: u64) -> bool {
        match offset.checked_add(length) {
            Some(end) => end <= self.frontier.min(self.bytes.len() as u64),
            None => false,
        }
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<(), String> {
        let start = offset as usize;
        let end = start + buf.len();
        if end > self.bytes.len() {
            return Err(format!("read past end at {}", offset));
        }
        buf.copy_from_slice(&self.bytes[start..end]);
        Ok(())
    }
}

/// Five fragments of five bytes each, every byte equal to its logical
/// index 0..24, each fragment backed by its own buffer.
fn fragmented_counter() -> Arc<Source> {
    let fragments: ImmutableList<Slice> = (0..5u8)
        .map(|chunk| {
            let backing = Source::buffer((chunk * 5..chunk * 5 + 5).collect::<Vec<u8>>());
            Slice::new(backing, 0, 5).unwrap()
        })
        .collect();
    Source::concat(fragments).unwrap()
}

#[test]
fn test_windowed_reads_match_logical_layout_exhaustively() {
    let source = fragmented_counter();
    // Every window over the 25 logical bytes, including empty windows and
    // windows starting or ending exactly on fragment edges.
    for offset in 0..=25u64 {
        for len in 0..=(25 - offset) {
            let expected: Vec<u8> = (offset..offset + len).map(|index| index as u8).collect();
            let read = source
                .read(offset, len)
                .unwrap_or_else(|fault| panic!("read({offset}, {len}) faulted: {fault}"));
            assert_eq!(read, expected, "window ({offset}, {len})");
        }
    }
}

#[test]
fn test_windowed_read_past_total_is_fatal() {
    let source = fragmented_counter();
    assert!(!source.is_available(21, 5));
    assert!(matches!(
        source.read(21, 5),
        Err(ParseFault::ReadOutOfBounds {
            offset: 21,
            length: 5
        })
    ));
}

#[test]
fn test_grammar_parses_across_fragment_boundaries() {
    // A field of 7 bytes starting at 3 spans the first boundary.
    let grammar = GrammarBuilder::new()
        .rule(
            "window",
            seq([def("skip", con(3)), def("body", con(7))]),
        )
        .build();
    let state = grammar
        .parse(fragmented_counter(), 0, Encoding::new())
        .unwrap()
        .expect("span should parse");
    assert_eq!(
        state.lookup("body", None)[0].value().read().unwrap(),
        (3..10).collect::<Vec<u8>>()
    );
}

#[test]
fn test_parsing_stops_at_the_stream_frontier() {
    let grammar = GrammarBuilder::new()
        .rule("records", rep(def("record", con(4))))
        .build();

    // Twelve bytes exist but only ten have arrived; two whole records fit.
    let stream = Arc::new(FrontierStream {
        bytes: (0..12).collect(),
        frontier: 10,
    });
    let state = grammar
        .parse(Source::stream(stream), 0, Encoding::new())
        .unwrap()
        .expect("repetition stops before the frontier");
    assert_eq!(state.offset(), 8);
    assert_eq!(state.lookup("record", None).len(), 2);
}

#[test]
fn test_shifted_stream_rebases_offsets() {
    let stream = Arc::new(FrontierStream {
        bytes: (0..16).collect(),
        frontier: 16,
    });
    let source = Source::stream_at(stream, 12);
    assert_eq!(source.read(0, 4).unwrap(), vec![12, 13, 14, 15]);
    assert!(!source.is_available(4, 1));
}

#[test]
fn test_slices_of_equal_sources_are_equal() {
    // Structural equality of sources carries over to slices, regardless
    // of which allocation backs them.
    let a = Source::buffer(vec![1, 2, 3, 4]);
    let b = Source::buffer(vec![1, 2, 3, 4]);
    assert_eq!(
        Slice::new(a, 1, 2).unwrap(),
        Slice::new(b, 1, 2).unwrap()
    );
}

#[test]
fn test_concat_of_fragments_from_parses() {
    // Fragments cut out of a parsed record reassemble into a new source.
    let grammar = GrammarBuilder::new()
        .rule(
            "record",
            seq([def("head", con(2)), def("skip", con(2)), def("tail", con(2))]),
        )
        .build();
    let state = grammar.parse_bytes(&[10, 11, 0, 0, 12, 13]).unwrap().unwrap();

    let head = state.lookup("head", None)[0].slice().clone();
    let tail = state.lookup("tail", None)[0].slice().clone();
    let fragments: ImmutableList<Slice> = [head, tail].into_iter().collect();
    let stitched = Source::concat(fragments).unwrap();
    assert_eq!(stitched.read(0, 4).unwrap(), vec![10, 11, 12, 13]);
    assert_eq!(stitched.read(1, 2).unwrap(), vec![11, 12]);
}
