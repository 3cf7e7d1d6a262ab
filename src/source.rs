//! Byte Sources and Slices
//!
//! Everything the engine reads goes through a [`Source`]: an addressable,
//! lazily-read provider of bytes. Four variants share one contract —
//! [`is_available`](Source::is_available) is side-effect-free and agrees
//! exactly with [`read`](Source::read) succeeding:
//!
//! - [`Source::buffer`] — a fixed in-memory byte buffer
//! - [`Source::stream`] — a pull-based stream with an unbounded length,
//!   read lazily behind a memoizing prefix cache
//! - [`Source::derived`] — bytes computed by evaluating an expression
//!   against a parse state (e.g. decompressed or hashed field content)
//! - [`Source::concat`] — the logical concatenation of discontiguous
//!   slices, read through an iterative windowed walk
//!
//! A [`Slice`] is a bounds-checked `(source, offset, length)` handle, never
//! a copy; constructing one validates availability and yields `None`
//! otherwise. Reading past declared availability is a fatal
//! [`ParseFault`], not a backtrackable mismatch — the engine cannot
//! sensibly continue past an unreadable byte source.

use std::sync::{Arc, Mutex};

use crate::error::ParseFault;
use crate::expr::Expr;
use crate::list::ImmutableList;
use crate::state::ParseState;
use crate::trampoline::Trampoline;
use crate::value::Value;

/// A pull-based provider of bytes with a possibly unbounded length.
///
/// Reads are plain synchronous calls; availability beyond the provider's
/// current frontier may be `false` and later become `true`.
pub trait ByteStream: Send + Sync {
    /// Whether `length` bytes at `offset` can currently be read.
    /// Side-effect-free.
    fn is_available(&self, offset: u64, length: u64) -> bool;

    /// Fill `buf` with the bytes starting at `offset`.
    ///
    /// Called only for regions reported available; an error here is a
    /// medium failure, not a grammar condition.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<(), String>;
}

/// Memoizing prefix cache in front of a [`ByteStream`].
///
/// Holds every byte read so far as one contiguous prefix. Guarded by a
/// mutex so a concurrent first read either finds the fully-computed prefix
/// or blocks until one reader finishes extending it; a partial extension
/// is never observable.
struct StreamCache {
    prefix: Vec<u8>,
}

/// An immutable provider of bytes addressed by `(offset, length)`.
///
/// Sources are shared behind `Arc` and never mutated after construction,
/// apart from the internal memoizing caches noted per variant. Equality is
/// structural per variant and ignores cache contents.
pub enum Source {
    /// Fixed in-memory bytes.
    Buffer {
        /// The backing bytes.
        bytes: Arc<[u8]>,
    },

    /// A lazily-read stream, optionally shifted to a non-zero start offset
    /// within the provider.
    Stream {
        /// The underlying provider.
        stream: Arc<dyn ByteStream>,
        /// Offset within the provider where this source's offset 0 lies.
        shift: u64,
        /// Memoized prefix of bytes read so far (relative to `shift`).
        cache: Mutex<StreamCache>,
    },

    /// Bytes computed once from an expression evaluated against a parse
    /// state. The caller evaluates at construction; the result is
    /// retained for the lifetime of the source.
    Derived {
        /// The expression whose result provides the bytes.
        expr: Arc<Expr>,
        /// Which result of the (possibly multi-valued) evaluation to use.
        index: usize,
        /// The state the expression was evaluated against.
        state: Arc<ParseState>,
        /// The memoized bytes.
        bytes: Arc<[u8]>,
    },

    /// Logical concatenation, in declared order, of slices that need not
    /// be contiguous or share a backing source.
    Concat {
        /// The fragments, in declared order.
        fragments: ImmutableList<Slice>,
        /// Total length, computed once at construction. Never zero.
        total: u64,
    },
}

impl Source {
    /// A source over fixed in-memory bytes.
    pub fn buffer(bytes: impl Into<Arc<[u8]>>) -> Arc<Source> {
        Arc::new(Source::Buffer {
            bytes: bytes.into(),
        })
    }

    /// A source over a pull-based stream, starting at provider offset 0.
    pub fn stream(stream: Arc<dyn ByteStream>) -> Arc<Source> {
        Source::stream_at(stream, 0)
    }

    /// A source over a pull-based stream whose offset 0 maps to provider
    /// offset `shift`.
    pub fn stream_at(stream: Arc<dyn ByteStream>, shift: u64) -> Arc<Source> {
        Arc::new(Source::Stream {
            stream,
            shift,
            cache: Mutex::new(StreamCache { prefix: Vec::new() }),
        })
    }

    /// A source whose bytes are result `index` of evaluating `expr`
    /// against `state`.
    ///
    /// `results` must be that evaluation; the caller evaluates once and
    /// shares the result list across sibling sources. Fewer than
    /// `index + 1` results, or the not-a-value sentinel at `index`, means
    /// the source could never become available and is fatal.
    pub fn derived(
        expr: Arc<Expr>,
        index: usize,
        state: Arc<ParseState>,
        results: &[Option<Value>],
    ) -> Result<Arc<Source>, ParseFault> {
        let Some(result) = results.get(index) else {
            return Err(ParseFault::DerivedSourceUnavailable {
                index,
                produced: results.len(),
            });
        };
        let bytes = match result {
            Some(value) => value.read()?,
            None => return Err(ParseFault::NotAValue { index }),
        };
        Ok(Arc::new(Source::Derived {
            expr,
            index,
            state,
            bytes: bytes.into(),
        }))
    }

    /// A source concatenating `fragments` in declared order.
    ///
    /// The total length is computed once here; a concatenation that would
    /// be empty yields no source.
    pub fn concat(fragments: ImmutableList<Slice>) -> Option<Arc<Source>> {
        let total: u64 = fragments.iter().map(Slice::length).sum();
        if total == 0 {
            return None;
        }
        Some(Arc::new(Source::Concat { fragments, total }))
    }

    /// Whether `length` bytes at `offset` can be read. Side-effect-free
    /// and never fails for well-formed arguments.
    pub fn is_available(&self, offset: u64, length: u64) -> bool {
        let Some(end) = offset.checked_add(length) else {
            return false;
        };
        match self {
            Source::Buffer { bytes } => end <= bytes.len() as u64,
            Source::Stream { stream, shift, .. } => match shift.checked_add(offset) {
                Some(start) => stream.is_available(start, length),
                None => false,
            },
            Source::Derived { bytes, .. } => end <= bytes.len() as u64,
            Source::Concat { total, .. } => end <= *total,
        }
    }

    /// Read exactly `length` bytes at `offset`.
    ///
    /// Fails with a fatal fault if the region is not available or the
    /// underlying medium errors.
    pub fn read(&self, offset: u64, length: u64) -> Result<Vec<u8>, ParseFault> {
        if length == 0 {
            return Ok(Vec::new());
        }
        if !self.is_available(offset, length) {
            return Err(ParseFault::ReadOutOfBounds { offset, length });
        }
        let len = usize::try_from(length).map_err(|_| ParseFault::InvalidSize {
            value: length.to_string(),
        })?;
        match self {
            Source::Buffer { bytes } => {
                let start = offset as usize;
                Ok(bytes[start..start + len].to_vec())
            }
            Source::Stream {
                stream,
                shift,
                cache,
            } => read_stream(stream.as_ref(), *shift, cache, offset, len),
            Source::Derived { bytes, .. } => {
                let start = offset as usize;
                Ok(bytes[start..start + len].to_vec())
            }
            Source::Concat { fragments, .. } => read_window(fragments, offset, len),
        }
    }
}

/// Read through the stream's memoized prefix cache, extending it as needed.
fn read_stream(
    stream: &dyn ByteStream,
    shift: u64,
    cache: &Mutex<StreamCache>,
    offset: u64,
    len: usize,
) -> Result<Vec<u8>, ParseFault> {
    let start = usize::try_from(offset).map_err(|_| ParseFault::InvalidSize {
        value: offset.to_string(),
    })?;
    let end = start + len;
    let mut guard = cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if guard.prefix.len() < end {
        let filled = guard.prefix.len();
        let mut extension = vec![0u8; end - filled];
        stream
            .read_at(shift + filled as u64, &mut extension)
            .map_err(|message| ParseFault::IoFailure {
                offset: offset + filled as u64,
                message,
            })?;
        guard.prefix.extend_from_slice(&extension);
    }
    Ok(guard.prefix[start..end].to_vec())
}

/// Windowed read across concatenated fragments.
///
/// Walks fragments in declared order keeping a running start offset; skips
/// fragments entirely before the window, clips the first overlapping
/// fragment, and copies each overlap into the output at the destination
/// cursor until the requested length is satisfied. A read starting exactly
/// at a fragment boundary attributes to the later fragment. Fragment count
/// is unbounded, so the walk runs on the trampoline.
fn read_window(
    fragments: &ImmutableList<Slice>,
    offset: u64,
    len: usize,
) -> Result<Vec<u8>, ParseFault> {
    let out = vec![0u8; len];
    window_step(fragments.clone(), 0, offset, len as u64, out, 0).run()
}

fn window_step(
    fragments: ImmutableList<Slice>,
    running: u64,
    offset: u64,
    remaining: u64,
    mut out: Vec<u8>,
    cursor: usize,
) -> Trampoline<Result<Vec<u8>, ParseFault>> {
    if remaining == 0 {
        return Trampoline::done(Ok(out));
    }
    let Some(fragment) = fragments.head().cloned() else {
        // Availability was checked against the precomputed total, so
        // running out of fragments mid-window is an internal inconsistency.
        return Trampoline::done(Err(ParseFault::ReadOutOfBounds {
            offset,
            length: remaining,
        }));
    };
    let tail = fragments.tail();
    let fragment_end = running + fragment.length();
    if fragment_end <= offset {
        // Entirely before the window; boundary starts belong to the later
        // fragment.
        return Trampoline::pending(move || {
            window_step(tail, fragment_end, offset, remaining, out, cursor)
        });
    }
    let local_start = offset.saturating_sub(running);
    let local_len = (fragment.length() - local_start).min(remaining);
    let chunk = match fragment.read_within(local_start, local_len) {
        Ok(chunk) => chunk,
        Err(fault) => return Trampoline::done(Err(fault)),
    };
    out[cursor..cursor + chunk.len()].copy_from_slice(&chunk);
    let next_cursor = cursor + chunk.len();
    let next_offset = offset + local_len;
    let next_remaining = remaining - local_len;
    Trampoline::pending(move || {
        window_step(tail, fragment_end, next_offset, next_remaining, out, next_cursor)
    })
}

impl PartialEq for Source {
    /// Structural equality per variant; memoizing caches are excluded.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Source::Buffer { bytes: a }, Source::Buffer { bytes: b }) => a == b,
            (
                Source::Stream {
                    stream: s1,
                    shift: k1,
                    ..
                },
                Source::Stream {
                    stream: s2,
                    shift: k2,
                    ..
                },
            ) => Arc::ptr_eq(s1, s2) && k1 == k2,
            (
                Source::Derived {
                    expr: e1,
                    index: i1,
                    state: st1,
                    ..
                },
                Source::Derived {
                    expr: e2,
                    index: i2,
                    state: st2,
                    ..
                },
            ) => e1 == e2 && i1 == i2 && st1 == st2,
            (
                Source::Concat {
                    fragments: f1,
                    total: t1,
                },
                Source::Concat {
                    fragments: f2,
                    total: t2,
                },
            ) => t1 == t2 && f1 == f2,
            _ => false,
        }
    }
}

impl Eq for Source {}

impl std::hash::Hash for Source {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        match self {
            Source::Buffer { bytes } => {
                0u8.hash(state);
                bytes.hash(state);
            }
            Source::Stream { stream, shift, .. } => {
                1u8.hash(state);
                (Arc::as_ptr(stream) as *const u8 as usize).hash(state);
                shift.hash(state);
            }
            Source::Derived { expr, index, .. } => {
                // The captured state participates in equality but not the
                // hash; hashing a subset keeps equal values hashing equal.
                2u8.hash(state);
                expr.hash(state);
                index.hash(state);
            }
            Source::Concat { fragments, total } => {
                3u8.hash(state);
                total.hash(state);
                fragments.hash(state);
            }
        }
    }
}

impl std::fmt::Debug for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Source::Buffer { bytes } => {
                f.debug_struct("Buffer").field("len", &bytes.len()).finish()
            }
            Source::Stream { shift, .. } => {
                f.debug_struct("Stream").field("shift", shift).finish()
            }
            Source::Derived { index, bytes, .. } => f
                .debug_struct("Derived")
                .field("index", index)
                .field("len", &bytes.len())
                .finish(),
            Source::Concat { fragments, total } => f
                .debug_struct("Concat")
                .field("fragments", &fragments.size())
                .field("total", total)
                .finish(),
        }
    }
}

/// A bounds-checked `(source, offset, length)` view over a byte source.
///
/// A lightweight handle, not a copy. Two slices are equal iff source,
/// offset and length are all equal — structural, not content, equality.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Slice {
    source: Arc<Source>,
    offset: u64,
    length: u64,
}

impl Slice {
    /// Create a slice, validating that the region is available.
    ///
    /// Yields `None` when it is not; a half-constructed slice never
    /// exists.
    pub fn new(source: Arc<Source>, offset: u64, length: u64) -> Option<Slice> {
        if source.is_available(offset, length) {
            Some(Slice {
                source,
                offset,
                length,
            })
        } else {
            None
        }
    }

    /// The backing source.
    #[inline]
    pub fn source(&self) -> &Arc<Source> {
        &self.source
    }

    /// Start offset within the source.
    #[inline]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Length in bytes.
    #[inline]
    pub fn length(&self) -> u64 {
        self.length
    }

    /// Read the whole slice.
    pub fn read(&self) -> Result<Vec<u8>, ParseFault> {
        self.source.read(self.offset, self.length)
    }

    /// Read a sub-window of this slice, addressed relative to its start.
    pub fn read_within(&self, offset: u64, length: u64) -> Result<Vec<u8>, ParseFault> {
        if offset + length > self.length {
            return Err(ParseFault::ReadOutOfBounds {
                offset: self.offset + offset,
                length,
            });
        }
        self.source.read(self.offset + offset, length)
    }
}

impl std::fmt::Debug for Slice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Slice({}..{})", self.offset, self.offset + self.length)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A stream over a fixed array with a movable availability frontier.
    struct ArrayStream {
        bytes: Vec<u8>,
        frontier: u64,
    }

    impl ByteStream for ArrayStream {
        fn is_available(&self, offset: u64, length: u64) -> bool {
            offset + length <= self.frontier.min(self.bytes.len() as u64)
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

    fn counting_buffer(len: u8) -> Arc<Source> {
        Source::buffer((0..len).collect::<Vec<u8>>())
    }

    #[test]
    fn test_derived_sources_share_one_evaluation() {
        use crate::dsl::{con, def, ref_};
        use crate::value::{Encoding, ParseValue};

        let backing = Source::buffer(vec![0x0A, 0x0B]);
        let token = Arc::new(def("entry", con(1)));
        let mut state = ParseState::new(Arc::clone(&backing), Arc::clone(&token), 0);
        for offset in 0..2 {
            let slice = Slice::new(Arc::clone(&backing), offset, 1).unwrap();
            state = state.add_value(Arc::new(ParseValue::new(
                "entry",
                Arc::clone(&token),
                slice,
                Encoding::new(),
            )));
        }
        let expr = Arc::new(ref_("entry"));
        let state = Arc::new(state);
        let results = expr.eval(&state, &Encoding::new()).unwrap();
        assert_eq!(results.len(), 2);

        // Sibling sources are built from the one shared result list.
        let first = Source::derived(Arc::clone(&expr), 0, Arc::clone(&state), &results).unwrap();
        let second = Source::derived(Arc::clone(&expr), 1, Arc::clone(&state), &results).unwrap();
        assert_eq!(first.read(0, 1).unwrap(), vec![0x0A]);
        assert_eq!(second.read(0, 1).unwrap(), vec![0x0B]);

        let fault = Source::derived(expr, 2, state, &results).unwrap_err();
        assert!(matches!(
            fault,
            ParseFault::DerivedSourceUnavailable {
                index: 2,
                produced: 2
            }
        ));
    }

    #[test]
    fn test_buffer_availability() {
        let source = counting_buffer(10);
        assert!(source.is_available(0, 10));
        assert!(source.is_available(9, 1));
        assert!(source.is_available(10, 0));
        assert!(!source.is_available(9, 2));
        assert!(!source.is_available(u64::MAX, 1));
    }

    #[test]
    fn test_buffer_read() {
        let source = counting_buffer(10);
        assert_eq!(source.read(3, 4).unwrap(), vec![3, 4, 5, 6]);
        assert_eq!(source.read(0, 0).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_buffer_read_out_of_bounds_is_fatal() {
        let source = counting_buffer(4);
        let fault = source.read(2, 5).unwrap_err();
        assert_eq!(
            fault,
            ParseFault::ReadOutOfBounds {
                offset: 2,
                length: 5
            }
        );
    }

    #[test]
    fn test_slice_validates_on_construction() {
        let source = counting_buffer(8);
        assert!(Slice::new(Arc::clone(&source), 0, 8).is_some());
        assert!(Slice::new(Arc::clone(&source), 4, 4).is_some());
        assert!(Slice::new(source, 4, 5).is_none());
    }

    #[test]
    fn test_slice_structural_equality() {
        let source = counting_buffer(8);
        let a = Slice::new(Arc::clone(&source), 2, 3).unwrap();
        let b = Slice::new(Arc::clone(&source), 2, 3).unwrap();
        let c = Slice::new(source, 2, 4).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_stream_source_reads_through_cache() {
        let stream = Arc::new(ArrayStream {
            bytes: (0..20).collect(),
            frontier: 20,
        });
        let source = Source::stream(stream);
        assert_eq!(source.read(5, 3).unwrap(), vec![5, 6, 7]);
        // Second read within the memoized prefix.
        assert_eq!(source.read(0, 2).unwrap(), vec![0, 1]);
        assert_eq!(source.read(10, 5).unwrap(), vec![10, 11, 12, 13, 14]);
    }

    #[test]
    fn test_stream_source_with_shift() {
        let stream = Arc::new(ArrayStream {
            bytes: (0..20).collect(),
            frontier: 20,
        });
        let source = Source::stream_at(stream, 10);
        assert_eq!(source.read(0, 3).unwrap(), vec![10, 11, 12]);
        assert!(!source.is_available(11, 1));
    }

    #[test]
    fn test_stream_frontier_limits_availability() {
        let stream = Arc::new(ArrayStream {
            bytes: (0..20).collect(),
            frontier: 8,
        });
        let source = Source::stream(stream);
        assert!(source.is_available(0, 8));
        assert!(!source.is_available(0, 9));
    }

    fn fragment(source: &Arc<Source>, offset: u64, length: u64) -> Slice {
        Slice::new(Arc::clone(source), offset, length).unwrap()
    }

    #[test]
    fn test_concat_rejects_zero_length() {
        let fragments: ImmutableList<Slice> = ImmutableList::new();
        assert!(Source::concat(fragments).is_none());

        let backing = counting_buffer(4);
        let zero = fragment(&backing, 2, 0);
        let fragments: ImmutableList<Slice> = [zero].into_iter().collect();
        assert!(Source::concat(fragments).is_none());
    }

    #[test]
    fn test_concat_windowed_read() {
        let backing = counting_buffer(25);
        // Fragments [0..5), [5..10), [10..15) concatenated back together.
        let fragments: ImmutableList<Slice> = [
            fragment(&backing, 0, 5),
            fragment(&backing, 5, 5),
            fragment(&backing, 10, 5),
        ]
        .into_iter()
        .collect();
        let concat = Source::concat(fragments).unwrap();
        assert!(concat.is_available(0, 15));
        assert!(!concat.is_available(0, 16));
        // Spanning two boundaries.
        assert_eq!(concat.read(3, 9).unwrap(), (3..12).collect::<Vec<u8>>());
        // Exactly at a boundary attributes to the later fragment.
        assert_eq!(concat.read(5, 5).unwrap(), (5..10).collect::<Vec<u8>>());
        assert_eq!(concat.read(14, 1).unwrap(), vec![14]);
    }

    #[test]
    fn test_concat_of_discontiguous_fragments() {
        let backing = counting_buffer(25);
        // Out-of-order, non-adjacent windows of the same buffer.
        let fragments: ImmutableList<Slice> =
            [fragment(&backing, 20, 5), fragment(&backing, 3, 2)]
                .into_iter()
                .collect();
        let concat = Source::concat(fragments).unwrap();
        assert_eq!(
            concat.read(0, 7).unwrap(),
            vec![20, 21, 22, 23, 24, 3, 4]
        );
        assert_eq!(concat.read(4, 2).unwrap(), vec![24, 3]);
    }

    #[test]
    fn test_concat_zero_length_read() {
        let backing = counting_buffer(10);
        let fragments: ImmutableList<Slice> = [fragment(&backing, 0, 10)].into_iter().collect();
        let concat = Source::concat(fragments).unwrap();
        assert_eq!(concat.read(4, 0).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_concat_many_fragments_is_stack_safe() {
        let backing = counting_buffer(100);
        let fragments: ImmutableList<Slice> =
            (0..50_000).map(|_| fragment(&backing, 0, 1)).collect();
        let concat = Source::concat(fragments).unwrap();
        assert_eq!(concat.read(49_999, 1).unwrap(), vec![0]);
    }

    #[test]
    fn test_source_equality() {
        let a = Source::buffer(vec![1u8, 2, 3]);
        let b = Source::buffer(vec![1u8, 2, 3]);
        let c = Source::buffer(vec![1u8, 2, 4]);
        assert_eq!(*a, *b);
        assert_ne!(*a, *c);
    }
}
