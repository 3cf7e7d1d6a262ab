//! Parse State
//!
//! A [`ParseState`] bundles everything a parse-in-progress is: the graph
//! built so far, the cursor (source and offset), iteration counters for
//! enclosing repetitions, the back-references already taken on the
//! current descent path, and the scope depth for name visibility. States
//! are immutable; every transition derives a new state sharing structure
//! with the old one, so speculative branches backtrack by simply being
//! dropped.
//!
//! Name lookup goes through a cache mapping each bound name to its values
//! with their recording depths, maintained incrementally as values are
//! added. Replacing the graph wholesale invalidates the cache — an
//! incremental update cannot be trusted then — and lookups fall back to
//! rebuilding the index from the graph on demand.

use std::sync::Arc;

use ahash::RandomState;
use hashbrown::HashMap;

use crate::error::ParseFault;
use crate::graph::{ParseGraph, ParseItem};
use crate::list::ImmutableList;
use crate::source::Source;
use crate::token::Token;
use crate::trampoline::Trampoline;
use crate::value::{ParseReference, ParseValue};

type CacheMap = HashMap<String, ImmutableList<CacheEntry>, RandomState>;

/// A cached value binding, tagged with the scope depth it was recorded at.
#[derive(Debug, Clone, PartialEq, Eq)]
struct CacheEntry {
    value: Arc<ParseValue>,
    depth: u64,
}

/// Index of bound names, most recent binding first per name.
#[derive(Debug, Clone)]
enum ValueCache {
    /// Maintained incrementally alongside graph appends.
    Ready(Arc<CacheMap>),
    /// The graph was replaced wholesale; rebuild from it on demand.
    Invalidated,
}

/// An immutable snapshot of a parse in progress.
#[derive(Debug, Clone)]
pub struct ParseState {
    graph: Arc<ParseGraph>,
    cache: ValueCache,
    source: Arc<Source>,
    offset: u64,
    iterations: ImmutableList<u64>,
    references: ImmutableList<ParseReference>,
    scope_depth: u64,
}

impl ParseState {
    /// The initial state: an open root scope for `root`, cursor at
    /// `offset` within `source`, nothing parsed yet.
    pub fn new(source: Arc<Source>, root: Arc<Token>, offset: u64) -> ParseState {
        ParseState {
            graph: Arc::new(ParseGraph::open(root)),
            cache: ValueCache::Ready(Arc::new(CacheMap::default())),
            source,
            offset,
            iterations: ImmutableList::new(),
            references: ImmutableList::new(),
            scope_depth: 0,
        }
    }

    /// The graph built so far.
    #[inline]
    pub fn graph(&self) -> &Arc<ParseGraph> {
        &self.graph
    }

    /// The source the cursor reads from.
    #[inline]
    pub fn source(&self) -> &Arc<Source> {
        &self.source
    }

    /// The cursor's byte offset.
    #[inline]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Depth of enclosing name-visibility scopes.
    #[inline]
    pub fn scope_depth(&self) -> u64 {
        self.scope_depth
    }

    /// Back-references taken on the descent path leading here, most
    /// recent first.
    #[inline]
    pub fn references(&self) -> &ImmutableList<ParseReference> {
        &self.references
    }

    /// Iteration count of the innermost enclosing repetition.
    #[inline]
    pub fn current_iteration(&self) -> Option<u64> {
        self.iterations.head().copied()
    }

    /// Record a matched leaf value in the innermost open scope.
    pub fn add_value(&self, value: Arc<ParseValue>) -> ParseState {
        let cache = match &self.cache {
            ValueCache::Ready(map) => {
                let mut map = (**map).clone();
                let slot = map.entry(value.name().to_string()).or_default();
                *slot = slot.push(CacheEntry {
                    value: Arc::clone(&value),
                    depth: self.scope_depth,
                });
                ValueCache::Ready(Arc::new(map))
            }
            ValueCache::Invalidated => ValueCache::Invalidated,
        };
        ParseState {
            graph: Arc::new(self.graph.append(ParseItem::Value(value))),
            cache,
            ..self.clone()
        }
    }

    /// Record a back-reference item in the innermost open scope.
    ///
    /// References bind no names, so the cache stays valid.
    pub fn append_reference(&self, reference: ParseReference) -> ParseState {
        ParseState {
            graph: Arc::new(self.graph.append(ParseItem::Reference(reference))),
            ..self.clone()
        }
    }

    /// Remember that a substructure descent at `reference` is underway.
    pub fn push_pending(&self, reference: ParseReference) -> ParseState {
        ParseState {
            references: self.references.push(reference),
            ..self.clone()
        }
    }

    /// Move the cursor within the current source.
    pub fn seek(&self, offset: u64) -> ParseState {
        ParseState {
            offset,
            ..self.clone()
        }
    }

    /// Move the cursor onto a different source.
    pub fn with_source(&self, source: Arc<Source>, offset: u64) -> ParseState {
        ParseState {
            source,
            offset,
            ..self.clone()
        }
    }

    /// Replace the graph wholesale, invalidating the name cache.
    pub fn with_graph(&self, graph: Arc<ParseGraph>) -> ParseState {
        ParseState {
            graph,
            cache: ValueCache::Invalidated,
            ..self.clone()
        }
    }

    /// Open a nested scope for `token`.
    pub fn open_scope(&self, token: Arc<Token>) -> ParseState {
        let bump = u64::from(token.is_scope_delimiter());
        ParseState {
            graph: Arc::new(self.graph.open_scope(token)),
            scope_depth: self.scope_depth + bump,
            ..self.clone()
        }
    }

    /// Seal the innermost open scope, which must match `token`.
    pub fn close_scope(&self, token: &Arc<Token>) -> Result<ParseState, ParseFault> {
        let drop = u64::from(token.is_scope_delimiter());
        Ok(ParseState {
            graph: Arc::new(self.graph.close_scope(token)?),
            scope_depth: self.scope_depth - drop,
            ..self.clone()
        })
    }

    /// Enter a repetition: a fresh zero counter on top.
    pub fn start_iteration(&self) -> ParseState {
        ParseState {
            iterations: self.iterations.push(0),
            ..self.clone()
        }
    }

    /// One more completed iteration of the innermost repetition.
    pub fn next_iteration(&self) -> ParseState {
        let count = self.iterations.head().copied().unwrap_or(0);
        ParseState {
            iterations: self.iterations.tail().push(count + 1),
            ..self.clone()
        }
    }

    /// Leave the innermost repetition.
    pub fn end_iteration(&self) -> ParseState {
        ParseState {
            iterations: self.iterations.tail(),
            ..self.clone()
        }
    }

    /// Every value bound to `name`, oldest first.
    ///
    /// A `scope` limit of `n` keeps only values recorded at most `n`
    /// visibility levels above the current depth.
    pub fn lookup(&self, name: &str, scope: Option<u64>) -> Vec<Arc<ParseValue>> {
        let floor = scope.map(|limit| self.scope_depth.saturating_sub(limit));
        match &self.cache {
            ValueCache::Ready(map) => match map.get(name) {
                Some(entries) => collect_visible(entries, floor),
                None => Vec::new(),
            },
            ValueCache::Invalidated => {
                let rebuilt = rebuild_index(&self.graph);
                match rebuilt.get(name) {
                    Some(entries) => collect_visible(entries, floor),
                    None => Vec::new(),
                }
            }
        }
    }
}

/// Filter a most-recent-first entry list by depth floor, oldest first.
fn collect_visible(entries: &ImmutableList<CacheEntry>, floor: Option<u64>) -> Vec<Arc<ParseValue>> {
    let mut values: Vec<Arc<ParseValue>> = entries
        .iter()
        .filter(|entry| floor.is_none_or(|floor| entry.depth >= floor))
        .map(|entry| Arc::clone(&entry.value))
        .collect();
    values.reverse();
    values
}

/// Rebuild the full name index from the graph.
fn rebuild_index(graph: &Arc<ParseGraph>) -> CacheMap {
    let work = vec![(graph.items().clone(), 0u64)];
    let mut index = rebuild_step(work, CacheMap::default()).run();
    // The walk visits most recent first, so each per-name list built by
    // prepending ends up oldest-first; flip back to cache order.
    for slot in index.values_mut() {
        *slot = slot.reverse();
    }
    index
}

/// One step of the index rebuild, walking values most recent first.
fn rebuild_step(
    mut work: Vec<(ImmutableList<ParseItem>, u64)>,
    mut index: CacheMap,
) -> Trampoline<CacheMap> {
    let (top, depth) = match work.pop() {
        Some(frame) => frame,
        None => return Trampoline::done(index),
    };
    if let Some(item) = top.head() {
        let rest = top.tail();
        match item {
            ParseItem::Value(value) => {
                let slot = index.entry(value.name().to_string()).or_default();
                *slot = slot.push(CacheEntry {
                    value: Arc::clone(value),
                    depth,
                });
                work.push((rest, depth));
            }
            ParseItem::Graph(nested) => {
                let inner_depth = depth + u64::from(nested.token().is_scope_delimiter());
                let inner = (nested.items().clone(), inner_depth);
                work.push((rest, depth));
                work.push(inner);
            }
            ParseItem::Reference(_) => work.push((rest, depth)),
        }
    }
    Trampoline::pending(move || rebuild_step(work, index))
}

impl PartialEq for ParseState {
    fn eq(&self, other: &Self) -> bool {
        self.offset == other.offset
            && self.scope_depth == other.scope_depth
            && self.source == other.source
            && self.graph == other.graph
            && self.iterations == other.iterations
            && self.references == other.references
    }
}

impl Eq for ParseState {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::{con, def, scope, seq};
    use crate::source::Slice;
    use crate::value::Encoding;

    fn field_token() -> Arc<Token> {
        Arc::new(def("field", con(1)))
    }

    fn state() -> ParseState {
        let root = Arc::new(seq([def("field", con(1))]));
        ParseState::new(Source::buffer(vec![1u8, 2, 3, 4]), root, 0)
    }

    fn bound(state: &ParseState, name: &str, offset: u64) -> ParseState {
        let slice = Slice::new(Arc::clone(state.source()), offset, 1).unwrap();
        let value = Arc::new(ParseValue::new(
            name,
            field_token(),
            slice,
            Encoding::new(),
        ));
        state.add_value(value)
    }

    #[test]
    fn test_add_value_binds_name_oldest_first() {
        let s = bound(&bound(&state(), "x", 0), "x", 1);
        let values = s.lookup("x", None);
        assert_eq!(values.len(), 2);
        assert_eq!(values[0].slice().offset(), 0);
        assert_eq!(values[1].slice().offset(), 1);
    }

    #[test]
    fn test_lookup_of_unbound_name_is_empty() {
        assert!(state().lookup("missing", None).is_empty());
    }

    #[test]
    fn test_transitions_do_not_disturb_the_base_state() {
        let base = bound(&state(), "x", 0);
        let moved = base.seek(3);
        let extended = bound(&base, "x", 2);
        assert_eq!(base.offset(), 0);
        assert_eq!(moved.offset(), 3);
        assert_eq!(base.lookup("x", None).len(), 1);
        assert_eq!(extended.lookup("x", None).len(), 2);
    }

    #[test]
    fn test_scope_limit_hides_outer_bindings() {
        let delimiter = Arc::new(scope(seq([def("inner", con(1))])));
        let s = bound(&state(), "x", 0).open_scope(delimiter);
        let s = bound(&s, "x", 1);
        assert_eq!(s.lookup("x", None).len(), 2);
        // Limit 0: only bindings from the current visibility level.
        let near = s.lookup("x", Some(0));
        assert_eq!(near.len(), 1);
        assert_eq!(near[0].slice().offset(), 1);
        // Limit 1 reaches one level up.
        assert_eq!(s.lookup("x", Some(1)).len(), 2);
    }

    #[test]
    fn test_wholesale_graph_replacement_rebuilds_lookup() {
        let populated = bound(&bound(&state(), "x", 0), "y", 1);
        let replaced = populated.with_graph(Arc::clone(populated.graph()));
        assert_eq!(replaced.lookup("x", None).len(), 1);
        assert_eq!(replaced.lookup("y", None).len(), 1);
        assert!(replaced.lookup("z", None).is_empty());
    }

    #[test]
    fn test_iteration_counters_nest() {
        let s = state().start_iteration();
        assert_eq!(s.current_iteration(), Some(0));
        let s = s.next_iteration().next_iteration();
        assert_eq!(s.current_iteration(), Some(2));
        let nested = s.start_iteration();
        assert_eq!(nested.current_iteration(), Some(0));
        assert_eq!(nested.end_iteration().current_iteration(), Some(2));
        assert_eq!(state().current_iteration(), None);
    }

    #[test]
    fn test_pending_references_accumulate() {
        let s = state();
        let reference = ParseReference::new(4, Arc::clone(s.source()), field_token());
        let pushed = s.push_pending(reference.clone());
        assert_eq!(pushed.references().size(), 1);
        assert!(pushed.references().iter().any(|held| held == &reference));
        assert!(s.references().is_empty());
    }

    #[test]
    fn test_structural_equality_ignores_the_cache() {
        let a = bound(&state(), "x", 0);
        let b = bound(&state(), "x", 0).with_graph(Arc::clone(a.graph()));
        assert_eq!(a, b);
    }
}
