//! Parse Graph
//!
//! The result of a parse is a persistent graph: a nested structure of
//! scopes, each tagged with the grammar token that produced it, holding
//! leaf values, sealed sub-scopes and back-references. Every mutation
//! returns a new graph sharing all unchanged structure with its
//! predecessor, so discarding a failed speculative branch is simply
//! dropping the derived graph.
//!
//! At any moment at most one chain of scopes is open, from the root down.
//! Appends, opens and closes all delegate along that chain to the
//! innermost open scope; closes therefore always seal innermost-first.
//! A sealed scope is never touched again.
//!
//! Back-references make cyclic structures finite: instead of a nested
//! sub-graph, a [`ParseItem::Reference`] records *where* an equal
//! structure was parsed. [`ParseGraph::resolve`] dereferences it on
//! demand by searching the closed roots for its token.

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::error::ParseFault;
use crate::list::ImmutableList;
use crate::token::Token;
use crate::trampoline::Trampoline;
use crate::value::{ParseReference, ParseValue};

/// One entry inside a graph scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ParseItem {
    /// A matched leaf field.
    Value(Arc<ParseValue>),
    /// A nested scope, open or sealed.
    Graph(Arc<ParseGraph>),
    /// A back-reference to a structure parsed elsewhere.
    Reference(ParseReference),
}

/// A scope in the parse graph, tagged with the token that produced it.
///
/// Items are stored most-recent-first. The nesting depth of open
/// scope-delimiting descendants is cached; it never participates in
/// equality or hashing.
#[derive(Debug, Clone)]
pub struct ParseGraph {
    items: ImmutableList<ParseItem>,
    token: Arc<Token>,
    open: bool,
    depth: u64,
}

impl ParseGraph {
    /// A fresh open scope for `token` with nothing parsed under it yet.
    pub fn open(token: Arc<Token>) -> ParseGraph {
        ParseGraph {
            items: ImmutableList::new(),
            token,
            open: true,
            depth: 0,
        }
    }

    /// The scope's items, most recent first.
    #[inline]
    pub fn items(&self) -> &ImmutableList<ParseItem> {
        &self.items
    }

    /// The token this scope was opened for.
    #[inline]
    pub fn token(&self) -> &Arc<Token> {
        &self.token
    }

    /// Whether the scope is still accepting items.
    #[inline]
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Number of items directly in this scope, O(1).
    #[inline]
    pub fn size(&self) -> u64 {
        self.items.size()
    }

    /// Cached count of open scope-delimiting descendants.
    #[inline]
    pub fn depth(&self) -> u64 {
        self.depth
    }

    /// The head item, if it is a still-open nested scope.
    fn open_head(&self) -> Option<&Arc<ParseGraph>> {
        match self.items.head() {
            Some(ParseItem::Graph(nested)) if nested.open => Some(nested),
            _ => None,
        }
    }

    /// The chain of open scopes strictly below this one, outermost first.
    ///
    /// Collected iteratively; the chain grows with structures like linked
    /// lists of substructures, so its length is input-dependent.
    fn open_chain(&self) -> Vec<Arc<ParseGraph>> {
        let mut chain = Vec::new();
        let mut cursor = match self.open_head() {
            Some(nested) => Arc::clone(nested),
            None => return chain,
        };
        loop {
            let next = cursor.open_head().map(Arc::clone);
            chain.push(cursor);
            match next {
                Some(nested) => cursor = nested,
                None => break,
            }
        }
        chain
    }

    /// A copy of this scope with `items` as its storage, recomputing the
    /// cached depth from the new head.
    fn with_items(&self, items: ImmutableList<ParseItem>) -> ParseGraph {
        let depth = match items.head() {
            Some(ParseItem::Graph(nested)) if nested.open => {
                nested.depth + u64::from(nested.token.is_scope_delimiter())
            }
            _ => 0,
        };
        ParseGraph {
            items,
            token: Arc::clone(&self.token),
            open: self.open,
            depth,
        }
    }

    /// Replace the (open) head scope of each ancestor along `ancestors`,
    /// innermost last, then of `self`.
    fn rebuild(&self, ancestors: &[Arc<ParseGraph>], innermost: ParseGraph) -> ParseGraph {
        let mut replacement = innermost;
        for ancestor in ancestors.iter().rev() {
            let items = ancestor
                .items
                .tail()
                .push(ParseItem::Graph(Arc::new(replacement)));
            replacement = ancestor.with_items(items);
        }
        let items = self
            .items
            .tail()
            .push(ParseItem::Graph(Arc::new(replacement)));
        self.with_items(items)
    }

    /// Append `item` to the innermost open scope.
    ///
    /// Appending when no scope is open is a programming error in the
    /// engine, not a parse failure.
    pub fn append(&self, item: ParseItem) -> ParseGraph {
        let chain = self.open_chain();
        match chain.split_last() {
            None => {
                assert!(self.open, "ParseGraph::append called on a sealed graph");
                self.with_items(self.items.push(item))
            }
            Some((innermost, ancestors)) => {
                let replaced = innermost.with_items(innermost.items.push(item));
                self.rebuild(ancestors, replaced)
            }
        }
    }

    /// Open a nested scope for `token` inside the innermost open scope.
    pub fn open_scope(&self, token: Arc<Token>) -> ParseGraph {
        self.append(ParseItem::Graph(Arc::new(ParseGraph::open(token))))
    }

    /// Seal the innermost open scope, which must have been opened for
    /// `token` and must contain no open scope-delimited descendants.
    pub fn close_scope(&self, token: &Arc<Token>) -> Result<ParseGraph, ParseFault> {
        let chain = self.open_chain();
        let (target, ancestors) = chain
            .split_last()
            .ok_or(ParseFault::CloseWithoutOpenScope)?;
        if target.token != *token {
            return Err(ParseFault::MismatchedScopeClose {
                expected: target.token.to_string(),
                found: token.to_string(),
            });
        }
        if target.depth != 0 {
            return Err(ParseFault::UnbalancedScope {
                depth: target.depth,
            });
        }
        let sealed = ParseGraph {
            items: target.items.clone(),
            token: Arc::clone(&target.token),
            open: false,
            depth: target.depth,
        };
        match ancestors.split_last() {
            None => {
                let items = self
                    .items
                    .tail()
                    .push(ParseItem::Graph(Arc::new(sealed)));
                Ok(self.with_items(items))
            }
            Some((parent, outer)) => {
                let items = parent
                    .items
                    .tail()
                    .push(ParseItem::Graph(Arc::new(sealed)));
                Ok(self.rebuild(outer, parent.with_items(items)))
            }
        }
    }

    /// The most recently parsed leaf value anywhere under this scope.
    pub fn current(&self) -> Option<Arc<ParseValue>> {
        current_step(vec![self.items.clone()]).run()
    }

    /// The leaf value with the lowest source offset, descending only
    /// through scopes whose tokens parse contiguously.
    ///
    /// Substructure scopes jump elsewhere in the source, so the search
    /// stays out of them; the result identifies where *this* structure
    /// starts.
    pub fn lowest_offset_leaf(&self) -> Option<Arc<ParseValue>> {
        lowest_step(vec![self.items.clone()], None).run()
    }

    /// Every sealed root scope for `token`, most recently parsed first.
    ///
    /// A root is a scope tagged with `token` whose immediately enclosing
    /// scope carries a different token; a token's own nested re-mention of
    /// itself is not a separate root.
    pub fn roots(self: &Arc<Self>, token: &Arc<Token>) -> Vec<Arc<ParseGraph>> {
        let mut found = Vec::new();
        if !self.open && self.token == *token {
            found.push(Arc::clone(self));
        }
        let work = vec![(self.items.clone(), Arc::clone(&self.token))];
        roots_step(work, Arc::clone(token), found).run()
    }

    /// Dereference `reference`: the sealed root for its token whose
    /// lowest-offset leaf sits exactly at the referenced location.
    pub fn resolve(self: &Arc<Self>, reference: &ParseReference) -> Option<Arc<ParseGraph>> {
        self.roots(reference.token()).into_iter().find(|root| {
            root.lowest_offset_leaf().is_some_and(|leaf| {
                leaf.slice().offset() == reference.location()
                    && leaf.slice().source() == reference.source()
            })
        })
    }
}

/// One step of the most-recent-first leaf search.
fn current_step(mut work: Vec<ImmutableList<ParseItem>>) -> Trampoline<Option<Arc<ParseValue>>> {
    let top = match work.pop() {
        Some(list) => list,
        None => return Trampoline::done(None),
    };
    if let Some(item) = top.head() {
        let rest = top.tail();
        match item {
            ParseItem::Value(value) => return Trampoline::done(Some(Arc::clone(value))),
            ParseItem::Graph(nested) => {
                let inner = nested.items.clone();
                work.push(rest);
                work.push(inner);
            }
            ParseItem::Reference(_) => work.push(rest),
        }
    }
    Trampoline::pending(move || current_step(work))
}

/// One step of the lowest-offset leaf search over local scopes.
fn lowest_step(
    mut work: Vec<ImmutableList<ParseItem>>,
    mut best: Option<Arc<ParseValue>>,
) -> Trampoline<Option<Arc<ParseValue>>> {
    let top = match work.pop() {
        Some(list) => list,
        None => return Trampoline::done(best),
    };
    if let Some(item) = top.head() {
        let rest = top.tail();
        match item {
            ParseItem::Value(value) => {
                let lower = best
                    .as_ref()
                    .is_none_or(|held| value.slice().offset() < held.slice().offset());
                if lower {
                    best = Some(Arc::clone(value));
                }
                work.push(rest);
            }
            ParseItem::Graph(nested) => {
                let descend = nested.token.is_local();
                let inner = nested.items.clone();
                work.push(rest);
                if descend {
                    work.push(inner);
                }
            }
            ParseItem::Reference(_) => work.push(rest),
        }
    }
    Trampoline::pending(move || lowest_step(work, best))
}

/// One step of the sealed-root enumeration.
fn roots_step(
    mut work: Vec<(ImmutableList<ParseItem>, Arc<Token>)>,
    token: Arc<Token>,
    mut found: Vec<Arc<ParseGraph>>,
) -> Trampoline<Vec<Arc<ParseGraph>>> {
    let (top, parent) = match work.pop() {
        Some(frame) => frame,
        None => return Trampoline::done(found),
    };
    if let Some(item) = top.head() {
        let rest = top.tail();
        if let ParseItem::Graph(nested) = item {
            if !nested.open && nested.token == token && parent != token {
                found.push(Arc::clone(nested));
            }
            let inner = (nested.items.clone(), Arc::clone(&nested.token));
            work.push((rest, parent));
            work.push(inner);
        } else {
            work.push((rest, parent));
        }
    }
    Trampoline::pending(move || roots_step(work, token, found))
}

impl Drop for ParseGraph {
    /// Dismantles nested scopes through a worklist. Scope nesting grows
    /// with the input (a linked chain of substructures nests once per
    /// link), so the compiler-generated recursive drop glue would
    /// overflow the stack even though traversal is trampolined.
    fn drop(&mut self) {
        let mut pending = vec![std::mem::take(&mut self.items)];
        while let Some(items) = pending.pop() {
            // Keep the nested scopes alive past the item list's drop, then
            // dismantle each sole-owned one at this level instead of
            // letting it cascade.
            let nested: Vec<Arc<ParseGraph>> = items
                .iter()
                .filter_map(|item| match item {
                    ParseItem::Graph(graph) => Some(Arc::clone(graph)),
                    _ => None,
                })
                .collect();
            drop(items);
            for graph in nested {
                if let Ok(mut sole) = Arc::try_unwrap(graph) {
                    pending.push(std::mem::take(&mut sole.items));
                }
            }
        }
    }
}

impl PartialEq for ParseGraph {
    fn eq(&self, other: &Self) -> bool {
        self.open == other.open && self.token == other.token && self.items == other.items
    }
}

impl Eq for ParseGraph {}

impl Hash for ParseGraph {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.open.hash(state);
        self.token.hash(state);
        self.items.hash(state);
    }
}
