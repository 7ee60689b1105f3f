//! Graph-structured call stacks. A prediction context records every
//! suffix of rule-invocation stack a configuration may be executing under;
//! merging two contexts unions those suffix sets while sharing structure
//! aggressively. Contexts never mutate after construction and are shared
//! through `Arc` handles, so structural equality plus a memoized hash is
//! the identity that matters.

use std::{
  collections::hash_map::DefaultHasher,
  hash::{Hash, Hasher},
  sync::{Arc, Mutex},
};

use once_cell::sync::Lazy;

use crate::{
  atn::{Atn, Transition},
  recognizer::RuleContext,
  types::proxy::Map,
};

/// Return state paired with a null parent to denote the empty-stack root.
/// Sorts after every real state number.
pub const EMPTY_RETURN_STATE: usize = usize::MAX;

pub type SharedContext = Arc<PredictionContext>;

/// The unique empty context. In local (SLL) prediction it reads as "stack
/// unknown, treat as wildcard"; in full-context prediction it means the
/// decision entry rule itself was reached from the outside.
static EMPTY: Lazy<SharedContext> = Lazy::new(|| {
  Arc::new(PredictionContext {
    cached_hash: hash_parts(&[None], &[EMPTY_RETURN_STATE]),
    data:        ContextData::Singleton { parent: None, return_state: EMPTY_RETURN_STATE },
  })
});

#[derive(Debug)]
enum ContextData {
  /// One (parent, return state) edge. The empty context is the singleton
  /// with no parent and the sentinel return state.
  Singleton {
    parent:       Option<SharedContext>,
    return_state: usize,
  },
  /// Two or more edges, sorted by ascending return state with the sentinel
  /// (if present) last. Parent slots may be `None` only alongside the
  /// sentinel.
  Array {
    parents:       Vec<Option<SharedContext>>,
    return_states: Vec<usize>,
  },
}

#[derive(Debug)]
pub struct PredictionContext {
  cached_hash: u64,
  data:        ContextData,
}

fn hash_parts(parents: &[Option<SharedContext>], return_states: &[usize]) -> u64 {
  let mut h = DefaultHasher::new();
  for p in parents {
    match p {
      Some(p) => p.cached_hash.hash(&mut h),
      None => 0u64.hash(&mut h),
    }
  }
  return_states.hash(&mut h);
  h.finish()
}

impl PredictionContext {
  pub fn empty() -> SharedContext {
    EMPTY.clone()
  }

  /// Canonicalizing singleton constructor: the empty-context shape always
  /// resolves to the shared EMPTY instance.
  pub fn singleton(parent: Option<SharedContext>, return_state: usize) -> SharedContext {
    if return_state == EMPTY_RETURN_STATE && parent.is_none() {
      return Self::empty();
    }
    Arc::new(PredictionContext {
      cached_hash: hash_parts(std::slice::from_ref(&parent), &[return_state]),
      data:        ContextData::Singleton { parent, return_state },
    })
  }

  fn array(parents: Vec<Option<SharedContext>>, return_states: Vec<usize>) -> SharedContext {
    debug_assert_eq!(parents.len(), return_states.len());
    debug_assert!(return_states.windows(2).all(|w| w[0] < w[1]));
    Arc::new(PredictionContext {
      cached_hash: hash_parts(&parents, &return_states),
      data:        ContextData::Array { parents, return_states },
    })
  }

  /// Folds a recognizer's rule-invocation chain into the equivalent
  /// context graph. Each link contributes the follow state of the rule
  /// transition taken at its invoking state.
  pub fn from_rule_context(atn: &Atn, ctx: Option<&Arc<RuleContext>>) -> SharedContext {
    let Some(ctx) = ctx else { return Self::empty() };
    if ctx.is_empty() {
      return Self::empty();
    }

    let parent = Self::from_rule_context(atn, ctx.parent.as_ref());
    let invoking = atn.state(ctx.invoking_state as usize);
    match invoking.transition(0) {
      Transition::Rule { follow_state, .. } => Self::singleton(Some(parent), *follow_state),
      _ => Self::empty(),
    }
  }

  pub fn size(&self) -> usize {
    match &self.data {
      ContextData::Singleton { .. } => 1,
      ContextData::Array { return_states, .. } => return_states.len(),
    }
  }

  pub fn parent(&self, index: usize) -> Option<&SharedContext> {
    match &self.data {
      ContextData::Singleton { parent, .. } => {
        debug_assert_eq!(index, 0);
        parent.as_ref()
      }
      ContextData::Array { parents, .. } => parents[index].as_ref(),
    }
  }

  pub fn return_state(&self, index: usize) -> usize {
    match &self.data {
      ContextData::Singleton { return_state, .. } => {
        debug_assert_eq!(index, 0);
        *return_state
      }
      ContextData::Array { return_states, .. } => return_states[index],
    }
  }

  /// True only for the EMPTY shape.
  pub fn is_empty(&self) -> bool {
    self.size() == 1 && self.return_state(0) == EMPTY_RETURN_STATE
  }

  /// True when one of the represented stacks is the empty stack.
  pub fn has_empty_path(&self) -> bool {
    self.return_state(self.size() - 1) == EMPTY_RETURN_STATE
  }

  pub fn cached_hash(&self) -> u64 {
    self.cached_hash
  }

  fn is_singleton(&self) -> bool {
    matches!(self.data, ContextData::Singleton { .. })
  }
}

impl Hash for PredictionContext {
  fn hash<H: Hasher>(&self, state: &mut H) {
    state.write_u64(self.cached_hash);
  }
}

impl PartialEq for PredictionContext {
  fn eq(&self, other: &Self) -> bool {
    if std::ptr::eq(self, other) {
      return true;
    }
    if self.cached_hash != other.cached_hash || self.size() != other.size() {
      return false;
    }
    (0..self.size()).all(|i| {
      self.return_state(i) == other.return_state(i)
        && match (self.parent(i), other.parent(i)) {
          (None, None) => true,
          (Some(a), Some(b)) => contexts_equal(a, b),
          _ => false,
        }
    })
  }
}

impl Eq for PredictionContext {}

/// Reference equality short-circuit, then structural comparison.
pub fn contexts_equal(a: &SharedContext, b: &SharedContext) -> bool {
  Arc::ptr_eq(a, b) || **a == **b
}

// MERGE ----------------------------------------------------------------

/// Per-prediction memo of merge results, keyed by handle identity. Purely
/// an optimization; results are identical with or without it.
#[derive(Default)]
pub struct MergeCache {
  map: Map<(usize, usize), SharedContext>,
}

impl MergeCache {
  pub fn new() -> Self {
    Self::default()
  }

  fn key(a: &SharedContext, b: &SharedContext) -> (usize, usize) {
    (Arc::as_ptr(a) as usize, Arc::as_ptr(b) as usize)
  }

  fn get(&self, a: &SharedContext, b: &SharedContext) -> Option<SharedContext> {
    self
      .map
      .get(&Self::key(a, b))
      .or_else(|| self.map.get(&Self::key(b, a)))
      .cloned()
  }

  fn put(&mut self, a: &SharedContext, b: &SharedContext, merged: SharedContext) {
    self.map.insert(Self::key(a, b), merged);
  }
}

/// Merges two context graphs into one representing the union of their
/// stack suffixes. Commutative up to structural equality and idempotent;
/// the result never has more leaves than `a.size() + b.size()`.
///
/// `root_is_wildcard` selects local-context semantics, where the empty
/// context absorbs everything; under full-context semantics the empty
/// context instead contributes an explicit empty-stack path.
pub fn merge(
  a: &SharedContext,
  b: &SharedContext,
  root_is_wildcard: bool,
  mut cache: Option<&mut MergeCache>,
) -> SharedContext {
  if contexts_equal(a, b) {
    return a.clone();
  }

  if a.is_singleton() && b.is_singleton() {
    return merge_singletons(a, b, root_is_wildcard, cache);
  }

  // At least one side is an array; the wildcard root still absorbs.
  if root_is_wildcard {
    if a.is_empty() {
      return a.clone();
    }
    if b.is_empty() {
      return b.clone();
    }
  }

  if let Some(cache) = cache.as_deref_mut() {
    if let Some(hit) = cache.get(a, b) {
      return hit;
    }
  }
  let merged = merge_arrays(a, b, root_is_wildcard, cache.as_deref_mut());
  if let Some(cache) = cache {
    cache.put(a, b, merged.clone());
  }
  merged
}

fn merge_singletons(
  a: &SharedContext,
  b: &SharedContext,
  root_is_wildcard: bool,
  mut cache: Option<&mut MergeCache>,
) -> SharedContext {
  if let Some(cache) = cache.as_deref_mut() {
    if let Some(hit) = cache.get(a, b) {
      return hit;
    }
  }

  let merged = merge_singletons_uncached(a, b, root_is_wildcard, cache.as_deref_mut());
  if let Some(cache) = cache {
    cache.put(a, b, merged.clone());
  }
  merged
}

fn merge_singletons_uncached(
  a: &SharedContext,
  b: &SharedContext,
  root_is_wildcard: bool,
  mut cache: Option<&mut MergeCache>,
) -> SharedContext {
  if let Some(root) = merge_root(a, b, root_is_wildcard) {
    return root;
  }

  let (a_state, b_state) = (a.return_state(0), b.return_state(0));
  if a_state == b_state {
    let parent = match (a.parent(0), b.parent(0)) {
      (Some(pa), Some(pb)) => merge(pa, pb, root_is_wildcard, cache.as_deref_mut()),
      // A lone null parent here would have been handled by merge_root.
      _ => unreachable!("non-root singleton without a parent"),
    };
    if a.parent(0).map(|p| Arc::ptr_eq(p, &parent)) == Some(true) {
      return a.clone();
    }
    if b.parent(0).map(|p| Arc::ptr_eq(p, &parent)) == Some(true) {
      return b.clone();
    }
    return PredictionContext::singleton(Some(parent), a_state);
  }

  // Distinct return states. Share the parent slot when the parents are one
  // and the same stack, otherwise keep both.
  let shared_parent = match (a.parent(0), b.parent(0)) {
    (Some(pa), Some(pb)) if contexts_equal(pa, pb) => Some(pa.clone()),
    _ => None,
  };

  if let Some(parent) = shared_parent {
    let (lo, hi) = if a_state < b_state { (a_state, b_state) } else { (b_state, a_state) };
    return PredictionContext::array(vec![Some(parent.clone()), Some(parent)], vec![lo, hi]);
  }

  let (mut parents, mut states) = (
    vec![a.parent(0).cloned(), b.parent(0).cloned()],
    vec![a_state, b_state],
  );
  if states[0] > states[1] {
    states.swap(0, 1);
    parents.swap(0, 1);
  }
  PredictionContext::array(parents, states)
}

/// Resolves merges involving the empty-stack root. Returns `None` when
/// neither side is the root.
fn merge_root(a: &SharedContext, b: &SharedContext, root_is_wildcard: bool) -> Option<SharedContext> {
  let (a_empty, b_empty) = (a.is_empty(), b.is_empty());
  if root_is_wildcard {
    // The wildcard stack already stands for every possible suffix.
    if a_empty || b_empty {
      return Some(PredictionContext::empty());
    }
    return None;
  }

  match (a_empty, b_empty) {
    (true, true) => Some(PredictionContext::empty()),
    (true, false) => Some(PredictionContext::array(
      vec![b.parent(0).cloned(), None],
      vec![b.return_state(0), EMPTY_RETURN_STATE],
    )),
    (false, true) => Some(PredictionContext::array(
      vec![a.parent(0).cloned(), None],
      vec![a.return_state(0), EMPTY_RETURN_STATE],
    )),
    (false, false) => None,
  }
}

fn merge_arrays(
  a: &SharedContext,
  b: &SharedContext,
  root_is_wildcard: bool,
  mut cache: Option<&mut MergeCache>,
) -> SharedContext {
  let (mut i, mut j) = (0usize, 0usize);
  let mut parents: Vec<Option<SharedContext>> = Vec::with_capacity(a.size() + b.size());
  let mut states: Vec<usize> = Vec::with_capacity(a.size() + b.size());

  while i < a.size() && j < b.size() {
    let (a_state, b_state) = (a.return_state(i), b.return_state(j));
    if a_state == b_state {
      let (a_parent, b_parent) = (a.parent(i), b.parent(j));
      let both_root = a_state == EMPTY_RETURN_STATE && a_parent.is_none() && b_parent.is_none();
      let equal_parents = matches!((a_parent, b_parent), (Some(x), Some(y)) if contexts_equal(x, y));
      if both_root || equal_parents {
        parents.push(a_parent.cloned());
      } else {
        let merged = match (a_parent, b_parent) {
          (Some(x), Some(y)) => Some(merge(x, y, root_is_wildcard, cache.as_deref_mut())),
          // Only the sentinel pairs with a missing parent, and the sentinel
          // is strictly the greatest return state, so an unequal-parent
          // collision below it cannot involve None.
          _ => a_parent.or(b_parent).cloned(),
        };
        parents.push(merged);
      }
      states.push(a_state);
      i += 1;
      j += 1;
    } else if a_state < b_state {
      parents.push(a.parent(i).cloned());
      states.push(a_state);
      i += 1;
    } else {
      parents.push(b.parent(j).cloned());
      states.push(b_state);
      j += 1;
    }
  }
  while i < a.size() {
    parents.push(a.parent(i).cloned());
    states.push(a.return_state(i));
    i += 1;
  }
  while j < b.size() {
    parents.push(b.parent(j).cloned());
    states.push(b.return_state(j));
    j += 1;
  }

  if states.len() == 1 {
    return PredictionContext::singleton(parents.pop().flatten(), states[0]);
  }

  combine_common_parents(&mut parents);
  let merged = PredictionContext::array(parents, states);
  if contexts_equal(&merged, a) {
    return a.clone();
  }
  if contexts_equal(&merged, b) {
    return b.clone();
  }
  merged
}

/// Replaces structurally equal parents with one shared handle so later
/// identity short-circuits fire.
fn combine_common_parents(parents: &mut [Option<SharedContext>]) {
  let mut canonical: Map<SharedContext, SharedContext> = Map::default();
  for slot in parents.iter_mut() {
    if let Some(parent) = slot {
      let entry = canonical.entry(parent.clone()).or_insert_with(|| parent.clone());
      *slot = Some(entry.clone());
    }
  }
}

// CONTEXT CACHE --------------------------------------------------------

/// Process-wide canonicalizing store shared by every DFA state of an
/// automaton. Keyed by structural equality; grows monotonically until
/// cleared.
#[derive(Default)]
pub struct PredictionContextCache {
  map: Mutex<Map<SharedContext, SharedContext>>,
}

impl PredictionContextCache {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn len(&self) -> usize {
    self.map.lock().expect("poisoned").len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn clear(&self) {
    self.map.lock().expect("poisoned").clear();
  }

  /// Returns the canonical instance for `ctx`, registering it if no equal
  /// context is cached yet.
  pub fn add(&self, ctx: SharedContext) -> SharedContext {
    if ctx.is_empty() {
      return PredictionContext::empty();
    }
    self.map.lock().expect("poisoned").entry(ctx.clone()).or_insert(ctx).clone()
  }

  fn get(&self, ctx: &SharedContext) -> Option<SharedContext> {
    self.map.lock().expect("poisoned").get(ctx).cloned()
  }
}

/// Rebuilds `ctx` with every reachable subgraph replaced by its canonical
/// cached copy. `visited` maps already-processed nodes by identity so
/// shared parents convert once.
pub fn get_cached(
  ctx: &SharedContext,
  cache: &PredictionContextCache,
  visited: &mut Map<*const PredictionContext, SharedContext>,
) -> SharedContext {
  if ctx.is_empty() {
    return ctx.clone();
  }

  let key = Arc::as_ptr(ctx);
  if let Some(existing) = visited.get(&key) {
    return existing.clone();
  }
  if let Some(existing) = cache.get(ctx) {
    visited.insert(key, existing.clone());
    return existing;
  }

  let mut changed = false;
  let mut parents: Vec<Option<SharedContext>> = Vec::with_capacity(ctx.size());
  for i in 0..ctx.size() {
    match ctx.parent(i) {
      None => parents.push(None),
      Some(parent) => {
        let cached_parent = get_cached(parent, cache, visited);
        changed |= !Arc::ptr_eq(&cached_parent, parent);
        parents.push(Some(cached_parent));
      }
    }
  }

  if !changed {
    let canonical = cache.add(ctx.clone());
    visited.insert(key, canonical.clone());
    return canonical;
  }

  let updated = if parents.len() == 1 {
    PredictionContext::singleton(parents.pop().flatten(), ctx.return_state(0))
  } else {
    let states = (0..ctx.size()).map(|i| ctx.return_state(i)).collect();
    PredictionContext::array(parents, states)
  };

  let canonical = cache.add(updated);
  visited.insert(Arc::as_ptr(&canonical), canonical.clone());
  visited.insert(key, canonical.clone());
  canonical
}

impl std::fmt::Display for PredictionContext {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    if self.is_empty() {
      return f.write_str("$");
    }
    f.write_str("[")?;
    for i in 0..self.size() {
      if i > 0 {
        f.write_str(", ")?;
      }
      match self.return_state(i) {
        EMPTY_RETURN_STATE => f.write_str("$")?,
        state => {
          write!(f, "{state}")?;
          if let Some(parent) = self.parent(i) {
            write!(f, " {parent}")?;
          }
        }
      }
    }
    f.write_str("]")
  }
}

#[cfg(test)]
mod test {
  use super::*;

  fn stack(states: &[usize]) -> SharedContext {
    let mut ctx = PredictionContext::empty();
    for s in states {
      ctx = PredictionContext::singleton(Some(ctx), *s);
    }
    ctx
  }

  #[test]
  fn empty_is_canonical() {
    assert!(Arc::ptr_eq(&PredictionContext::empty(), &PredictionContext::empty()));
    assert!(Arc::ptr_eq(
      &PredictionContext::singleton(None, EMPTY_RETURN_STATE),
      &PredictionContext::empty()
    ));
  }

  #[test]
  fn merge_is_idempotent() {
    let a = stack(&[7, 12]);
    let b = stack(&[7, 12]);
    let merged = merge(&a, &b, true, None);
    assert!(Arc::ptr_eq(&merged, &a));
  }

  #[test]
  fn merge_is_commutative_structurally() {
    let a = stack(&[3, 9]);
    let b = stack(&[3, 11]);
    let ab = merge(&a, &b, true, None);
    let ba = merge(&b, &a, true, None);
    assert_eq!(*ab, *ba);
    assert_eq!(ab.cached_hash(), ba.cached_hash());
  }

  #[test]
  fn wildcard_root_absorbs() {
    let x = stack(&[5]);
    let merged = merge(&x, &PredictionContext::empty(), true, None);
    assert!(merged.is_empty());
  }

  #[test]
  fn full_context_root_keeps_both_paths() {
    let x = stack(&[5]);
    let merged = merge(&x, &PredictionContext::empty(), false, None);
    assert_eq!(merged.size(), 2);
    assert_eq!(merged.return_state(0), 5);
    assert_eq!(merged.return_state(1), EMPTY_RETURN_STATE);
    assert!(merged.has_empty_path());
    assert!(!merged.is_empty());
  }

  #[test]
  fn equal_return_states_merge_parents() {
    let a = PredictionContext::singleton(Some(stack(&[1])), 40);
    let b = PredictionContext::singleton(Some(stack(&[2])), 40);
    let merged = merge(&a, &b, true, None);
    assert_eq!(merged.size(), 1);
    assert_eq!(merged.return_state(0), 40);
    assert_eq!(merged.parent(0).unwrap().size(), 2);
  }

  #[test]
  fn distinct_states_with_shared_parent_collapse_to_one_parent_slot() {
    let parent = stack(&[4]);
    let a = PredictionContext::singleton(Some(parent.clone()), 10);
    let b = PredictionContext::singleton(Some(parent), 20);
    let merged = merge(&a, &b, true, None);
    assert_eq!(merged.size(), 2);
    assert_eq!(merged.return_state(0), 10);
    assert_eq!(merged.return_state(1), 20);
    assert!(Arc::ptr_eq(merged.parent(0).unwrap(), merged.parent(1).unwrap()));
  }

  #[test]
  fn array_merge_result_bounded_by_leaf_sum() {
    let a = merge(&stack(&[1, 10]), &stack(&[1, 20]), true, None);
    let b = merge(&stack(&[1, 15]), &stack(&[1, 20]), true, None);
    let merged = merge(&a, &b, true, None);
    assert!(merged.size() <= a.size() + b.size());
    assert_eq!(
      (0..merged.size()).map(|i| merged.return_state(i)).collect::<Vec<_>>(),
      vec![10, 15, 20]
    );
  }

  #[test]
  fn merge_cache_returns_identical_handles() {
    let mut cache = MergeCache::new();
    let a = stack(&[2, 8]);
    let b = stack(&[3, 8]);
    let first = merge(&a, &b, true, Some(&mut cache));
    let second = merge(&a, &b, true, Some(&mut cache));
    let flipped = merge(&b, &a, true, Some(&mut cache));
    assert!(Arc::ptr_eq(&first, &second));
    assert!(Arc::ptr_eq(&first, &flipped));
  }

  #[test]
  fn cached_contexts_share_canonical_parents() {
    let cache = PredictionContextCache::new();
    let mut visited = Map::default();
    let a = stack(&[6, 30]);
    let canonical_a = get_cached(&a, &cache, &mut visited);

    let mut visited = Map::default();
    let b = stack(&[6, 30]);
    let canonical_b = get_cached(&b, &cache, &mut visited);
    assert!(Arc::ptr_eq(&canonical_a, &canonical_b));

    let mut visited = Map::default();
    let sibling = stack(&[6, 31]);
    let canonical_sibling = get_cached(&sibling, &cache, &mut visited);
    assert!(Arc::ptr_eq(
      canonical_sibling.parent(0).unwrap(),
      canonical_a.parent(0).unwrap()
    ));
  }
}
