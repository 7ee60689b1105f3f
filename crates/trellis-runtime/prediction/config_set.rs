use std::{
  collections::hash_map::DefaultHasher,
  hash::{Hash, Hasher},
};

use once_cell::sync::OnceCell;

use crate::{
  atn::INVALID_ALT_NUMBER,
  context::{get_cached, merge, MergeCache, PredictionContextCache, SharedContext},
  prediction::{AtnConfig, SharedSemanticContext},
  types::{proxy::Map, AltSet, TrellisError, TrellisResult},
};

/// Key of the merged-insert index: configurations agreeing on all three
/// components are one configuration whose contexts union.
#[derive(PartialEq, Eq, Hash)]
struct MergeKey {
  state: usize,
  alt:   u32,
  semantic_context: SharedSemanticContext,
}

enum ConfigIndex {
  /// Parser behavior: merge contexts on key collision.
  Merged(Map<MergeKey, usize>),
  /// Lexer reach behavior: every structurally distinct configuration is
  /// retained; only exact duplicates collapse.
  Exact(Map<AtnConfig, usize>),
  /// Discarded once the set is frozen into a DFA state.
  Dropped,
}

/// An insertion-ordered, de-duplicating collection of configurations.
///
/// While mutable, an auxiliary index drives merge-on-insert; once adopted
/// by a DFA state the set is frozen, the index is discarded and the
/// ordered configuration list becomes the set's identity.
pub struct AtnConfigSet {
  configs: Vec<AtnConfig>,
  index:   ConfigIndex,

  pub full_ctx: bool,
  readonly:     bool,

  /// The lone predicted alternative, or [`INVALID_ALT_NUMBER`].
  pub unique_alt: u32,
  pub conflicting_alts: Option<AltSet>,
  pub has_semantic_context: bool,
  pub dips_into_outer_context: bool,

  frozen_hash: OnceCell<u64>,
}

impl AtnConfigSet {
  pub fn new(full_ctx: bool) -> Self {
    Self {
      configs: Vec::new(),
      index: ConfigIndex::Merged(Map::default()),
      full_ctx,
      readonly: false,
      unique_alt: INVALID_ALT_NUMBER,
      conflicting_alts: None,
      has_semantic_context: false,
      dips_into_outer_context: false,
      frozen_hash: OnceCell::new(),
    }
  }

  /// The lexer-reach variant: keeps every distinct configuration.
  pub fn new_ordered() -> Self {
    let mut set = Self::new(true);
    set.index = ConfigIndex::Exact(Map::default());
    set
  }

  pub fn len(&self) -> usize {
    self.configs.len()
  }

  pub fn is_empty(&self) -> bool {
    self.configs.is_empty()
  }

  pub fn get(&self, i: usize) -> &AtnConfig {
    &self.configs[i]
  }

  pub fn iter(&self) -> std::slice::Iter<'_, AtnConfig> {
    self.configs.iter()
  }

  pub fn is_readonly(&self) -> bool {
    self.readonly
  }

  /// Freezes the set. The auxiliary index is discarded; any later `add`
  /// fails with [`TrellisError::SetReadonly`].
  pub fn set_readonly(&mut self, readonly: bool) {
    self.readonly = readonly;
    if readonly {
      self.index = ConfigIndex::Dropped;
    }
  }

  pub fn add(&mut self, config: AtnConfig) -> TrellisResult<bool> {
    self.add_with_cache(config, None)
  }

  /// Inserts `config`, merging its context into an existing entry when the
  /// `(state, alt, semantic context)` key is already present.
  pub fn add_with_cache(
    &mut self,
    config: AtnConfig,
    cache: Option<&mut MergeCache>,
  ) -> TrellisResult<bool> {
    if self.readonly {
      return Err(TrellisError::SetReadonly("AtnConfigSet"));
    }

    if !config.semantic_context.is_none() {
      self.has_semantic_context = true;
    }
    if config.outer_context_depth() > 0 {
      self.dips_into_outer_context = true;
    }

    match &mut self.index {
      ConfigIndex::Dropped => Err(TrellisError::SetReadonly("AtnConfigSet")),
      ConfigIndex::Exact(index) => {
        if index.contains_key(&config) {
          return Ok(false);
        }
        index.insert(config.clone(), self.configs.len());
        self.configs.push(config);
        Ok(true)
      }
      ConfigIndex::Merged(index) => {
        let key = MergeKey {
          state: config.state,
          alt:   config.alt,
          semantic_context: config.semantic_context.clone(),
        };
        match index.get(&key) {
          None => {
            index.insert(key, self.configs.len());
            self.configs.push(config);
            Ok(true)
          }
          Some(&slot) => {
            let existing = &mut self.configs[slot];
            let root_is_wildcard = !self.full_ctx;
            let merged = merge(&existing.context, &config.context, root_is_wildcard, cache);
            existing.absorb(&config, merged);
            Ok(false)
          }
        }
      }
    }
  }

  /// Rebuilds every configuration's context through the shared cache so
  /// equal subgraphs collapse to one allocation across DFA states.
  pub fn optimize_contexts(&mut self, context_cache: &PredictionContextCache) {
    if self.readonly {
      return;
    }
    let mut visited = Map::default();
    for config in &mut self.configs {
      config.context = get_cached(&config.context, context_cache, &mut visited);
    }
  }

  pub fn alts(&self) -> AltSet {
    self.configs.iter().map(|c| c.alt).collect()
  }

  pub fn states(&self) -> crate::types::proxy::Set<usize> {
    self.configs.iter().map(|c| c.state).collect()
  }

  /// Contexts of every configuration, for full-context restart seeding.
  pub fn contexts(&self) -> Vec<SharedContext> {
    self.configs.iter().map(|c| c.context.clone()).collect()
  }

  fn members_hash(&self) -> u64 {
    let mut h = DefaultHasher::new();
    for config in &self.configs {
      config.hash(&mut h);
    }
    self.full_ctx.hash(&mut h);
    h.finish()
  }
}

impl Clone for AtnConfigSet {
  fn clone(&self) -> Self {
    let mut index = match &self.index {
      ConfigIndex::Dropped => ConfigIndex::Dropped,
      ConfigIndex::Merged(_) => ConfigIndex::Merged(Map::default()),
      ConfigIndex::Exact(_) => ConfigIndex::Exact(Map::default()),
    };
    // Rebuild rather than clone the index: slot positions are preserved,
    // and merged entries already carry their unioned contexts.
    match &mut index {
      ConfigIndex::Merged(map) => {
        for (i, c) in self.configs.iter().enumerate() {
          map.insert(
            MergeKey { state: c.state, alt: c.alt, semantic_context: c.semantic_context.clone() },
            i,
          );
        }
      }
      ConfigIndex::Exact(map) => {
        for (i, c) in self.configs.iter().enumerate() {
          map.insert(c.clone(), i);
        }
      }
      ConfigIndex::Dropped => {}
    }
    Self {
      configs: self.configs.clone(),
      index,
      full_ctx: self.full_ctx,
      readonly: self.readonly,
      unique_alt: self.unique_alt,
      conflicting_alts: self.conflicting_alts.clone(),
      has_semantic_context: self.has_semantic_context,
      dips_into_outer_context: self.dips_into_outer_context,
      frozen_hash: OnceCell::new(),
    }
  }
}

impl PartialEq for AtnConfigSet {
  fn eq(&self, other: &Self) -> bool {
    self.configs == other.configs
      && self.full_ctx == other.full_ctx
      && self.unique_alt == other.unique_alt
      && self.conflicting_alts == other.conflicting_alts
      && self.has_semantic_context == other.has_semantic_context
      && self.dips_into_outer_context == other.dips_into_outer_context
  }
}

impl Eq for AtnConfigSet {}

impl Hash for AtnConfigSet {
  fn hash<H: Hasher>(&self, state: &mut H) {
    let h = if self.readonly {
      *self.frozen_hash.get_or_init(|| self.members_hash())
    } else {
      self.members_hash()
    };
    state.write_u64(h);
  }
}

impl std::fmt::Debug for AtnConfigSet {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(&self.to_string())
  }
}

impl std::fmt::Display for AtnConfigSet {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(
      f,
      "[{}]",
      self.configs.iter().map(|c| c.to_string()).collect::<Vec<_>>().join(", ")
    )?;
    if self.has_semantic_context {
      write!(f, ",hasSemanticContext={}", self.has_semantic_context)?;
    }
    if self.unique_alt != INVALID_ALT_NUMBER {
      write!(f, ",uniqueAlt={}", self.unique_alt)?;
    }
    if let Some(conflicting) = &self.conflicting_alts {
      write!(f, ",conflictingAlts={conflicting}")?;
    }
    if self.dips_into_outer_context {
      f.write_str(",dipsIntoOuterContext")?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::context::{PredictionContext, EMPTY_RETURN_STATE};

  fn ctx(states: &[usize]) -> SharedContext {
    let mut c = PredictionContext::empty();
    for s in states {
      c = PredictionContext::singleton(Some(c), *s);
    }
    c
  }

  #[test]
  fn equal_keys_merge_contexts_instead_of_growing() {
    let mut set = AtnConfigSet::new(false);
    set.add(AtnConfig::new(7, 1, ctx(&[10]))).unwrap();
    set.add(AtnConfig::new(7, 1, ctx(&[20]))).unwrap();

    assert_eq!(set.len(), 1);
    let merged = set.get(0);
    assert_eq!(merged.context.size(), 2);
    assert_eq!(merged.context.return_state(0), 10);
    assert_eq!(merged.context.return_state(1), 20);
  }

  #[test]
  fn insertion_order_is_irrelevant_to_equality() {
    let a_ctx = ctx(&[10]);
    let b_ctx = ctx(&[20]);

    let mut forward = AtnConfigSet::new(false);
    forward.add(AtnConfig::new(7, 1, a_ctx.clone())).unwrap();
    forward.add(AtnConfig::new(7, 1, b_ctx.clone())).unwrap();

    let mut backward = AtnConfigSet::new(false);
    backward.add(AtnConfig::new(7, 1, b_ctx)).unwrap();
    backward.add(AtnConfig::new(7, 1, a_ctx)).unwrap();

    assert_eq!(forward, backward);
  }

  #[test]
  fn same_sequence_yields_equal_sets() {
    let build = || {
      let mut set = AtnConfigSet::new(false);
      set.add(AtnConfig::new(1, 1, PredictionContext::empty())).unwrap();
      set.add(AtnConfig::new(2, 2, ctx(&[5]))).unwrap();
      set.add(AtnConfig::new(1, 1, ctx(&[9]))).unwrap();
      set
    };
    assert_eq!(build(), build());
  }

  #[test]
  fn ordered_variant_keeps_distinct_configs_with_equal_keys() {
    let mut set = AtnConfigSet::new_ordered();
    set.add(AtnConfig::new(7, 1, ctx(&[10]))).unwrap();
    set.add(AtnConfig::new(7, 1, ctx(&[20]))).unwrap();
    set.add(AtnConfig::new(7, 1, ctx(&[10]))).unwrap();
    assert_eq!(set.len(), 2);
  }

  #[test]
  fn frozen_sets_reject_mutation() {
    let mut set = AtnConfigSet::new(false);
    set.add(AtnConfig::new(1, 1, PredictionContext::empty())).unwrap();
    set.set_readonly(true);
    assert!(matches!(
      set.add(AtnConfig::new(2, 1, PredictionContext::empty())),
      Err(TrellisError::SetReadonly(_))
    ));
  }

  #[test]
  fn suppression_flag_and_depth_survive_merge() {
    let mut suppressed = AtnConfig::new(7, 1, ctx(&[10]));
    suppressed.set_precedence_filter_suppressed(true);
    let mut deep = AtnConfig::new(7, 1, ctx(&[20]));
    deep.increment_outer_context_depth();
    deep.increment_outer_context_depth();

    let mut set = AtnConfigSet::new(false);
    set.add(suppressed).unwrap();
    set.add(deep).unwrap();

    let merged = set.get(0);
    assert!(merged.is_precedence_filter_suppressed());
    assert_eq!(merged.outer_context_depth(), 2);
    assert!(set.dips_into_outer_context);
  }

  #[test]
  fn full_context_merge_keeps_empty_path() {
    let mut set = AtnConfigSet::new(true);
    set.add(AtnConfig::new(3, 1, PredictionContext::empty())).unwrap();
    set.add(AtnConfig::new(3, 1, ctx(&[12]))).unwrap();
    let merged = set.get(0);
    assert_eq!(merged.context.size(), 2);
    assert_eq!(merged.context.return_state(1), EMPTY_RETURN_STATE);
  }
}
