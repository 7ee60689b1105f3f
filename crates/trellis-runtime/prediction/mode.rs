use crate::{
  atn::INVALID_ALT_NUMBER,
  prediction::{AtnConfig, AtnConfigSet, SemanticContext},
  types::{proxy::Map, AltSet},
};

/// How much context the parser simulator is willing to consult.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PredictionMode {
  /// Two-stage prediction: fast context-free stage first, full context
  /// only for decisions the first stage cannot settle. The default.
  #[default]
  Sll,
  /// Always continue to full context on SLL conflicts.
  Ll,
  /// Like `Ll`, but keep simulating until ambiguities are known exactly,
  /// for tooling that reports them.
  LlExactAmbigDetection,
}

/// Partitions `configs` by `(state, context)` and maps each partition to
/// the set of alternatives appearing in it. A partition with two or more
/// alternatives is the signature of a prediction conflict.
pub fn conflicting_alt_subsets(configs: &AtnConfigSet) -> Vec<AltSet> {
  let mut partitions: Map<(usize, crate::context::SharedContext), AltSet> = Map::default();
  for config in configs.iter() {
    partitions
      .entry((config.state, config.context.clone()))
      .or_default()
      .insert(config.alt);
  }
  partitions.into_values().collect()
}

/// Maps each state to the alternatives predicting it.
pub fn state_to_alt_map(configs: &AtnConfigSet) -> Map<usize, AltSet> {
  let mut map: Map<usize, AltSet> = Map::default();
  for config in configs.iter() {
    map.entry(config.state).or_default().insert(config.alt);
  }
  map
}

pub fn has_state_associated_with_one_alt(configs: &AtnConfigSet) -> bool {
  state_to_alt_map(configs).values().any(|alts| alts.len() == 1)
}

pub fn has_conflicting_alt_set(altsets: &[AltSet]) -> bool {
  altsets.iter().any(|alts| alts.len() > 1)
}

pub fn all_subsets_conflict(altsets: &[AltSet]) -> bool {
  altsets.iter().all(|alts| alts.len() > 1)
}

pub fn all_subsets_equal(altsets: &[AltSet]) -> bool {
  altsets.windows(2).all(|w| w[0] == w[1])
}

/// Union of the alternatives over every conflicting subset.
pub fn alts_of(altsets: &[AltSet]) -> AltSet {
  let mut union = AltSet::new();
  for alts in altsets {
    union.or_in_place(alts);
  }
  union
}

pub fn all_configs_in_rule_stop_states(configs: &AtnConfigSet, is_rule_stop: impl Fn(&AtnConfig) -> bool) -> bool {
  configs.iter().all(is_rule_stop)
}

pub fn has_config_in_rule_stop_state(configs: &AtnConfigSet, is_rule_stop: impl Fn(&AtnConfig) -> bool) -> bool {
  configs.iter().any(is_rule_stop)
}

/// Full-context termination test: when every `(state, context)` partition
/// predicts the same single minimum alternative, prediction is done and
/// that alternative wins.
pub fn single_viable_alt(altsets: &[AltSet]) -> u32 {
  let mut viable = INVALID_ALT_NUMBER;
  for alts in altsets {
    let min = alts.min().unwrap_or(INVALID_ALT_NUMBER);
    if viable == INVALID_ALT_NUMBER {
      viable = min;
    } else if viable != min {
      return INVALID_ALT_NUMBER;
    }
  }
  viable
}

/// SLL termination test. Conflicts among configurations sharing a state
/// and context cannot be resolved by more SLL lookahead, so simulation may
/// stop and either resolve to the minimum alternative or retry with full
/// context. The one exception: while any state still predicts a single
/// alternative, more input may yet separate the alternatives, so
/// prediction continues.
pub fn has_sll_conflict_terminating_prediction(
  mode: PredictionMode,
  configs: &AtnConfigSet,
  is_rule_stop: impl Fn(&AtnConfig) -> bool,
) -> bool {
  // Every path reached the end of the decision entry rule: no amount of
  // further lookahead changes anything.
  if all_configs_in_rule_stop_states(configs, &is_rule_stop) {
    return true;
  }

  let stripped;
  let configs = if mode == PredictionMode::Sll && configs.has_semantic_context {
    // Predicates are invisible to this stage; compare configurations as
    // if unpredicated so purely semantic distinctions do not mask
    // conflicts.
    let mut dup = AtnConfigSet::new(configs.full_ctx);
    for config in configs.iter() {
      let mut plain = config.clone();
      plain.semantic_context = SemanticContext::none();
      dup.add(plain).expect("fresh set is mutable");
    }
    stripped = dup;
    &stripped
  } else {
    configs
  };

  let altsets = conflicting_alt_subsets(configs);
  has_conflicting_alt_set(&altsets) && !has_state_associated_with_one_alt(configs)
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::context::PredictionContext;

  fn config(state: usize, alt: u32) -> AtnConfig {
    AtnConfig::new(state, alt, PredictionContext::empty())
  }

  fn set_of(configs: impl IntoIterator<Item = AtnConfig>) -> AtnConfigSet {
    let mut set = AtnConfigSet::new_ordered();
    for c in configs {
      set.add(c).unwrap();
    }
    set
  }

  #[test]
  fn subsets_partition_by_state_and_context() {
    let set = set_of([config(1, 1), config(1, 2), config(2, 1)]);
    let mut sizes: Vec<usize> = conflicting_alt_subsets(&set).iter().map(AltSet::len).collect();
    sizes.sort();
    assert_eq!(sizes, vec![1, 2]);
  }

  #[test]
  fn conflict_requires_no_singleton_state() {
    // (1,1) and (1,2) conflict, but state 2 still predicts a single alt,
    // so SLL prediction must continue.
    let undecided = set_of([config(1, 1), config(1, 2), config(2, 1)]);
    assert!(!has_sll_conflict_terminating_prediction(PredictionMode::Sll, &undecided, |_| false));

    let decided = set_of([config(1, 1), config(1, 2)]);
    assert!(has_sll_conflict_terminating_prediction(PredictionMode::Sll, &decided, |_| false));
  }

  #[test]
  fn rule_stop_saturation_terminates() {
    let set = set_of([config(9, 1), config(9, 2)]);
    assert!(has_sll_conflict_terminating_prediction(PredictionMode::Sll, &set, |c| c.state == 9));
  }

  #[test]
  fn single_viable_alt_needs_agreement() {
    let agreeing = vec![[1u32, 2].into_iter().collect::<AltSet>(), [1u32, 3].into_iter().collect()];
    assert_eq!(single_viable_alt(&agreeing), 1);

    let split = vec![[1u32, 2].into_iter().collect::<AltSet>(), [2u32, 3].into_iter().collect()];
    assert_eq!(single_viable_alt(&split), INVALID_ALT_NUMBER);
  }
}
