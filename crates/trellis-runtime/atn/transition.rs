use crate::types::{IntervalSet, TOKEN_EOF};

/// A typed edge between two ATN states.
///
/// Every transition answers two questions: whether it consumes input
/// (`is_epsilon` is the negative) and whether a given symbol can traverse
/// it (`matches`). Rule transitions target the callee's start state and
/// additionally record the state to resume at once the callee finishes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Transition {
  Epsilon {
    target: usize,
    /// Rule index whose left-recursive invocation this return edge exits,
    /// or -1. Consulted by the loop-entry elimination check.
    outermost_precedence_return: i32,
  },
  Range {
    target: usize,
    from:   i32,
    to:     i32,
  },
  Rule {
    /// The callee rule's start state.
    rule_start:   usize,
    rule_index:   usize,
    precedence:   i32,
    /// Where the caller resumes after the callee's stop state.
    follow_state: usize,
  },
  Predicate {
    target:           usize,
    rule_index:       usize,
    pred_index:       usize,
    is_ctx_dependent: bool,
  },
  Atom {
    target: usize,
    label:  i32,
  },
  Action {
    target:           usize,
    rule_index:       usize,
    action_index:     usize,
    is_ctx_dependent: bool,
  },
  Set {
    target: usize,
    set:    IntervalSet,
  },
  NotSet {
    target: usize,
    set:    IntervalSet,
  },
  Wildcard {
    target: usize,
  },
  PrecedencePredicate {
    target:     usize,
    precedence: i32,
  },
}

impl Transition {
  pub fn epsilon(target: usize) -> Self {
    Transition::Epsilon { target, outermost_precedence_return: -1 }
  }

  /// The state this edge leads to. For rule transitions that is the callee
  /// start state, not the follow state.
  pub fn target(&self) -> usize {
    match *self {
      Transition::Epsilon { target, .. }
      | Transition::Range { target, .. }
      | Transition::Predicate { target, .. }
      | Transition::Atom { target, .. }
      | Transition::Action { target, .. }
      | Transition::Set { target, .. }
      | Transition::NotSet { target, .. }
      | Transition::Wildcard { target }
      | Transition::PrecedencePredicate { target, .. } => target,
      Transition::Rule { rule_start, .. } => rule_start,
    }
  }

  /// True when traversal consumes no input symbol.
  pub fn is_epsilon(&self) -> bool {
    matches!(
      self,
      Transition::Epsilon { .. }
        | Transition::Rule { .. }
        | Transition::Predicate { .. }
        | Transition::Action { .. }
        | Transition::PrecedencePredicate { .. }
    )
  }

  /// Whether `symbol` can traverse this edge within the vocabulary
  /// `[min_vocab..max_vocab]`.
  pub fn matches(&self, symbol: i32, min_vocab: i32, max_vocab: i32) -> bool {
    match self {
      Transition::Atom { label, .. } => *label == symbol,
      Transition::Range { from, to, .. } => *from <= symbol && symbol <= *to,
      Transition::Set { set, .. } => set.contains(symbol),
      Transition::NotSet { set, .. } => {
        symbol >= min_vocab && symbol <= max_vocab && !set.contains(symbol)
      }
      Transition::Wildcard { .. } => symbol >= min_vocab && symbol <= max_vocab,
      _ => false,
    }
  }

  /// The label set of a consuming transition. `NotSet` returns the set it
  /// excludes; callers complement it against their vocabulary.
  pub fn label(&self) -> Option<IntervalSet> {
    match self {
      Transition::Atom { label, .. } => Some(IntervalSet::of(*label)),
      Transition::Range { from, to, .. } => Some(IntervalSet::of_range(*from, *to)),
      Transition::Set { set, .. } | Transition::NotSet { set, .. } => Some(set.clone()),
      _ => None,
    }
  }

  /// True when the transition can match the EOF pseudo-symbol.
  pub fn matches_eof(&self) -> bool {
    match self {
      Transition::Atom { label, .. } => *label == TOKEN_EOF,
      Transition::Range { from, .. } => *from == TOKEN_EOF,
      Transition::Set { set, .. } => set.contains(TOKEN_EOF),
      // NotSet and Wildcard are bounded below by the minimum vocabulary
      // symbol, which excludes EOF.
      _ => false,
    }
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn consuming_transitions_match_within_their_labels() {
    let atom = Transition::Atom { target: 1, label: 42 };
    assert!(atom.matches(42, 0, 100));
    assert!(!atom.matches(43, 0, 100));

    let range = Transition::Range { target: 1, from: 10, to: 20 };
    assert!(range.matches(10, 0, 100));
    assert!(range.matches(20, 0, 100));
    assert!(!range.matches(21, 0, 100));

    let not_set = Transition::NotSet { target: 1, set: IntervalSet::of(5) };
    assert!(not_set.matches(6, 0, 100));
    assert!(!not_set.matches(5, 0, 100));
    assert!(!not_set.matches(101, 0, 100));

    let wildcard = Transition::Wildcard { target: 1 };
    assert!(wildcard.matches(50, 0, 100));
    assert!(!wildcard.matches(TOKEN_EOF, 0, 100));
  }

  #[test]
  fn epsilon_classification_follows_consumption() {
    assert!(Transition::epsilon(3).is_epsilon());
    assert!(Transition::PrecedencePredicate { target: 3, precedence: 1 }.is_epsilon());
    assert!(Transition::Rule { rule_start: 1, rule_index: 0, precedence: 0, follow_state: 2 }.is_epsilon());
    assert!(Transition::Action { target: 3, rule_index: 0, action_index: 0, is_ctx_dependent: false }.is_epsilon());
    assert!(!Transition::Atom { target: 3, label: 7 }.is_epsilon());
    assert!(!Transition::Wildcard { target: 3 }.is_epsilon());
  }

  #[test]
  fn rule_transitions_target_the_callee_start() {
    let rule = Transition::Rule { rule_start: 9, rule_index: 2, precedence: 0, follow_state: 4 };
    assert_eq!(rule.target(), 9);
  }
}
