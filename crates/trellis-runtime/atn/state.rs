use super::Transition;

/// State number standing in for "no state".
pub const INVALID_STATE_NUMBER: usize = usize::MAX;

/// Decision bookkeeping shared by every state kind that heads a decision.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DecisionData {
  /// Index into the automaton's decision table, or -1 before assignment.
  pub decision:   i32,
  pub non_greedy: bool,
}

impl DecisionData {
  pub fn unassigned() -> Self {
    Self { decision: -1, non_greedy: false }
  }
}

/// Role of a state within its rule's subgraph. Back-links (`end_state`,
/// `loop_back`, ...) are state numbers resolved during deserialization;
/// they reference, they do not own.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AtnStateKind {
  Basic,
  RuleStart {
    stop_state:        usize,
    is_left_recursive: bool,
  },
  RuleStop,
  /// Start of a plain `( ... )` block.
  BlockStart {
    end_state: usize,
    decision:  DecisionData,
  },
  /// Start of the block inside a `( ... )+` loop.
  PlusBlockStart {
    end_state: usize,
    loop_back: usize,
    decision:  DecisionData,
  },
  /// Start of the block inside a `( ... )*` loop.
  StarBlockStart {
    end_state: usize,
    decision:  DecisionData,
  },
  BlockEnd {
    start_state: usize,
  },
  PlusLoopback {
    decision: DecisionData,
  },
  StarLoopback,
  StarLoopEntry {
    loop_back: usize,
    /// Set for loop entries produced by left-recursion elimination; these
    /// are the decisions the precedence filter applies to.
    is_precedence_decision: bool,
    decision:  DecisionData,
  },
  LoopEnd {
    loop_back: usize,
  },
  /// The synthetic start state fanning out to every rule of a lexer mode.
  TokensStart {
    decision: DecisionData,
  },
}

/// One node of the augmented transition network.
#[derive(Clone, Debug)]
pub struct AtnState {
  /// Unique within the owning automaton; equals this state's index in
  /// [`crate::atn::Atn::states`].
  pub number:      usize,
  pub rule_index:  usize,
  /// True when every outgoing transition is an epsilon transition.
  pub epsilon_only_transitions: bool,
  pub transitions: Vec<Transition>,
  pub kind:        AtnStateKind,
}

impl AtnState {
  pub fn new(number: usize, rule_index: usize, kind: AtnStateKind) -> Self {
    Self {
      number,
      rule_index,
      // False until the first transition arrives. Closure leans on this:
      // an edgeless rule stop must read as "not epsilon-only" so the
      // configuration that reached it is recorded.
      epsilon_only_transitions: false,
      transitions: Vec::new(),
      kind,
    }
  }

  pub fn add_transition(&mut self, transition: Transition) {
    if self.transitions.is_empty() {
      self.epsilon_only_transitions = transition.is_epsilon();
    } else if !transition.is_epsilon() {
      self.epsilon_only_transitions = false;
    }
    self.transitions.push(transition);
  }

  pub fn transition(&self, i: usize) -> &Transition {
    &self.transitions[i]
  }

  pub fn is_rule_stop(&self) -> bool {
    matches!(self.kind, AtnStateKind::RuleStop)
  }

  pub fn is_rule_start(&self) -> bool {
    matches!(self.kind, AtnStateKind::RuleStart { .. })
  }

  pub fn is_decision(&self) -> bool {
    self.decision_data().is_some()
  }

  pub fn decision_data(&self) -> Option<&DecisionData> {
    match &self.kind {
      AtnStateKind::BlockStart { decision, .. }
      | AtnStateKind::PlusBlockStart { decision, .. }
      | AtnStateKind::StarBlockStart { decision, .. }
      | AtnStateKind::PlusLoopback { decision }
      | AtnStateKind::StarLoopEntry { decision, .. }
      | AtnStateKind::TokensStart { decision } => Some(decision),
      _ => None,
    }
  }

  pub fn decision_data_mut(&mut self) -> Option<&mut DecisionData> {
    match &mut self.kind {
      AtnStateKind::BlockStart { decision, .. }
      | AtnStateKind::PlusBlockStart { decision, .. }
      | AtnStateKind::StarBlockStart { decision, .. }
      | AtnStateKind::PlusLoopback { decision }
      | AtnStateKind::StarLoopEntry { decision, .. }
      | AtnStateKind::TokensStart { decision } => Some(decision),
      _ => None,
    }
  }

  /// Decision number when this state heads a decision, -1 otherwise.
  pub fn decision(&self) -> i32 {
    self.decision_data().map(|d| d.decision).unwrap_or(-1)
  }

  pub fn is_non_greedy(&self) -> bool {
    self.decision_data().map(|d| d.non_greedy).unwrap_or(false)
  }

  /// Start of any of the three block shapes.
  pub fn is_block_start(&self) -> bool {
    matches!(
      self.kind,
      AtnStateKind::BlockStart { .. }
        | AtnStateKind::PlusBlockStart { .. }
        | AtnStateKind::StarBlockStart { .. }
    )
  }

  pub fn block_end_state(&self) -> Option<usize> {
    match self.kind {
      AtnStateKind::BlockStart { end_state, .. }
      | AtnStateKind::PlusBlockStart { end_state, .. }
      | AtnStateKind::StarBlockStart { end_state, .. } => Some(end_state),
      _ => None,
    }
  }

  /// True for loop-entry states marked by left-recursion elimination.
  pub fn is_precedence_decision(&self) -> bool {
    matches!(self.kind, AtnStateKind::StarLoopEntry { is_precedence_decision: true, .. })
  }
}
