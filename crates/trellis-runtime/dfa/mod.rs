//! The lazily-built deterministic cache over ATN simulation results.
//!
//! One table exists per parser decision and per lexer mode. Readers follow
//! edges without coordination beyond the table lock; writers install
//! frozen configuration sets and single edge slots, so a reader either
//! sees a finished state or falls back to ATN simulation.

use std::sync::{Arc, RwLock};

use crate::{
  lexer::LexerActionExecutor,
  prediction::{AtnConfigSet, SharedSemanticContext},
  types::proxy::Map,
};

pub type DfaStateId = usize;

/// Reserved id for the dead-end sentinel. Never materialized as a state;
/// an edge carrying it means "simulation already failed here".
pub const ERROR_DFA_STATE: DfaStateId = usize::MAX;

/// A predicate guarding one alternative of a predicated accept state.
#[derive(Clone, Debug)]
pub struct PredPrediction {
  pub pred: SharedSemanticContext,
  pub alt:  u32,
}

/// Accept payload of a lexer DFA state.
#[derive(Clone, Debug)]
pub struct LexerAcceptInfo {
  pub rule_index: usize,
  pub token_type: i32,
  pub executor:   Option<Arc<LexerActionExecutor>>,
}

/// One deterministic state: a frozen configuration set plus everything
/// prediction learned about it.
#[derive(Clone, Debug)]
pub struct DfaState {
  pub id:      DfaStateId,
  pub configs: Arc<AtnConfigSet>,

  /// Outgoing edges indexed by `symbol - min_symbol + 1`; `None` means
  /// not computed yet, [`ERROR_DFA_STATE`] means dead end.
  edges: Vec<Option<DfaStateId>>,

  pub is_accept:  bool,
  pub prediction: u32,
  /// SLL discovered a conflict here; LL simulation must decide.
  pub requires_full_context: bool,
  /// Present when accepting requires runtime predicate evaluation.
  pub predicates: Option<Vec<PredPrediction>>,
  pub lexer_accept: Option<LexerAcceptInfo>,
}

struct DfaTable {
  states:     Vec<DfaState>,
  by_configs: Map<Arc<AtnConfigSet>, DfaStateId>,
  s0:         Option<DfaStateId>,
  /// Precedence-aware decisions key their start state by the parser's
  /// precedence at prediction time.
  s0_by_precedence: Map<i32, DfaStateId>,
}

impl DfaTable {
  fn empty() -> Self {
    Self {
      states:     Vec::new(),
      by_configs: Map::default(),
      s0:         None,
      s0_by_precedence: Map::default(),
    }
  }
}

/// The deterministic automaton for one decision (parser) or one mode
/// (lexer).
pub struct Dfa {
  pub decision:        usize,
  pub atn_start_state: usize,
  pub is_precedence_dfa: bool,

  /// First symbol value edges are cached for; EOF (-1) for parsers, the
  /// NUL code point for lexers.
  min_symbol: i32,
  /// Number of cached edge slots per state.
  edge_count: usize,

  table: RwLock<DfaTable>,
}

impl Dfa {
  pub fn new(
    decision: usize,
    atn_start_state: usize,
    is_precedence_dfa: bool,
    min_symbol: i32,
    max_symbol: i32,
  ) -> Self {
    Self {
      decision,
      atn_start_state,
      is_precedence_dfa,
      min_symbol,
      edge_count: (max_symbol - min_symbol + 1) as usize,
      table: RwLock::new(DfaTable::empty()),
    }
  }

  fn edge_slot(&self, symbol: i32) -> Option<usize> {
    let slot = symbol - self.min_symbol;
    (slot >= 0 && (slot as usize) < self.edge_count).then_some(slot as usize)
  }

  /// Installs `configs` as a state, returning the canonical id for that
  /// configuration set. The set must already be frozen; equal sets map to
  /// one state no matter how many simulations rediscover them.
  pub fn add_state(
    &self,
    configs: Arc<AtnConfigSet>,
    build: impl FnOnce(DfaStateId) -> DfaState,
  ) -> DfaStateId {
    debug_assert!(configs.is_readonly());
    let mut table = self.table.write().expect("poisoned");
    if let Some(&existing) = table.by_configs.get(&configs) {
      return existing;
    }
    let id = table.states.len();
    let state = build(id);
    debug_assert_eq!(state.id, id);
    table.by_configs.insert(configs, id);
    table.states.push(state);
    id
  }

  /// Reads a state under the table lock.
  pub fn read<R>(&self, id: DfaStateId, f: impl FnOnce(&DfaState) -> R) -> R {
    f(&self.table.read().expect("poisoned").states[id])
  }

  pub fn configs(&self, id: DfaStateId) -> Arc<AtnConfigSet> {
    self.read(id, |s| s.configs.clone())
  }

  pub fn edge(&self, id: DfaStateId, symbol: i32) -> Option<DfaStateId> {
    let slot = self.edge_slot(symbol)?;
    let table = self.table.read().expect("poisoned");
    table.states[id].edges.get(slot).copied().flatten()
  }

  /// Records `from --symbol--> to`. Symbols outside the cached range are
  /// simply not recorded; simulation falls back to the ATN for them.
  pub fn set_edge(&self, from: DfaStateId, symbol: i32, to: DfaStateId) {
    let Some(slot) = self.edge_slot(symbol) else { return };
    let mut table = self.table.write().expect("poisoned");
    let edges = &mut table.states[from].edges;
    if edges.len() <= slot {
      edges.resize(slot + 1, None);
    }
    edges[slot] = Some(to);
  }

  pub fn s0(&self) -> Option<DfaStateId> {
    self.table.read().expect("poisoned").s0
  }

  pub fn set_s0(&self, id: DfaStateId) {
    self.table.write().expect("poisoned").s0 = Some(id);
  }

  pub fn precedence_start_state(&self, precedence: i32) -> Option<DfaStateId> {
    self.table.read().expect("poisoned").s0_by_precedence.get(&precedence).copied()
  }

  pub fn set_precedence_start_state(&self, precedence: i32, id: DfaStateId) {
    self.table.write().expect("poisoned").s0_by_precedence.insert(precedence, id);
  }

  pub fn num_states(&self) -> usize {
    self.table.read().expect("poisoned").states.len()
  }

  /// Replaces the table with a freshly-constructed empty one.
  pub fn clear(&self) {
    *self.table.write().expect("poisoned") = DfaTable::empty();
  }

  /// Debug rendering of every state and its installed edges.
  pub fn dump(&self) -> String {
    use std::fmt::Write;
    let table = self.table.read().expect("poisoned");
    let mut out = String::new();
    for state in &table.states {
      let _ = write!(out, "s{}", state.id);
      if state.is_accept {
        let _ = write!(out, "=>{}", state.prediction);
      }
      if state.requires_full_context {
        out.push('^');
      }
      let _ = writeln!(out, " {}", state.configs);
      for (slot, target) in state.edges.iter().enumerate() {
        if let Some(target) = target {
          let symbol = slot as i32 + self.min_symbol;
          if *target == ERROR_DFA_STATE {
            let _ = writeln!(out, "  {symbol} -> <error>");
          } else {
            let _ = writeln!(out, "  {symbol} -> s{target}");
          }
        }
      }
    }
    out
  }
}

impl DfaState {
  pub fn new(id: DfaStateId, configs: Arc<AtnConfigSet>) -> Self {
    Self {
      id,
      configs,
      edges: Vec::new(),
      is_accept: false,
      prediction: crate::atn::INVALID_ALT_NUMBER,
      requires_full_context: false,
      predicates: None,
      lexer_accept: None,
    }
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::{context::PredictionContext, prediction::AtnConfig};

  fn frozen_configs(state: usize) -> Arc<AtnConfigSet> {
    let mut set = AtnConfigSet::new(false);
    set.add(AtnConfig::new(state, 1, PredictionContext::empty())).unwrap();
    set.set_readonly(true);
    Arc::new(set)
  }

  #[test]
  fn equal_config_sets_intern_to_one_state() {
    let dfa = Dfa::new(0, 0, false, -1, 100);
    let a = dfa.add_state(frozen_configs(4), |id| DfaState::new(id, frozen_configs(4)));
    let b = dfa.add_state(frozen_configs(4), |id| DfaState::new(id, frozen_configs(4)));
    let c = dfa.add_state(frozen_configs(5), |id| DfaState::new(id, frozen_configs(5)));
    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_eq!(dfa.num_states(), 2);
  }

  #[test]
  fn edges_cover_eof_and_reject_out_of_range() {
    let dfa = Dfa::new(0, 0, false, -1, 10);
    let s = dfa.add_state(frozen_configs(1), |id| DfaState::new(id, frozen_configs(1)));
    let t = dfa.add_state(frozen_configs(2), |id| DfaState::new(id, frozen_configs(2)));

    dfa.set_edge(s, -1, t);
    dfa.set_edge(s, 3, ERROR_DFA_STATE);
    dfa.set_edge(s, 4000, t);

    assert_eq!(dfa.edge(s, -1), Some(t));
    assert_eq!(dfa.edge(s, 3), Some(ERROR_DFA_STATE));
    assert_eq!(dfa.edge(s, 4000), None);
    assert_eq!(dfa.edge(s, 5), None);
  }

  #[test]
  fn clear_resets_to_empty_table() {
    let dfa = Dfa::new(2, 7, false, -1, 10);
    let s = dfa.add_state(frozen_configs(1), |id| DfaState::new(id, frozen_configs(1)));
    dfa.set_s0(s);
    dfa.clear();
    assert_eq!(dfa.num_states(), 0);
    assert_eq!(dfa.s0(), None);
  }
}
