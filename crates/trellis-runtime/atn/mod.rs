mod deserialize;
mod lookahead;
mod serialize;
mod state;
mod transition;

pub use deserialize::*;
pub use lookahead::*;
pub use serialize::*;
pub use state::*;
pub use transition::*;

use std::sync::{Arc, RwLock};

use crate::{
  lexer::LexerAction,
  recognizer::RuleContext,
  types::{proxy::Map, IntervalSet, TOKEN_EOF, TOKEN_EPSILON},
};

/// Alternative number standing in for "no prediction".
pub const INVALID_ALT_NUMBER: u32 = 0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GrammarType {
  Lexer,
  Parser,
}

/// The static transition network for one grammar. Immutable once
/// deserialization finishes; every simulator instance shares one `Arc<Atn>`.
#[derive(Debug)]
pub struct Atn {
  pub grammar_type:   GrammarType,
  pub max_token_type: i32,

  /// All states, indexed by state number.
  pub states: Vec<AtnState>,

  /// Decision index -> decision state number.
  pub decision_to_state: Vec<usize>,

  pub rule_to_start_state: Vec<usize>,
  pub rule_to_stop_state:  Vec<usize>,

  /// Lexer mode -> `TokensStart` state number.
  pub mode_to_start_state: Vec<usize>,

  /// Lexer rule index -> token type produced on accept.
  pub rule_to_token_type: Vec<i32>,

  /// Action table referenced by lexer `Action` transitions.
  pub lexer_actions: Vec<LexerAction>,

  // FOLLOW sets are pure functions of the graph; memoized per state.
  next_token_cache: RwLock<Map<usize, IntervalSet>>,
}

impl Atn {
  pub fn new(grammar_type: GrammarType, max_token_type: i32) -> Self {
    Self {
      grammar_type,
      max_token_type,
      states: Vec::new(),
      decision_to_state: Vec::new(),
      rule_to_start_state: Vec::new(),
      rule_to_stop_state: Vec::new(),
      mode_to_start_state: Vec::new(),
      rule_to_token_type: Vec::new(),
      lexer_actions: Vec::new(),
      next_token_cache: RwLock::new(Map::default()),
    }
  }

  pub fn state(&self, number: usize) -> &AtnState {
    &self.states[number]
  }

  pub fn num_states(&self) -> usize {
    self.states.len()
  }

  pub fn num_rules(&self) -> usize {
    self.rule_to_start_state.len()
  }

  pub fn decision_state(&self, decision: usize) -> usize {
    self.decision_to_state[decision]
  }

  /// Token types that can follow `state` anywhere the owning rule is
  /// invoked from. Contains EPSILON when the rule can complete here.
  pub fn next_tokens(&self, state: usize) -> IntervalSet {
    if let Some(cached) = self.next_token_cache.read().expect("poisoned").get(&state) {
      return cached.clone();
    }
    let mut computed = LookaheadAnalyzer::new(self).look(state, None, None);
    computed.set_readonly(true);
    self
      .next_token_cache
      .write()
      .expect("poisoned")
      .entry(state)
      .or_insert(computed)
      .clone()
  }

  /// Token types that can follow `state` in the specific invocation chain
  /// `ctx`.
  pub fn next_tokens_in_context(&self, state: usize, ctx: Option<&Arc<RuleContext>>) -> IntervalSet {
    LookaheadAnalyzer::new(self).look(state, None, ctx)
  }

  /// The tokens a recognizer stopped at `state` under `ctx` would accept
  /// next; the set error reporters print. Walks the invocation chain as
  /// long as the current rule can complete.
  pub fn expected_tokens(&self, state: usize, ctx: Option<&Arc<RuleContext>>) -> IntervalSet {
    let epsilon = IntervalSet::of(TOKEN_EPSILON);
    let mut following = self.next_tokens(state);
    if !following.contains(TOKEN_EPSILON) {
      return following;
    }

    let mut expected = following.subtract(&epsilon);
    let mut ctx = ctx.cloned();
    while let Some(current) = ctx {
      if current.is_empty() || !following.contains(TOKEN_EPSILON) {
        break;
      }
      let invoking = self.state(current.invoking_state as usize);
      let Transition::Rule { follow_state, .. } = invoking.transition(0) else {
        break;
      };
      following = self.next_tokens(*follow_state);
      expected.add_set(&following.subtract(&epsilon));
      ctx = current.parent.clone();
    }

    if following.contains(TOKEN_EPSILON) {
      expected.add_one(TOKEN_EOF);
    }
    expected
  }
}
