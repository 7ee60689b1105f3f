use uuid::Uuid;

use crate::{
  atn::{Atn, AtnState, AtnStateKind, DecisionData, GrammarType, Transition, INVALID_STATE_NUMBER},
  lexer::LexerAction,
  types::{IntervalSet, TrellisError, TrellisResult, TOKEN_EOF},
};

/// Format version this runtime reads and writes.
pub const SERIALIZED_VERSION: u16 = 3;

/// Rule index of states owned by no rule (a lexer mode's `TokensStart`).
pub const INVALID_RULE_INDEX: usize = usize::MAX;

/// Feature revisions, oldest first. Each revision carries everything the
/// previous ones introduced.
///
/// * `BASE_REVISION`: states, sets, edges; historical, no longer accepted.
/// * `PRECEDENCE_REVISION`: precedence predicate transitions and
///   left-recursive rule marking.
/// * `LEXER_ACTIONS_REVISION`: the lexer action table.
/// * `UNICODE_SMP_REVISION`: interval sets with supplementary-plane code
///   points; the revision the serializer emits.
pub const BASE_REVISION: Uuid = Uuid::from_u128(0x7a9b_01c4_3f62_4bd1_9e58_20c1d7a44e02);
pub const PRECEDENCE_REVISION: Uuid = Uuid::from_u128(0x52f5_7e8d_88a1_4c30_b64f_0d93a2c6718b);
pub const LEXER_ACTIONS_REVISION: Uuid = Uuid::from_u128(0xc3ae_92b0_51d7_4f09_8a66_e47b95d01f23);
pub const UNICODE_SMP_REVISION: Uuid = Uuid::from_u128(0x1e04_66dd_2c9a_4e8f_bb31_7f58c4a9d6a0);

const REVISIONS: [Uuid; 4] =
  [BASE_REVISION, PRECEDENCE_REVISION, LEXER_ACTIONS_REVISION, UNICODE_SMP_REVISION];

/// Revisions this runtime accepts. The base revision predates the lexer
/// action table, whose legacy encoding is not carried here.
const SUPPORTED_REVISIONS: [Uuid; 3] =
  [PRECEDENCE_REVISION, LEXER_ACTIONS_REVISION, UNICODE_SMP_REVISION];

fn is_feature_supported(feature: Uuid, actual: Uuid) -> bool {
  let Some(introduced) = REVISIONS.iter().position(|u| *u == feature) else {
    return false;
  };
  REVISIONS.iter().position(|u| *u == actual).map(|i| i >= introduced).unwrap_or(false)
}

// State type codes, in serialization order.
const STATE_BASIC: u16 = 1;
const STATE_RULE_START: u16 = 2;
const STATE_BLOCK_START: u16 = 3;
const STATE_PLUS_BLOCK_START: u16 = 4;
const STATE_STAR_BLOCK_START: u16 = 5;
const STATE_TOKENS_START: u16 = 6;
const STATE_RULE_STOP: u16 = 7;
const STATE_BLOCK_END: u16 = 8;
const STATE_STAR_LOOP_BACK: u16 = 9;
const STATE_STAR_LOOP_ENTRY: u16 = 10;
const STATE_PLUS_LOOP_BACK: u16 = 11;
const STATE_LOOP_END: u16 = 12;

// Edge type codes.
pub(super) const EDGE_EPSILON: u16 = 1;
pub(super) const EDGE_RANGE: u16 = 2;
pub(super) const EDGE_RULE: u16 = 3;
pub(super) const EDGE_PREDICATE: u16 = 4;
pub(super) const EDGE_ATOM: u16 = 5;
pub(super) const EDGE_ACTION: u16 = 6;
pub(super) const EDGE_SET: u16 = 7;
pub(super) const EDGE_NOT_SET: u16 = 8;
pub(super) const EDGE_WILDCARD: u16 = 9;
pub(super) const EDGE_PRECEDENCE: u16 = 10;

// Lexer action type codes.
pub(super) const ACTION_CHANNEL: u16 = 0;
pub(super) const ACTION_CUSTOM: u16 = 1;
pub(super) const ACTION_MODE: u16 = 2;
pub(super) const ACTION_MORE: u16 = 3;
pub(super) const ACTION_POP_MODE: u16 = 4;
pub(super) const ACTION_PUSH_MODE: u16 = 5;
pub(super) const ACTION_SKIP: u16 = 6;
pub(super) const ACTION_TYPE: u16 = 7;

struct WordCursor {
  data: Vec<u16>,
  pos:  usize,
}

impl WordCursor {
  fn next(&mut self) -> TrellisResult<u16> {
    let word = self
      .data
      .get(self.pos)
      .copied()
      .ok_or_else(|| TrellisError::CorruptedAtn(format!("truncated at word {}", self.pos)))?;
    self.pos += 1;
    Ok(word)
  }

  fn next_usize(&mut self) -> TrellisResult<usize> {
    Ok(self.next()? as usize)
  }

  /// A token-type-shaped slot: 0xFFFF decodes to -1.
  fn next_signed(&mut self) -> TrellisResult<i32> {
    Ok(match self.next()? {
      0xFFFF => -1,
      w => w as i32,
    })
  }

  /// A 32-bit value as two words, low word first.
  fn next_code_point_wide(&mut self) -> TrellisResult<i32> {
    let low = self.next()? as u32;
    let high = self.next()? as u32;
    Ok((low | (high << 16)) as i32)
  }
}

/// Decodes the versioned word stream produced by a compatible serializer
/// into a verified [`Atn`].
pub struct AtnDeserializer {
  verify: bool,
}

impl Default for AtnDeserializer {
  fn default() -> Self {
    Self { verify: true }
  }
}

impl AtnDeserializer {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn without_verification() -> Self {
    Self { verify: false }
  }

  pub fn deserialize(&self, words: &[u16]) -> TrellisResult<Atn> {
    if words.is_empty() {
      return Err(TrellisError::CorruptedAtn("empty data".into()));
    }
    if words[0] != SERIALIZED_VERSION {
      return Err(TrellisError::UnsupportedVersion {
        found:    words[0],
        expected: SERIALIZED_VERSION,
      });
    }

    // Every word after the version is stored offset by +2 so the common
    // small values avoid 0x0000/0x0001, which the producer escapes.
    let mut data = Vec::with_capacity(words.len());
    data.push(words[0]);
    data.extend(words[1..].iter().map(|w| w.wrapping_sub(2)));
    let mut c = WordCursor { data, pos: 1 };

    let uuid = read_uuid(&mut c)?;
    if !SUPPORTED_REVISIONS.contains(&uuid) {
      return Err(TrellisError::UnsupportedUuid { uuid });
    }
    let supports_precedence = is_feature_supported(PRECEDENCE_REVISION, uuid);
    let supports_lexer_actions = is_feature_supported(LEXER_ACTIONS_REVISION, uuid);
    let supports_wide_sets = is_feature_supported(UNICODE_SMP_REVISION, uuid);

    let grammar_type = match c.next()? {
      0 => GrammarType::Lexer,
      1 => GrammarType::Parser,
      other => return Err(TrellisError::CorruptedAtn(format!("unknown grammar type {other}"))),
    };
    let max_token_type = c.next_signed()?;
    let mut atn = Atn::new(grammar_type, max_token_type);

    self.read_states(&mut c, &mut atn)?;
    self.read_non_greedy_flags(&mut c, &mut atn)?;
    if supports_precedence {
      self.read_precedence_flags(&mut c, &mut atn)?;
    }
    self.read_rules(&mut c, &mut atn, supports_lexer_actions)?;
    self.read_modes(&mut c, &mut atn)?;

    let mut sets = Vec::new();
    self.read_sets(&mut c, &mut sets, false)?;
    if supports_wide_sets {
      self.read_sets(&mut c, &mut sets, true)?;
    }

    self.read_edges(&mut c, &mut atn, &sets)?;
    self.derive_rule_stop_returns(&mut atn)?;
    self.link_block_and_loop_states(&mut atn)?;
    self.read_decisions(&mut c, &mut atn)?;
    if grammar_type == GrammarType::Lexer {
      self.read_lexer_actions(&mut c, &mut atn, supports_lexer_actions)?;
    }

    mark_precedence_decisions(&mut atn)?;
    if self.verify {
      verify_atn(&atn)?;
    }
    Ok(atn)
  }

  fn read_states(&self, c: &mut WordCursor, atn: &mut Atn) -> TrellisResult<()> {
    // Back-links named before their targets exist; resolved after the
    // whole table is read.
    let mut loop_back_links: Vec<(usize, usize)> = Vec::new();
    let mut end_state_links: Vec<(usize, usize)> = Vec::new();

    let nstates = c.next_usize()?;
    for number in 0..nstates {
      let stype = c.next()?;
      let rule_index = match c.next()? {
        0xFFFF => INVALID_RULE_INDEX,
        w => w as usize,
      };

      let kind = match stype {
        STATE_BASIC => AtnStateKind::Basic,
        STATE_RULE_START => AtnStateKind::RuleStart {
          stop_state:        INVALID_STATE_NUMBER,
          is_left_recursive: false,
        },
        STATE_RULE_STOP => AtnStateKind::RuleStop,
        STATE_BLOCK_START => {
          end_state_links.push((number, c.next_usize()?));
          AtnStateKind::BlockStart { end_state: INVALID_STATE_NUMBER, decision: DecisionData::unassigned() }
        }
        STATE_PLUS_BLOCK_START => {
          end_state_links.push((number, c.next_usize()?));
          AtnStateKind::PlusBlockStart {
            end_state: INVALID_STATE_NUMBER,
            loop_back: INVALID_STATE_NUMBER,
            decision:  DecisionData::unassigned(),
          }
        }
        STATE_STAR_BLOCK_START => {
          end_state_links.push((number, c.next_usize()?));
          AtnStateKind::StarBlockStart { end_state: INVALID_STATE_NUMBER, decision: DecisionData::unassigned() }
        }
        STATE_TOKENS_START => AtnStateKind::TokensStart { decision: DecisionData::unassigned() },
        STATE_BLOCK_END => AtnStateKind::BlockEnd { start_state: INVALID_STATE_NUMBER },
        STATE_STAR_LOOP_BACK => AtnStateKind::StarLoopback,
        STATE_STAR_LOOP_ENTRY => AtnStateKind::StarLoopEntry {
          loop_back: INVALID_STATE_NUMBER,
          is_precedence_decision: false,
          decision:  DecisionData::unassigned(),
        },
        STATE_PLUS_LOOP_BACK => AtnStateKind::PlusLoopback { decision: DecisionData::unassigned() },
        STATE_LOOP_END => {
          loop_back_links.push((number, c.next_usize()?));
          AtnStateKind::LoopEnd { loop_back: INVALID_STATE_NUMBER }
        }
        other => {
          return Err(TrellisError::CorruptedAtn(format!(
            "unknown state type {other} for state {number}"
          )))
        }
      };

      atn.states.push(AtnState::new(number, rule_index, kind));
    }

    for (state, target) in loop_back_links {
      let AtnStateKind::LoopEnd { loop_back } = &mut atn.states[state].kind else {
        unreachable!("collected only from LoopEnd states");
      };
      *loop_back = target;
    }
    for (state, target) in end_state_links {
      match &mut atn.states[state].kind {
        AtnStateKind::BlockStart { end_state, .. }
        | AtnStateKind::PlusBlockStart { end_state, .. }
        | AtnStateKind::StarBlockStart { end_state, .. } => *end_state = target,
        _ => unreachable!("collected only from block-start states"),
      }
    }
    Ok(())
  }

  fn read_non_greedy_flags(&self, c: &mut WordCursor, atn: &mut Atn) -> TrellisResult<()> {
    let count = c.next_usize()?;
    for _ in 0..count {
      let number = c.next_usize()?;
      let data = atn
        .states
        .get_mut(number)
        .and_then(AtnState::decision_data_mut)
        .ok_or_else(|| {
          TrellisError::CorruptedAtn(format!("non-greedy flag on non-decision state {number}"))
        })?;
      data.non_greedy = true;
    }
    Ok(())
  }

  fn read_precedence_flags(&self, c: &mut WordCursor, atn: &mut Atn) -> TrellisResult<()> {
    let count = c.next_usize()?;
    for _ in 0..count {
      let number = c.next_usize()?;
      match atn.states.get_mut(number).map(|s| &mut s.kind) {
        Some(AtnStateKind::RuleStart { is_left_recursive, .. }) => *is_left_recursive = true,
        _ => {
          return Err(TrellisError::CorruptedAtn(format!(
            "precedence flag on non-rule-start state {number}"
          )))
        }
      }
    }
    Ok(())
  }

  fn read_rules(
    &self,
    c: &mut WordCursor,
    atn: &mut Atn,
    supports_lexer_actions: bool,
  ) -> TrellisResult<()> {
    let nrules = c.next_usize()?;
    for _ in 0..nrules {
      let start = c.next_usize()?;
      atn.rule_to_start_state.push(start);
      if atn.grammar_type == GrammarType::Lexer {
        atn.rule_to_token_type.push(c.next_signed()?);
        if !supports_lexer_actions {
          // Legacy per-rule action slot; the table-based revision moved
          // actions onto transitions.
          let _legacy_action_index = c.next_signed()?;
        }
      }
    }

    // Stop states are not serialized; derive them from the state table.
    atn.rule_to_stop_state = vec![INVALID_STATE_NUMBER; nrules];
    for number in 0..atn.states.len() {
      let state = &atn.states[number];
      if !state.is_rule_stop() || state.rule_index >= nrules {
        continue;
      }
      atn.rule_to_stop_state[state.rule_index] = number;
      let start = atn.rule_to_start_state[state.rule_index];
      if let AtnStateKind::RuleStart { stop_state, .. } = &mut atn.states[start].kind {
        *stop_state = number;
      }
    }
    Ok(())
  }

  fn read_modes(&self, c: &mut WordCursor, atn: &mut Atn) -> TrellisResult<()> {
    let nmodes = c.next_usize()?;
    for _ in 0..nmodes {
      atn.mode_to_start_state.push(c.next_usize()?);
    }
    Ok(())
  }

  fn read_sets(
    &self,
    c: &mut WordCursor,
    sets: &mut Vec<IntervalSet>,
    wide: bool,
  ) -> TrellisResult<()> {
    let nsets = c.next_usize()?;
    for _ in 0..nsets {
      let nintervals = c.next_usize()?;
      let mut set = IntervalSet::new();
      if c.next()? != 0 {
        set.add_one(TOKEN_EOF);
      }
      for _ in 0..nintervals {
        let (a, b) = if wide {
          (c.next_code_point_wide()?, c.next_code_point_wide()?)
        } else {
          (c.next()? as i32, c.next()? as i32)
        };
        set.add_range(a, b);
      }
      sets.push(set);
    }
    Ok(())
  }

  fn read_edges(&self, c: &mut WordCursor, atn: &mut Atn, sets: &[IntervalSet]) -> TrellisResult<()> {
    let nedges = c.next_usize()?;
    for _ in 0..nedges {
      let src = c.next_usize()?;
      let trg = c.next_usize()?;
      let ttype = c.next()?;
      let arg1 = c.next()?;
      let arg2 = c.next()?;
      let arg3 = c.next()?;

      let lookup_set = |index: u16| -> TrellisResult<IntervalSet> {
        sets
          .get(index as usize)
          .cloned()
          .ok_or_else(|| TrellisError::CorruptedAtn(format!("edge references missing set {index}")))
      };

      let transition = match ttype {
        EDGE_EPSILON => Transition::epsilon(trg),
        EDGE_RANGE => Transition::Range {
          target: trg,
          from:   if arg3 != 0 { TOKEN_EOF } else { arg1 as i32 },
          to:     arg2 as i32,
        },
        EDGE_RULE => Transition::Rule {
          rule_start:   arg1 as usize,
          rule_index:   arg2 as usize,
          precedence:   arg3 as i32,
          follow_state: trg,
        },
        EDGE_PREDICATE => Transition::Predicate {
          target:           trg,
          rule_index:       arg1 as usize,
          pred_index:       arg2 as usize,
          is_ctx_dependent: arg3 != 0,
        },
        EDGE_ATOM => Transition::Atom {
          target: trg,
          label:  if arg3 != 0 { TOKEN_EOF } else { arg1 as i32 },
        },
        EDGE_ACTION => Transition::Action {
          target:           trg,
          rule_index:       arg1 as usize,
          action_index:     arg2 as usize,
          is_ctx_dependent: arg3 != 0,
        },
        EDGE_SET => Transition::Set { target: trg, set: lookup_set(arg1)? },
        EDGE_NOT_SET => Transition::NotSet { target: trg, set: lookup_set(arg1)? },
        EDGE_WILDCARD => Transition::Wildcard { target: trg },
        EDGE_PRECEDENCE => Transition::PrecedencePredicate { target: trg, precedence: arg1 as i32 },
        other => return Err(TrellisError::CorruptedAtn(format!("unknown edge type {other}"))),
      };

      if src >= atn.states.len() || transition.target() >= atn.states.len() {
        return Err(TrellisError::CorruptedAtn(format!("edge out of range: {src} -> {trg}")));
      }
      atn.states[src].add_transition(transition);
    }
    Ok(())
  }

  /// Every rule invocation implies an epsilon from the callee's stop state
  /// back to the caller's follow state. These are derived, not serialized.
  fn derive_rule_stop_returns(&self, atn: &mut Atn) -> TrellisResult<()> {
    let mut returns: Vec<(usize, Transition)> = Vec::new();
    for state in &atn.states {
      for transition in &state.transitions {
        let Transition::Rule { rule_index, precedence, follow_state, .. } = transition else {
          continue;
        };
        let start = *atn.rule_to_start_state.get(*rule_index).ok_or_else(|| {
          TrellisError::CorruptedAtn(format!("rule transition to unknown rule {rule_index}"))
        })?;
        let left_recursive =
          matches!(atn.states[start].kind, AtnStateKind::RuleStart { is_left_recursive: true, .. });
        let outermost_precedence_return =
          if left_recursive && *precedence == 0 { *rule_index as i32 } else { -1 };
        let stop = atn.rule_to_stop_state[*rule_index];
        returns.push((stop, Transition::Epsilon {
          target: *follow_state,
          outermost_precedence_return,
        }));
      }
    }
    for (stop, transition) in returns {
      atn.states[stop].add_transition(transition);
    }
    Ok(())
  }

  /// Structural link-up that needs the full edge table: block ends learn
  /// their starts, loop entries and plus-blocks learn their loop-backs.
  fn link_block_and_loop_states(&self, atn: &mut Atn) -> TrellisResult<()> {
    let mut start_links: Vec<(usize, usize)> = Vec::new();
    let mut loop_back_links: Vec<(usize, usize)> = Vec::new();

    for state in &atn.states {
      if let Some(end_state) = state.block_end_state() {
        start_links.push((end_state, state.number));
      }
      match state.kind {
        AtnStateKind::PlusLoopback { .. } => {
          for t in &state.transitions {
            if matches!(atn.states[t.target()].kind, AtnStateKind::PlusBlockStart { .. }) {
              loop_back_links.push((t.target(), state.number));
            }
          }
        }
        AtnStateKind::StarLoopback => {
          for t in &state.transitions {
            if matches!(atn.states[t.target()].kind, AtnStateKind::StarLoopEntry { .. }) {
              loop_back_links.push((t.target(), state.number));
            }
          }
        }
        _ => {}
      }
    }

    for (end, start) in start_links {
      match &mut atn.states[end].kind {
        AtnStateKind::BlockEnd { start_state } => *start_state = start,
        _ => {
          return Err(TrellisError::CorruptedAtn(format!(
            "block start {start} names non-block-end state {end}"
          )))
        }
      }
    }
    for (state, back) in loop_back_links {
      match &mut atn.states[state].kind {
        AtnStateKind::PlusBlockStart { loop_back, .. }
        | AtnStateKind::StarLoopEntry { loop_back, .. } => *loop_back = back,
        _ => unreachable!("collected only from loop targets"),
      }
    }
    Ok(())
  }

  fn read_decisions(&self, c: &mut WordCursor, atn: &mut Atn) -> TrellisResult<()> {
    let ndecisions = c.next_usize()?;
    for decision in 0..ndecisions {
      let number = c.next_usize()?;
      atn.decision_to_state.push(number);
      let data = atn
        .states
        .get_mut(number)
        .and_then(AtnState::decision_data_mut)
        .ok_or_else(|| {
          TrellisError::CorruptedAtn(format!("decision {decision} names non-decision state {number}"))
        })?;
      data.decision = decision as i32;
    }
    Ok(())
  }

  fn read_lexer_actions(
    &self,
    c: &mut WordCursor,
    atn: &mut Atn,
    supports_lexer_actions: bool,
  ) -> TrellisResult<()> {
    if !supports_lexer_actions {
      return Ok(());
    }
    let nactions = c.next_usize()?;
    for _ in 0..nactions {
      let action_type = c.next()?;
      let data1 = c.next_signed()?;
      let data2 = c.next_signed()?;
      let action = match action_type {
        ACTION_CHANNEL => LexerAction::Channel { channel: data1 },
        ACTION_CUSTOM => LexerAction::Custom {
          rule_index:   data1 as usize,
          action_index: data2 as usize,
        },
        ACTION_MODE => LexerAction::Mode { mode: data1 as usize },
        ACTION_MORE => LexerAction::More,
        ACTION_POP_MODE => LexerAction::PopMode,
        ACTION_PUSH_MODE => LexerAction::PushMode { mode: data1 as usize },
        ACTION_SKIP => LexerAction::Skip,
        ACTION_TYPE => LexerAction::Type { token_type: data1 },
        other => return Err(TrellisError::CorruptedAtn(format!("unknown lexer action {other}"))),
      };
      atn.lexer_actions.push(action);
    }
    Ok(())
  }
}

fn read_uuid(c: &mut WordCursor) -> TrellisResult<Uuid> {
  let mut words = [0u16; 8];
  for w in &mut words {
    *w = c.next()?;
  }
  let to_u64 =
    |ws: &[u16]| ws.iter().enumerate().fold(0u64, |acc, (i, w)| acc | ((*w as u64) << (16 * i)));
  Ok(Uuid::from_u64_pair(to_u64(&words[4..8]), to_u64(&words[0..4])))
}

pub(super) fn uuid_words(uuid: Uuid) -> [u16; 8] {
  let (most, least) = uuid.as_u64_pair();
  let mut words = [0u16; 8];
  for i in 0..4 {
    words[i] = (least >> (16 * i)) as u16;
    words[i + 4] = (most >> (16 * i)) as u16;
  }
  words
}

/// Flags `StarLoopEntry` states produced by left-recursion elimination:
/// the entry's owning rule is left-recursive and its last transition runs
/// through an epsilon-only `LoopEnd` straight to the rule stop.
fn mark_precedence_decisions(atn: &mut Atn) -> TrellisResult<()> {
  let mut precedence_entries = Vec::new();
  for state in &atn.states {
    if !matches!(state.kind, AtnStateKind::StarLoopEntry { .. }) {
      continue;
    }
    let Some(&start) = atn.rule_to_start_state.get(state.rule_index) else { continue };
    if !matches!(atn.states[start].kind, AtnStateKind::RuleStart { is_left_recursive: true, .. }) {
      continue;
    }

    let Some(last) = state.transitions.last() else { continue };
    let maybe_loop_end = &atn.states[last.target()];
    if !matches!(maybe_loop_end.kind, AtnStateKind::LoopEnd { .. }) {
      continue;
    }
    if maybe_loop_end.epsilon_only_transitions
      && maybe_loop_end
        .transitions
        .first()
        .map(|t| atn.states[t.target()].is_rule_stop())
        .unwrap_or(false)
    {
      precedence_entries.push(state.number);
    }
  }

  for number in precedence_entries {
    let AtnStateKind::StarLoopEntry { is_precedence_decision, .. } = &mut atn.states[number].kind
    else {
      unreachable!("collected only from StarLoopEntry states");
    };
    *is_precedence_decision = true;
  }
  Ok(())
}

fn check(condition: bool, message: impl FnOnce() -> String) -> TrellisResult<()> {
  if condition {
    Ok(())
  } else {
    Err(TrellisError::CorruptedAtn(message()))
  }
}

/// Structural invariants every well-formed automaton satisfies. Cheap
/// relative to deserialization; enabled by default.
fn verify_atn(atn: &Atn) -> TrellisResult<()> {
  for state in &atn.states {
    let n = state.number;
    check(
      state.epsilon_only_transitions == state.transitions.iter().all(Transition::is_epsilon)
        || state.transitions.len() <= 1,
      || format!("state {n}: epsilon-only flag disagrees with transitions"),
    )?;
    check(
      state.epsilon_only_transitions || state.transitions.len() <= 1,
      || format!("state {n}: multiple transitions must all be epsilon"),
    )?;

    match &state.kind {
      AtnStateKind::PlusBlockStart { loop_back, .. } => {
        check(*loop_back != INVALID_STATE_NUMBER, || format!("state {n}: plus block without loop-back"))?;
      }
      AtnStateKind::StarLoopEntry { loop_back, decision, .. } => {
        check(*loop_back != INVALID_STATE_NUMBER, || format!("state {n}: loop entry without loop-back"))?;
        check(state.transitions.len() == 2, || {
          format!("state {n}: loop entry must have exactly two transitions")
        })?;
        let first = &atn.states[state.transitions[0].target()];
        let second = &atn.states[state.transitions[1].target()];
        match (&first.kind, &second.kind) {
          (AtnStateKind::StarBlockStart { .. }, AtnStateKind::LoopEnd { .. }) => {
            check(!decision.non_greedy, || format!("state {n}: greedy loop entry ordered as non-greedy"))?;
          }
          (AtnStateKind::LoopEnd { .. }, AtnStateKind::StarBlockStart { .. }) => {
            check(decision.non_greedy, || format!("state {n}: non-greedy loop entry ordered as greedy"))?;
          }
          _ => {
            return Err(TrellisError::CorruptedAtn(format!(
              "state {n}: loop entry targets neither block start nor loop end"
            )))
          }
        }
      }
      AtnStateKind::StarLoopback => {
        check(state.transitions.len() == 1, || format!("state {n}: loop-back must have one edge"))?;
        check(
          matches!(atn.states[state.transitions[0].target()].kind, AtnStateKind::StarLoopEntry { .. }),
          || format!("state {n}: loop-back must re-enter its loop entry"),
        )?;
      }
      AtnStateKind::LoopEnd { loop_back } => {
        check(*loop_back != INVALID_STATE_NUMBER, || format!("state {n}: loop end without loop-back"))?;
      }
      AtnStateKind::RuleStart { stop_state, .. } => {
        check(*stop_state != INVALID_STATE_NUMBER, || format!("state {n}: rule start without stop state"))?;
      }
      AtnStateKind::BlockEnd { start_state } => {
        check(*start_state != INVALID_STATE_NUMBER, || format!("state {n}: block end without start"))?;
      }
      _ => {}
    }

    if let Some(end_state) = state.block_end_state() {
      check(end_state != INVALID_STATE_NUMBER, || format!("state {n}: block start without end"))?;
      check(
        matches!(atn.states[end_state].kind, AtnStateKind::BlockEnd { start_state } if start_state == n),
        || format!("state {n}: block start/end back-links disagree"),
      )?;
    }

    match state.decision_data() {
      Some(data) => {
        check(state.transitions.len() <= 1 || data.decision >= 0, || {
          format!("state {n}: decision state with multiple transitions but no decision number")
        })?;
      }
      None => {
        check(state.transitions.len() <= 1 || state.is_rule_stop(), || {
          format!("state {n}: only decision and rule-stop states may branch")
        })?;
      }
    }
  }
  Ok(())
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn version_gate_fires_before_anything_else() {
    let err = AtnDeserializer::new().deserialize(&[SERIALIZED_VERSION + 1, 0, 0]).unwrap_err();
    assert!(matches!(err, TrellisError::UnsupportedVersion { found, expected }
      if found == SERIALIZED_VERSION + 1 && expected == SERIALIZED_VERSION));
  }

  #[test]
  fn unknown_revision_is_rejected() {
    let mut words = vec![SERIALIZED_VERSION];
    let alien = Uuid::from_u128(0xdead_beef_dead_beef_dead_beef_dead_beef);
    words.extend(uuid_words(alien).iter().map(|w| w.wrapping_add(2)));
    words.extend([2u16; 4]); // grammar type, max token type, nstates...
    let err = AtnDeserializer::new().deserialize(&words).unwrap_err();
    assert!(matches!(err, TrellisError::UnsupportedUuid { uuid } if uuid == alien));
  }

  #[test]
  fn base_revision_predating_lexer_actions_is_rejected() {
    let mut words = vec![SERIALIZED_VERSION];
    words.extend(uuid_words(BASE_REVISION).iter().map(|w| w.wrapping_add(2)));
    let err = AtnDeserializer::new().deserialize(&words).unwrap_err();
    assert!(matches!(err, TrellisError::UnsupportedUuid { uuid } if uuid == BASE_REVISION));
  }

  #[test]
  fn uuid_words_round_trip() {
    for uuid in REVISIONS {
      let words = uuid_words(uuid);
      let mut cursor = WordCursor { data: words.to_vec(), pos: 0 };
      assert_eq!(read_uuid(&mut cursor).unwrap(), uuid);
    }
  }

  #[test]
  fn truncated_stream_is_corrupted_not_panicking() {
    let mut words = vec![SERIALIZED_VERSION];
    words.extend(uuid_words(UNICODE_SMP_REVISION).iter().map(|w| w.wrapping_add(2)));
    // grammar type only; everything after is missing.
    words.push(1 + 2);
    let err = AtnDeserializer::new().deserialize(&words).unwrap_err();
    assert!(matches!(err, TrellisError::CorruptedAtn(_)));
  }
}
