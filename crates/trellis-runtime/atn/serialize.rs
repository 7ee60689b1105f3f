use super::deserialize::{
  uuid_words, ACTION_CHANNEL, ACTION_CUSTOM, ACTION_MODE, ACTION_MORE, ACTION_POP_MODE,
  ACTION_PUSH_MODE, ACTION_SKIP, ACTION_TYPE, EDGE_ACTION, EDGE_ATOM, EDGE_EPSILON, EDGE_NOT_SET,
  EDGE_PRECEDENCE, EDGE_PREDICATE, EDGE_RANGE, EDGE_RULE, EDGE_SET, EDGE_WILDCARD,
  INVALID_RULE_INDEX, SERIALIZED_VERSION, UNICODE_SMP_REVISION,
};
use crate::{
  atn::{Atn, AtnStateKind, GrammarType, Transition},
  lexer::LexerAction,
  types::{IntervalSet, TrellisError, TrellisResult, TOKEN_EOF},
};

/// Emits the word stream for a verified automaton in the current feature
/// revision. `deserialize(serialize(atn))` reproduces the automaton
/// structurally; nothing older than the current revision is ever written.
pub struct AtnSerializer<'a> {
  atn:  &'a Atn,
  data: Vec<u16>,
}

impl<'a> AtnSerializer<'a> {
  pub fn serialize(atn: &'a Atn) -> TrellisResult<Vec<u16>> {
    let mut serializer = Self { atn, data: vec![SERIALIZED_VERSION] };
    serializer.write_all()?;
    // The +2 encoding offset applies to every word except the version.
    for word in serializer.data[1..].iter_mut() {
      *word = word.wrapping_add(2);
    }
    Ok(serializer.data)
  }

  fn push(&mut self, value: usize) -> TrellisResult<()> {
    if value >= 0xFFFF {
      return Err(TrellisError::IllegalState(format!(
        "value {value} does not fit the 16-bit serialized form"
      )));
    }
    self.data.push(value as u16);
    Ok(())
  }

  fn push_signed(&mut self, value: i32) -> TrellisResult<()> {
    if value == -1 {
      self.data.push(0xFFFF);
      Ok(())
    } else {
      self.push(value as usize)
    }
  }

  fn write_all(&mut self) -> TrellisResult<()> {
    for word in uuid_words(UNICODE_SMP_REVISION) {
      self.data.push(word);
    }
    self.push(match self.atn.grammar_type {
      GrammarType::Lexer => 0,
      GrammarType::Parser => 1,
    })?;
    self.push_signed(self.atn.max_token_type)?;

    self.write_states()?;
    self.write_rules()?;
    self.write_modes()?;
    let set_indices = self.write_sets()?;
    self.write_edges(&set_indices)?;
    self.write_decisions()?;
    if self.atn.grammar_type == GrammarType::Lexer {
      self.write_lexer_actions()?;
    }
    Ok(())
  }

  fn write_states(&mut self) -> TrellisResult<()> {
    let mut non_greedy = Vec::new();
    let mut left_recursive = Vec::new();

    self.push(self.atn.states.len())?;
    for state in &self.atn.states {
      if state.decision_data().map(|d| d.non_greedy) == Some(true) {
        non_greedy.push(state.number);
      }

      let (stype, extra) = match &state.kind {
        AtnStateKind::Basic => (1, None),
        AtnStateKind::RuleStart { is_left_recursive, .. } => {
          if *is_left_recursive {
            left_recursive.push(state.number);
          }
          (2, None)
        }
        AtnStateKind::BlockStart { end_state, .. } => (3, Some(*end_state)),
        AtnStateKind::PlusBlockStart { end_state, .. } => (4, Some(*end_state)),
        AtnStateKind::StarBlockStart { end_state, .. } => (5, Some(*end_state)),
        AtnStateKind::TokensStart { .. } => (6, None),
        AtnStateKind::RuleStop => (7, None),
        AtnStateKind::BlockEnd { .. } => (8, None),
        AtnStateKind::StarLoopback => (9, None),
        AtnStateKind::StarLoopEntry { .. } => (10, None),
        AtnStateKind::PlusLoopback { .. } => (11, None),
        AtnStateKind::LoopEnd { loop_back } => (12, Some(*loop_back)),
      };

      self.push(stype)?;
      if state.rule_index == INVALID_RULE_INDEX {
        self.data.push(0xFFFF);
      } else {
        self.push(state.rule_index)?;
      }
      if let Some(extra) = extra {
        self.push(extra)?;
      }
    }

    self.push(non_greedy.len())?;
    for number in non_greedy {
      self.push(number)?;
    }
    self.push(left_recursive.len())?;
    for number in left_recursive {
      self.push(number)?;
    }
    Ok(())
  }

  fn write_rules(&mut self) -> TrellisResult<()> {
    self.push(self.atn.rule_to_start_state.len())?;
    for rule in 0..self.atn.rule_to_start_state.len() {
      self.push(self.atn.rule_to_start_state[rule])?;
      if self.atn.grammar_type == GrammarType::Lexer {
        self.push_signed(self.atn.rule_to_token_type[rule])?;
      }
    }
    Ok(())
  }

  fn write_modes(&mut self) -> TrellisResult<()> {
    self.push(self.atn.mode_to_start_state.len())?;
    for &number in &self.atn.mode_to_start_state {
      self.push(number)?;
    }
    Ok(())
  }

  /// Collects the distinct transition label sets, writes the BMP-encoded
  /// table then the supplementary-plane table, and returns each set's
  /// table index keyed by encounter order.
  fn write_sets(&mut self) -> TrellisResult<Vec<(IntervalSet, usize)>> {
    let mut distinct: Vec<IntervalSet> = Vec::new();
    for state in &self.atn.states {
      for transition in &state.transitions {
        if let Transition::Set { set, .. } | Transition::NotSet { set, .. } = transition {
          if !distinct.contains(set) {
            distinct.push(set.clone());
          }
        }
      }
    }

    // 0xFFFF is reserved as the -1 escape in narrow slots, so U+FFFF and
    // up ride in the wide table.
    let needs_wide =
      |set: &IntervalSet| set.max_element().map(|max| max >= 0xFFFF).unwrap_or(false);
    let (wide, narrow): (Vec<_>, Vec<_>) = distinct.into_iter().partition(needs_wide);

    let mut indices = Vec::new();
    for (i, set) in narrow.iter().chain(wide.iter()).enumerate() {
      indices.push((set.clone(), i));
    }

    self.push(narrow.len())?;
    for set in &narrow {
      self.write_set(set, false)?;
    }
    self.push(wide.len())?;
    for set in &wide {
      self.write_set(set, true)?;
    }
    Ok(indices)
  }

  fn write_set(&mut self, set: &IntervalSet, wide: bool) -> TrellisResult<()> {
    let contains_eof = set.contains(TOKEN_EOF);
    let intervals = set.intervals();
    // An interval that is exactly the EOF marker is fully carried by the
    // flag word; one that merely starts at EOF restarts from zero.
    let flag_only = contains_eof && intervals.first().map(|iv| iv.b == TOKEN_EOF).unwrap_or(false);
    self.push(intervals.len() - flag_only as usize)?;
    self.push(contains_eof as usize)?;

    for iv in intervals {
      let (a, b) = if iv.a == TOKEN_EOF {
        if iv.b == TOKEN_EOF {
          continue;
        }
        (0, iv.b)
      } else {
        (iv.a, iv.b)
      };
      if wide {
        self.push_code_point_wide(a)?;
        self.push_code_point_wide(b)?;
      } else {
        self.push(a as usize)?;
        self.push(b as usize)?;
      }
    }
    Ok(())
  }

  fn push_code_point_wide(&mut self, value: i32) -> TrellisResult<()> {
    let value = value as u32;
    self.data.push(value as u16);
    self.data.push((value >> 16) as u16);
    Ok(())
  }

  fn write_edges(&mut self, set_indices: &[(IntervalSet, usize)]) -> TrellisResult<()> {
    let set_index = |set: &IntervalSet| -> TrellisResult<usize> {
      set_indices
        .iter()
        .find(|(s, _)| s == set)
        .map(|(_, i)| *i)
        .ok_or_else(|| TrellisError::IllegalState("transition set missing from table".into()))
    };

    // Rule-stop return edges are derived during deserialization and must
    // not be written, so rule-stop states are skipped wholesale.
    let atn = self.atn;
    let serialized_states = move || atn.states.iter().filter(|s| !s.is_rule_stop());

    let nedges: usize = serialized_states().map(|s| s.transitions.len()).sum();
    self.push(nedges)?;

    let mut words: Vec<(usize, usize, u16, usize, usize, usize)> = Vec::with_capacity(nedges);
    for state in serialized_states() {
      for transition in &state.transitions {
        let edge = match transition {
          Transition::Epsilon { target, .. } => (state.number, *target, EDGE_EPSILON, 0, 0, 0),
          Transition::Range { target, from, to } => {
            if *from == TOKEN_EOF {
              (state.number, *target, EDGE_RANGE, 0, *to as usize, 1)
            } else {
              (state.number, *target, EDGE_RANGE, *from as usize, *to as usize, 0)
            }
          }
          Transition::Rule { rule_start, rule_index, precedence, follow_state } => {
            (state.number, *follow_state, EDGE_RULE, *rule_start, *rule_index, *precedence as usize)
          }
          Transition::Predicate { target, rule_index, pred_index, is_ctx_dependent } => {
            (state.number, *target, EDGE_PREDICATE, *rule_index, *pred_index, *is_ctx_dependent as usize)
          }
          Transition::Atom { target, label } => {
            if *label == TOKEN_EOF {
              (state.number, *target, EDGE_ATOM, 0, 0, 1)
            } else {
              (state.number, *target, EDGE_ATOM, *label as usize, 0, 0)
            }
          }
          Transition::Action { target, rule_index, action_index, is_ctx_dependent } => {
            (state.number, *target, EDGE_ACTION, *rule_index, *action_index, *is_ctx_dependent as usize)
          }
          Transition::Set { target, set } => (state.number, *target, EDGE_SET, set_index(set)?, 0, 0),
          Transition::NotSet { target, set } => {
            (state.number, *target, EDGE_NOT_SET, set_index(set)?, 0, 0)
          }
          Transition::Wildcard { target } => (state.number, *target, EDGE_WILDCARD, 0, 0, 0),
          Transition::PrecedencePredicate { target, precedence } => {
            (state.number, *target, EDGE_PRECEDENCE, *precedence as usize, 0, 0)
          }
        };
        words.push(edge);
      }
    }

    for (src, trg, ttype, arg1, arg2, arg3) in words {
      self.push(src)?;
      self.push(trg)?;
      self.push(ttype as usize)?;
      self.push(arg1)?;
      self.push(arg2)?;
      self.push(arg3)?;
    }
    Ok(())
  }

  fn write_decisions(&mut self) -> TrellisResult<()> {
    self.push(self.atn.decision_to_state.len())?;
    for &number in &self.atn.decision_to_state {
      self.push(number)?;
    }
    Ok(())
  }

  fn write_lexer_actions(&mut self) -> TrellisResult<()> {
    let atn = self.atn;
    self.push(atn.lexer_actions.len())?;
    for action in &atn.lexer_actions {
      let (ttype, data1, data2) = match *action {
        LexerAction::Channel { channel } => (ACTION_CHANNEL, channel, 0),
        LexerAction::Custom { rule_index, action_index } => {
          (ACTION_CUSTOM, rule_index as i32, action_index as i32)
        }
        LexerAction::Mode { mode } => (ACTION_MODE, mode as i32, 0),
        LexerAction::More => (ACTION_MORE, 0, 0),
        LexerAction::PopMode => (ACTION_POP_MODE, 0, 0),
        LexerAction::PushMode { mode } => (ACTION_PUSH_MODE, mode as i32, 0),
        LexerAction::Skip => (ACTION_SKIP, 0, 0),
        LexerAction::Type { token_type } => (ACTION_TYPE, token_type, 0),
        LexerAction::Indexed { .. } => {
          return Err(TrellisError::IllegalState(
            "indexed lexer actions exist only at runtime".into(),
          ))
        }
      };
      self.push(ttype as usize)?;
      self.push_signed(data1)?;
      self.push_signed(data2)?;
    }
    Ok(())
  }
}
