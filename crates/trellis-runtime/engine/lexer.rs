use std::sync::Arc;

use tracing::{debug, trace};

use crate::{
  atn::{Atn, GrammarType, Transition, INVALID_ALT_NUMBER},
  context::{PredictionContext, PredictionContextCache, EMPTY_RETURN_STATE},
  dfa::{Dfa, DfaState, DfaStateId, LexerAcceptInfo, ERROR_DFA_STATE},
  lexer::LexerActionExecutor,
  prediction::AtnConfig,
  prediction::AtnConfigSet,
  recognizer::LexerHost,
  streams::CharStream,
  types::{TrellisError, TrellisResult, TOKEN_EOF},
};

/// Largest code point whose DFA edges are cached. Input beyond it always
/// falls back to ATN simulation, which keeps edge tables small without
/// changing results.
pub const MAX_DFA_EDGE: i32 = 127;

/// Builds the per-mode DFA tables for a lexer automaton.
pub fn mode_dfas(atn: &Atn) -> Vec<Dfa> {
  atn
    .mode_to_start_state
    .iter()
    .enumerate()
    .map(|(mode, &state)| Dfa::new(mode, state, false, 0, MAX_DFA_EDGE))
    .collect()
}

/// Snapshot of the most recent accept state seen while scanning.
#[derive(Clone, Copy, Debug)]
struct SimState {
  index:  usize,
  line:   u32,
  column: u32,
  dfa_state: DfaStateId,
}

/// The character-level prediction engine: one instance per lexer, with
/// per-mode DFAs shared across instances.
pub struct LexerAtnSimulator {
  atn:  Arc<Atn>,
  dfas: Arc<Vec<Dfa>>,
  context_cache: Arc<PredictionContextCache>,

  pub line:   u32,
  pub column: u32,

  mode: usize,
  start_index: usize,
  prev_accept: Option<SimState>,
}

impl LexerAtnSimulator {
  pub fn new(atn: Arc<Atn>, dfas: Arc<Vec<Dfa>>, context_cache: Arc<PredictionContextCache>) -> Self {
    debug_assert_eq!(atn.grammar_type, GrammarType::Lexer);
    Self {
      atn,
      dfas,
      context_cache,
      line: 1,
      column: 0,
      mode: 0,
      start_index: 0,
      prev_accept: None,
    }
  }

  pub fn atn(&self) -> &Arc<Atn> {
    &self.atn
  }

  pub fn dfa(&self, mode: usize) -> &Dfa {
    &self.dfas[mode]
  }

  pub fn clear_dfa(&self) {
    for dfa in self.dfas.iter() {
      dfa.clear();
    }
  }

  /// Matches one token in `mode` starting at the current stream position
  /// and returns its token type. On success the stream rests one past the
  /// final matched character, with line and column advanced accordingly.
  pub fn match_token(
    &mut self,
    input: &mut dyn CharStream,
    mode: usize,
    host: &mut dyn LexerHost,
  ) -> TrellisResult<i32> {
    self.mode = mode;
    let marker = input.mark();
    self.start_index = input.index();
    self.prev_accept = None;

    let result = match self.dfas[mode].s0() {
      Some(s0) => self.exec_atn(input, s0, host),
      None => self.match_atn(input, host),
    };

    input.release(marker);
    result
  }

  fn match_atn(&mut self, input: &mut dyn CharStream, host: &mut dyn LexerHost) -> TrellisResult<i32> {
    let start_state = self.atn.mode_to_start_state[self.mode];
    debug!(mode = self.mode, start_state, "computing lexer start state");

    let mut s0_closure = self.compute_start_state(input, start_state, host)?;
    let suppress_edge = s0_closure.has_semantic_context;
    s0_closure.has_semantic_context = false;

    let next = self.add_dfa_state(s0_closure)?;
    if !suppress_edge {
      self.dfas[self.mode].set_s0(next);
    }
    self.exec_atn(input, next, host)
  }

  fn exec_atn(
    &mut self,
    input: &mut dyn CharStream,
    s0: DfaStateId,
    host: &mut dyn LexerHost,
  ) -> TrellisResult<i32> {
    let dfas = self.dfas.clone();
    let dfa = &dfas[self.mode];
    if dfa.read(s0, |s| s.is_accept) {
      self.capture_sim_state(input, s0);
    }

    let mut s = s0;
    let mut t = input.la(1);

    loop {
      let target = match dfa.edge(s, t) {
        Some(target) => target,
        None => self.compute_target_state(input, s, t, host)?,
      };
      if target == ERROR_DFA_STATE {
        break;
      }

      // Consume before capturing so the captured index, line and column
      // describe the end of the token as matched so far.
      if t != TOKEN_EOF {
        self.consume(input);
      }
      if self.dfas[self.mode].read(target, |st| st.is_accept) {
        self.capture_sim_state(input, target);
        if t == TOKEN_EOF {
          break;
        }
      }

      t = input.la(1);
      s = target;
    }

    let reach = self.dfas[self.mode].configs(s);
    self.fail_or_accept(input, reach, t, host)
  }

  fn compute_target_state(
    &mut self,
    input: &mut dyn CharStream,
    s: DfaStateId,
    t: i32,
    host: &mut dyn LexerHost,
  ) -> TrellisResult<DfaStateId> {
    let closure_configs = self.dfas[self.mode].configs(s);
    let mut reach = AtnConfigSet::new_ordered();
    self.reachable_config_set(input, &closure_configs, &mut reach, t, host)?;

    if reach.is_empty() {
      // Predicated dead ends stay uncached: the predicate may answer
      // differently next time.
      if !reach.has_semantic_context {
        self.dfas[self.mode].set_edge(s, t, ERROR_DFA_STATE);
      }
      return Ok(ERROR_DFA_STATE);
    }

    let suppress_edge = reach.has_semantic_context;
    reach.has_semantic_context = false;
    let target = self.add_dfa_state(reach)?;
    if !suppress_edge {
      self.dfas[self.mode].set_edge(s, t, target);
    }
    Ok(target)
  }

  /// Reach over one symbol, with greedy bookkeeping: once an alternative
  /// accepts, its remaining configurations that passed through a
  /// non-greedy decision are suppressed.
  fn reachable_config_set(
    &mut self,
    input: &mut dyn CharStream,
    closure: &AtnConfigSet,
    reach: &mut AtnConfigSet,
    t: i32,
    host: &mut dyn LexerHost,
  ) -> TrellisResult<()> {
    let atn = self.atn.clone();
    let mut skip_alt = INVALID_ALT_NUMBER;
    for config in closure.iter() {
      let current_alt_reached_accept = config.alt == skip_alt;
      if current_alt_reached_accept && config.passed_through_non_greedy {
        continue;
      }

      for transition in &atn.state(config.state).transitions {
        if !transition.matches(t, 0, char::MAX as i32) {
          continue;
        }
        let executor = config.lexer_executor.as_ref().map(|e| {
          LexerActionExecutor::fix_offset_before_match(e, input.index() - self.start_index)
        });

        let mut c = config.lexer_transform(atn.state(transition.target()));
        c.lexer_executor = executor;

        let accepted = self.closure(
          input,
          c,
          reach,
          current_alt_reached_accept,
          true,
          t == TOKEN_EOF,
          host,
        )?;
        if accepted {
          // Remaining configurations of this alternative are lower
          // priority than the accept just found.
          skip_alt = config.alt;
          break;
        }
      }
    }
    Ok(())
  }

  fn compute_start_state(
    &mut self,
    input: &mut dyn CharStream,
    start_state: usize,
    host: &mut dyn LexerHost,
  ) -> TrellisResult<AtnConfigSet> {
    let initial_context = PredictionContext::empty();
    let mut configs = AtnConfigSet::new_ordered();

    let targets: Vec<usize> =
      self.atn.state(start_state).transitions.iter().map(Transition::target).collect();
    for (i, target) in targets.into_iter().enumerate() {
      let config = AtnConfig::new(target, i as u32 + 1, initial_context.clone());
      self.closure(input, config, &mut configs, false, false, false, host)?;
    }
    Ok(configs)
  }

  /// Epsilon closure returning whether the configuration's alternative
  /// reached an accept state, which tells the caller to suppress its
  /// lower-priority siblings.
  #[allow(clippy::too_many_arguments)]
  fn closure(
    &mut self,
    input: &mut dyn CharStream,
    config: AtnConfig,
    configs: &mut AtnConfigSet,
    mut current_alt_reached_accept: bool,
    speculative: bool,
    treat_eof_as_epsilon: bool,
    host: &mut dyn LexerHost,
  ) -> TrellisResult<bool> {
    let atn = self.atn.clone();
    let state = atn.state(config.state);

    if state.is_rule_stop() {
      if config.context.has_empty_path() {
        if config.context.is_empty() {
          configs.add(config)?;
          return Ok(true);
        }
        configs.add(config.with_context(PredictionContext::empty()))?;
        current_alt_reached_accept = true;
      }
      if !config.context.is_empty() {
        for i in 0..config.context.size() {
          if config.context.return_state(i) == EMPTY_RETURN_STATE {
            continue;
          }
          let parent =
            config.context.parent(i).cloned().unwrap_or_else(PredictionContext::empty);
          let popped = config.transform_with_context(config.context.return_state(i), parent);
          current_alt_reached_accept = self.closure(
            input,
            popped,
            configs,
            current_alt_reached_accept,
            speculative,
            treat_eof_as_epsilon,
            host,
          )?;
        }
      }
      return Ok(current_alt_reached_accept);
    }

    if !state.epsilon_only_transitions {
      if !current_alt_reached_accept || !config.passed_through_non_greedy {
        configs.add(config.clone())?;
      }
    }

    for transition in &state.transitions {
      let Some(c) =
        self.epsilon_target(input, &config, transition, configs, speculative, treat_eof_as_epsilon, host)?
      else {
        continue;
      };
      current_alt_reached_accept = self.closure(
        input,
        c,
        configs,
        current_alt_reached_accept,
        speculative,
        treat_eof_as_epsilon,
        host,
      )?;
    }
    Ok(current_alt_reached_accept)
  }

  #[allow(clippy::too_many_arguments)]
  fn epsilon_target(
    &mut self,
    input: &mut dyn CharStream,
    config: &AtnConfig,
    transition: &Transition,
    configs: &mut AtnConfigSet,
    speculative: bool,
    treat_eof_as_epsilon: bool,
    host: &mut dyn LexerHost,
  ) -> TrellisResult<Option<AtnConfig>> {
    let atn = self.atn.clone();
    Ok(match transition {
      Transition::Rule { rule_start, follow_state, .. } => {
        let new_context =
          PredictionContext::singleton(Some(config.context.clone()), *follow_state);
        let mut c = config.lexer_transform(atn.state(*rule_start));
        c.context = new_context;
        Some(c)
      }
      Transition::PrecedencePredicate { .. } => {
        return Err(TrellisError::UnsupportedOperation(
          "precedence predicates are not supported in lexers",
        ))
      }
      Transition::Predicate { target, rule_index, pred_index, .. } => {
        // Track that this path is gated so the DFA edge is suppressed;
        // predicates are evaluated on the fly, never cached.
        configs.has_semantic_context = true;
        if self.evaluate_predicate(input, *rule_index, *pred_index, speculative, host) {
          Some(config.lexer_transform(atn.state(*target)))
        } else {
          None
        }
      }
      Transition::Action { target, action_index, .. } => {
        if config.context.has_empty_path() {
          // Top-level actions accumulate; actions inside referenced rules
          // are ignored.
          let executor = LexerActionExecutor::append(
            config.lexer_executor.as_ref(),
            self.atn.lexer_actions[*action_index].clone(),
          );
          Some(config.lexer_transform_with_executor(atn.state(*target), executor))
        } else {
          Some(config.lexer_transform(atn.state(*target)))
        }
      }
      Transition::Epsilon { target, .. } => Some(config.lexer_transform(atn.state(*target))),
      Transition::Atom { .. } | Transition::Range { .. } | Transition::Set { .. } => {
        if treat_eof_as_epsilon && transition.matches(TOKEN_EOF, 0, 1) {
          Some(config.lexer_transform(atn.state(transition.target())))
        } else {
          None
        }
      }
      _ => None,
    })
  }

  fn evaluate_predicate(
    &mut self,
    input: &mut dyn CharStream,
    rule_index: usize,
    pred_index: usize,
    speculative: bool,
    host: &mut dyn LexerHost,
  ) -> bool {
    if !speculative {
      return host.sempred(None, rule_index, pred_index);
    }

    let saved_column = self.column;
    let saved_line = self.line;
    let index = input.index();
    let marker = input.mark();

    self.consume(input);
    let result = host.sempred(None, rule_index, pred_index);

    self.column = saved_column;
    self.line = saved_line;
    input.seek(index);
    input.release(marker);
    result
  }

  fn fail_or_accept(
    &mut self,
    input: &mut dyn CharStream,
    reach: Arc<AtnConfigSet>,
    t: i32,
    host: &mut dyn LexerHost,
  ) -> TrellisResult<i32> {
    if let Some(accept) = self.prev_accept {
      let info = self.dfas[self.mode].read(accept.dfa_state, |s| s.lexer_accept.clone());
      self.accept(input, accept, info.as_ref(), host);
      let token_type = info.map(|i| i.token_type).unwrap_or(TOKEN_EOF);
      trace!(token_type, index = input.index(), "lexer accept");
      return Ok(token_type);
    }

    if t == TOKEN_EOF && input.index() == self.start_index {
      return Ok(TOKEN_EOF);
    }
    Err(TrellisError::LexerNoViableAlt {
      start_index: self.start_index,
      mode:        self.mode,
      configs:     reach,
    })
  }

  fn accept(
    &mut self,
    input: &mut dyn CharStream,
    sim: SimState,
    info: Option<&LexerAcceptInfo>,
    host: &mut dyn LexerHost,
  ) {
    input.seek(sim.index);
    self.line = sim.line;
    self.column = sim.column;

    if let Some(LexerAcceptInfo { executor: Some(executor), .. }) = info {
      executor.execute(host, input, self.start_index);
    }
  }

  fn capture_sim_state(&mut self, input: &mut dyn CharStream, dfa_state: DfaStateId) {
    self.prev_accept = Some(SimState {
      index:  input.index(),
      line:   self.line,
      column: self.column,
      dfa_state,
    });
  }

  /// Advances one character, maintaining the line/column pair: a newline
  /// bumps the line and resets the column.
  pub fn consume(&mut self, input: &mut dyn CharStream) {
    let current = input.la(1);
    if current == '\n' as i32 {
      self.line += 1;
      self.column = 0;
    } else {
      self.column += 1;
    }
    input.consume();
  }

  fn add_dfa_state(&mut self, mut configs: AtnConfigSet) -> TrellisResult<DfaStateId> {
    debug_assert!(!configs.has_semantic_context);

    let accept = configs.iter().find(|c| self.atn.state(c.state).is_rule_stop()).map(|c| {
      LexerAcceptInfo {
        rule_index: self.atn.state(c.state).rule_index,
        token_type: self.atn.rule_to_token_type[self.atn.state(c.state).rule_index],
        executor:   c.lexer_executor.clone(),
      }
    });

    configs.optimize_contexts(&self.context_cache);
    configs.set_readonly(true);
    let configs = Arc::new(configs);
    let id = self.dfas[self.mode].add_state(configs.clone(), |id| {
      trace!(id, mode = self.mode, "new lexer DFA state");
      let mut state = DfaState::new(id, configs.clone());
      if let Some(accept) = accept {
        state.is_accept = true;
        state.prediction = accept.token_type.max(0) as u32;
        state.lexer_accept = Some(accept);
      }
      state
    });
    Ok(id)
  }
}
