use std::sync::Arc;

use tracing::{debug, trace};

use crate::{
  atn::{Atn, AtnStateKind, GrammarType, Transition, INVALID_ALT_NUMBER},
  context::{MergeCache, PredictionContext, PredictionContextCache, SharedContext, EMPTY_RETURN_STATE},
  dfa::{Dfa, DfaState, DfaStateId, PredPrediction, ERROR_DFA_STATE},
  prediction::{
    all_subsets_conflict, all_subsets_equal, alts_of, conflicting_alt_subsets,
    has_sll_conflict_terminating_prediction, single_viable_alt, AtnConfig, AtnConfigSet,
    PredictionMode, SemanticContext, SharedSemanticContext,
  },
  recognizer::{DiagnosticListener, Recognizer, RuleContext},
  streams::TokenStream,
  types::{proxy::Map, proxy::Set, AltSet, Interval, TrellisError, TrellisResult, TOKEN_EOF},
};

/// Builds the per-decision DFA tables for an automaton. One such vector is
/// shared by every simulator over the same grammar.
pub fn decision_dfas(atn: &Atn) -> Vec<Dfa> {
  atn
    .decision_to_state
    .iter()
    .enumerate()
    .map(|(decision, &state)| {
      Dfa::new(
        decision,
        state,
        atn.state(state).is_precedence_decision(),
        TOKEN_EOF,
        atn.max_token_type,
      )
    })
    .collect()
}

/// The adaptive LL(*) prediction engine.
///
/// One instance serves one parser, but the DFA tables and the context
/// cache behind it are shared freely across instances; every mutation they
/// see goes through the freeze-before-publish discipline.
pub struct ParserAtnSimulator {
  atn:  Arc<Atn>,
  dfas: Arc<Vec<Dfa>>,
  context_cache: Arc<PredictionContextCache>,
  pub mode: PredictionMode,
}

impl ParserAtnSimulator {
  pub fn new(atn: Arc<Atn>, dfas: Arc<Vec<Dfa>>, context_cache: Arc<PredictionContextCache>) -> Self {
    debug_assert_eq!(atn.grammar_type, GrammarType::Parser);
    Self { atn, dfas, context_cache, mode: PredictionMode::Sll }
  }

  pub fn atn(&self) -> &Arc<Atn> {
    &self.atn
  }

  pub fn dfa(&self, decision: usize) -> &Dfa {
    &self.dfas[decision]
  }

  /// Drops every cached DFA state, forcing re-simulation.
  pub fn clear_dfa(&self) {
    for dfa in self.dfas.iter() {
      dfa.clear();
    }
  }

  /// Predicts which alternative of `decision` the upcoming input commits
  /// to. The input cursor is restored before returning, on every path.
  pub fn adaptive_predict(
    &self,
    input: &mut dyn TokenStream,
    decision: usize,
    outer_context: Option<&Arc<RuleContext>>,
    recognizer: &mut dyn Recognizer,
    listener: &mut dyn DiagnosticListener,
  ) -> TrellisResult<u32> {
    let marker = input.mark();
    let start_index = input.index();
    debug!(decision, start_index, "adaptive predict");

    let mut run = PredictionRun {
      sim: self,
      input,
      recognizer,
      listener,
      outer_context: outer_context.cloned(),
      start_index,
      decision,
      merge_cache: MergeCache::new(),
    };
    let result = run.predict();

    input.seek(start_index);
    input.release(marker);
    result
  }
}

/// State for one `adaptive_predict` call. The merge cache lives exactly as
/// long as this struct, which bounds how long merged context graphs are
/// retained.
struct PredictionRun<'s> {
  sim:        &'s ParserAtnSimulator,
  input:      &'s mut dyn TokenStream,
  recognizer: &'s mut dyn Recognizer,
  listener:   &'s mut dyn DiagnosticListener,
  outer_context: Option<Arc<RuleContext>>,
  start_index:   usize,
  decision:      usize,
  merge_cache:   MergeCache,
}

impl<'s> PredictionRun<'s> {
  fn atn(&self) -> &'s Atn {
    self.sim.atn.as_ref()
  }

  fn dfa(&self) -> &'s Dfa {
    &self.sim.dfas[self.decision]
  }

  fn predict(&mut self) -> TrellisResult<u32> {
    let dfa = self.dfa();
    let precedence = self.recognizer.current_precedence();

    let s0 = if dfa.is_precedence_dfa {
      dfa.precedence_start_state(precedence)
    } else {
      dfa.s0()
    };

    let s0 = match s0 {
      Some(s0) => s0,
      None => {
        // SLL start states ignore the caller's context entirely; the
        // context-free stage must be reusable at any call site.
        let s0_closure = self.compute_start_state(dfa.atn_start_state, None, false)?;
        if dfa.is_precedence_dfa {
          let filtered = self.apply_precedence_filter(&s0_closure)?;
          let s0 = self.add_dfa_state(filtered)?;
          dfa.set_precedence_start_state(precedence, s0);
          s0
        } else {
          let s0 = self.add_dfa_state(s0_closure)?;
          dfa.set_s0(s0);
          s0
        }
      }
    };

    self.exec_atn(s0)
  }

  // DETERMINISTIC SIMULATION ------------------------------------------

  fn exec_atn(&mut self, s0: DfaStateId) -> TrellisResult<u32> {
    let mut previous = s0;
    let mut t = self.input.la(1);

    loop {
      let target = match self.dfa().edge(previous, t) {
        Some(target) => target,
        None => self.compute_target_state(previous, t)?,
      };

      if target == ERROR_DFA_STATE {
        // Avoid reporting an error later at an arbitrary deeper position:
        // rewind, then prefer any alternative that made it through the
        // decision entry rule.
        let previous_configs = self.dfa().configs(previous);
        self.input.seek(self.start_index);
        let alt =
          self.syn_valid_or_sem_invalid_alt_that_finished_decision_entry_rule(&previous_configs)?;
        if alt != INVALID_ALT_NUMBER {
          return Ok(alt);
        }
        return Err(self.no_viable_alt(previous_configs));
      }

      let (requires_full_context, is_accept) =
        self.dfa().read(target, |s| (s.requires_full_context, s.is_accept));

      if requires_full_context && self.sim.mode != PredictionMode::Sll {
        let (mut conflicting_alts, predicates, target_configs) = self.dfa().read(target, |s| {
          (
            s.configs.conflicting_alts.clone().unwrap_or_default(),
            s.predicates.clone(),
            s.configs.clone(),
          )
        });

        if let Some(pairs) = predicates {
          let conflict_index = self.input.index();
          if conflict_index != self.start_index {
            self.input.seek(self.start_index);
          }
          conflicting_alts = self.eval_predicate_predictions(&pairs, true);
          if conflicting_alts.len() == 1 {
            return Ok(conflicting_alts.min().expect("nonempty"));
          }
          if conflict_index != self.start_index {
            self.input.seek(conflict_index);
          }
        }

        debug!(decision = self.decision, "SLL conflict; retrying with full context");
        let interval = Interval::new(self.start_index as i32, self.input.index() as i32);
        self.listener.report_attempting_full_context(
          self.decision,
          interval,
          &conflicting_alts,
          &target_configs,
        );

        let s0_closure =
          self.compute_start_state(self.dfa().atn_start_state, self.outer_context.clone(), true)?;
        return self.exec_atn_with_full_context(s0_closure);
      }

      if is_accept {
        let (predicates, prediction, configs) =
          self.dfa().read(target, |s| (s.predicates.clone(), s.prediction, s.configs.clone()));
        let Some(pairs) = predicates else {
          return Ok(prediction);
        };

        let stop_index = self.input.index();
        self.input.seek(self.start_index);
        let alts = self.eval_predicate_predictions(&pairs, true);
        match alts.len() {
          0 => return Err(self.no_viable_alt(configs)),
          1 => return Ok(alts.min().expect("nonempty")),
          _ => {
            // Predicated ambiguity: report and take the minimum, the same
            // resolution order the grammar author reads off the page.
            let interval = Interval::new(self.start_index as i32, stop_index as i32);
            self.listener.report_ambiguity(self.decision, interval, false, &alts, &configs);
            return Ok(alts.min().expect("nonempty"));
          }
        }
      }

      previous = target;
      if t != TOKEN_EOF {
        self.input.consume();
        t = self.input.la(1);
      }
    }
  }

  /// One new DFA state: reach plus closure over `t` from `previous`,
  /// interned into the table and wired in with an edge.
  fn compute_target_state(&mut self, previous: DfaStateId, t: i32) -> TrellisResult<DfaStateId> {
    let closure_configs = self.dfa().configs(previous);
    let Some(mut reach) = self.compute_reach_set(&closure_configs, t, false)? else {
      self.dfa().set_edge(previous, t, ERROR_DFA_STATE);
      return Ok(ERROR_DFA_STATE);
    };

    let predicted_alt = unique_alt(&reach);
    let mut is_accept = false;
    let mut requires_full_context = false;
    let mut prediction = INVALID_ALT_NUMBER;

    if predicted_alt != INVALID_ALT_NUMBER {
      is_accept = true;
      reach.unique_alt = predicted_alt;
      prediction = predicted_alt;
    } else if has_sll_conflict_terminating_prediction(self.sim.mode, &reach, |c| {
      self.atn().state(c.state).is_rule_stop()
    }) {
      let conflicting = alts_of(&conflicting_alt_subsets(&reach));
      prediction = conflicting.min().unwrap_or(INVALID_ALT_NUMBER);
      reach.conflicting_alts = Some(conflicting);
      requires_full_context = true;
      is_accept = true;
    }

    let mut predicates = None;
    if is_accept && reach.has_semantic_context {
      let decision_state = self.atn().decision_state(self.decision);
      let nalts = self.atn().state(decision_state).transitions.len();
      predicates = self.predicate_dfa_state(&reach, nalts);
      if predicates.is_some() {
        prediction = INVALID_ALT_NUMBER;
      }
    }

    let target = self.install_dfa_state(reach, is_accept, requires_full_context, prediction, predicates)?;
    self.dfa().set_edge(previous, t, target);
    Ok(target)
  }

  fn exec_atn_with_full_context(&mut self, s0: AtnConfigSet) -> TrellisResult<u32> {
    let mut previous = s0;
    self.input.seek(self.start_index);
    let mut t = self.input.la(1);
    let mut found_exact_ambig = false;

    let (predicted_alt, reach) = loop {
      let Some(mut reach) = self.compute_reach_set(&previous, t, true)? else {
        let previous = Arc::new(previous);
        self.input.seek(self.start_index);
        let alt = self.syn_valid_or_sem_invalid_alt_that_finished_decision_entry_rule(&previous)?;
        if alt != INVALID_ALT_NUMBER {
          return Ok(alt);
        }
        return Err(self.no_viable_alt(previous));
      };

      let alt_subsets = conflicting_alt_subsets(&reach);
      trace!(subsets = alt_subsets.len(), reach = %reach, "full-context step");
      reach.unique_alt = unique_alt(&reach);

      if reach.unique_alt != INVALID_ALT_NUMBER {
        break (reach.unique_alt, reach);
      }
      if self.sim.mode != PredictionMode::LlExactAmbigDetection {
        let alt = single_viable_alt(&alt_subsets);
        if alt != INVALID_ALT_NUMBER {
          break (alt, reach);
        }
      } else if all_subsets_conflict(&alt_subsets) && all_subsets_equal(&alt_subsets) {
        found_exact_ambig = true;
        break (single_viable_alt(&alt_subsets), reach);
      }

      previous = reach;
      if t != TOKEN_EOF {
        self.input.consume();
        t = self.input.la(1);
      }
    };

    let interval = Interval::new(self.start_index as i32, self.input.index() as i32);
    if reach.unique_alt != INVALID_ALT_NUMBER {
      // Full context settled what SLL could not: context sensitivity, not
      // ambiguity.
      self.listener.report_context_sensitivity(self.decision, interval, predicted_alt, &reach);
      return Ok(predicted_alt);
    }
    self.listener.report_ambiguity(self.decision, interval, found_exact_ambig, &reach.alts(), &reach);
    Ok(predicted_alt)
  }

  // REACH -------------------------------------------------------------

  fn compute_reach_set(
    &mut self,
    closure: &AtnConfigSet,
    t: i32,
    full_ctx: bool,
  ) -> TrellisResult<Option<AtnConfigSet>> {
    let mut intermediate = AtnConfigSet::new(full_ctx);
    let mut skipped_stop_states: Vec<AtnConfig> = Vec::new();

    for config in closure.iter() {
      if self.atn().state(config.state).is_rule_stop() {
        debug_assert!(config.context.is_empty());
        if full_ctx || t == TOKEN_EOF {
          skipped_stop_states.push(config.clone());
        }
        continue;
      }
      for transition in &self.atn().state(config.state).transitions {
        if transition.matches(t, 0, self.atn().max_token_type) {
          intermediate
            .add_with_cache(config.transform(transition.target()), Some(&mut self.merge_cache))?;
        }
      }
    }

    // A trivially terminal intermediate set needs no closure: one config,
    // or one viable alt, decides on its own.
    let trivial = skipped_stop_states.is_empty()
      && t != TOKEN_EOF
      && (intermediate.len() == 1 || unique_alt(&intermediate) != INVALID_ALT_NUMBER);

    let mut reach = if trivial {
      intermediate
    } else {
      let mut out = AtnConfigSet::new(full_ctx);
      let mut closure_busy = Set::default();
      let treat_eof_as_epsilon = t == TOKEN_EOF;
      for config in intermediate.iter() {
        self.closure(
          config.clone(),
          &mut out,
          &mut closure_busy,
          false,
          full_ctx,
          0,
          treat_eof_as_epsilon,
        )?;
      }
      out
    };

    if t == TOKEN_EOF {
      // At EOF only completed paths survive: configurations stopped in a
      // rule-stop state, or able to reach one on epsilon alone. The
      // epsilon chase is only needed when closure did not already run.
      reach = self.configs_reaching_rule_stop(&reach, trivial)?;
    }

    if !skipped_stop_states.is_empty()
      && (!full_ctx
        || !reach.iter().any(|c| self.atn().state(c.state).is_rule_stop()))
    {
      for config in skipped_stop_states {
        reach.add_with_cache(config, Some(&mut self.merge_cache))?;
      }
    }

    Ok((!reach.is_empty()).then_some(reach))
  }

  fn configs_reaching_rule_stop(
    &mut self,
    configs: &AtnConfigSet,
    look_to_end_of_rule: bool,
  ) -> TrellisResult<AtnConfigSet> {
    if configs.iter().all(|c| self.atn().state(c.state).is_rule_stop()) {
      return Ok(configs.clone());
    }
    let mut result = AtnConfigSet::new(configs.full_ctx);
    for config in configs.iter() {
      let state = self.atn().state(config.state);
      if state.is_rule_stop() {
        result.add_with_cache(config.clone(), Some(&mut self.merge_cache))?;
        continue;
      }
      if look_to_end_of_rule
        && state.epsilon_only_transitions
        && self.atn().next_tokens(config.state).contains(crate::types::TOKEN_EPSILON)
      {
        let stop = self.atn().rule_to_stop_state[state.rule_index];
        result.add_with_cache(config.transform(stop), Some(&mut self.merge_cache))?;
      }
    }
    Ok(result)
  }

  // START STATE -------------------------------------------------------

  fn compute_start_state(
    &mut self,
    p: usize,
    ctx: Option<Arc<RuleContext>>,
    full_ctx: bool,
  ) -> TrellisResult<AtnConfigSet> {
    let initial_context = PredictionContext::from_rule_context(self.atn(), ctx.as_ref());
    let mut configs = AtnConfigSet::new(full_ctx);

    let targets: Vec<usize> =
      self.atn().state(p).transitions.iter().map(Transition::target).collect();
    for (i, target) in targets.into_iter().enumerate() {
      let config = AtnConfig::new(target, i as u32 + 1, initial_context.clone());
      let mut closure_busy = Set::default();
      self.closure(config, &mut configs, &mut closure_busy, true, full_ctx, 0, false)?;
    }
    Ok(configs)
  }

  // CLOSURE -----------------------------------------------------------

  #[allow(clippy::too_many_arguments)]
  fn closure(
    &mut self,
    config: AtnConfig,
    configs: &mut AtnConfigSet,
    closure_busy: &mut Set<AtnConfig>,
    collect_predicates: bool,
    full_ctx: bool,
    depth: i32,
    treat_eof_as_epsilon: bool,
  ) -> TrellisResult<()> {
    self.closure_checking_stop_state(
      config,
      configs,
      closure_busy,
      collect_predicates,
      full_ctx,
      depth,
      treat_eof_as_epsilon,
    )?;
    if full_ctx && configs.dips_into_outer_context {
      return Err(TrellisError::IllegalState(
        "full-context closure escaped the outer context".into(),
      ));
    }
    Ok(())
  }

  #[allow(clippy::too_many_arguments)]
  fn closure_checking_stop_state(
    &mut self,
    config: AtnConfig,
    configs: &mut AtnConfigSet,
    closure_busy: &mut Set<AtnConfig>,
    collect_predicates: bool,
    full_ctx: bool,
    depth: i32,
    treat_eof_as_epsilon: bool,
  ) -> TrellisResult<()> {
    if self.atn().state(config.state).is_rule_stop() {
      if !config.context.is_empty() {
        for i in 0..config.context.size() {
          if config.context.return_state(i) == EMPTY_RETURN_STATE {
            if full_ctx {
              configs.add_with_cache(
                config.with_context(PredictionContext::empty()),
                Some(&mut self.merge_cache),
              )?;
            } else {
              // Stack exhausted under SLL: chase FOLLOW links as if the
              // rule could have been invoked from anywhere.
              self.closure_work(
                config.clone(),
                configs,
                closure_busy,
                collect_predicates,
                full_ctx,
                depth,
                treat_eof_as_epsilon,
              )?;
            }
            continue;
          }
          let return_state = config.context.return_state(i);
          let parent =
            config.context.parent(i).cloned().unwrap_or_else(PredictionContext::empty);
          let popped = config.transform_with_context(return_state, parent);
          self.closure_checking_stop_state(
            popped,
            configs,
            closure_busy,
            collect_predicates,
            full_ctx,
            depth - 1,
            treat_eof_as_epsilon,
          )?;
        }
        return Ok(());
      }
      if full_ctx {
        // Reached the end of the start rule with nothing left to pop.
        configs.add_with_cache(config, Some(&mut self.merge_cache))?;
        return Ok(());
      }
      // SLL with empty context falls through to FOLLOW-link closure.
    }

    self.closure_work(
      config,
      configs,
      closure_busy,
      collect_predicates,
      full_ctx,
      depth,
      treat_eof_as_epsilon,
    )
  }

  #[allow(clippy::too_many_arguments)]
  fn closure_work(
    &mut self,
    config: AtnConfig,
    configs: &mut AtnConfigSet,
    closure_busy: &mut Set<AtnConfig>,
    collect_predicates: bool,
    full_ctx: bool,
    depth: i32,
    treat_eof_as_epsilon: bool,
  ) -> TrellisResult<()> {
    let state = self.atn().state(config.state);

    if !state.epsilon_only_transitions {
      configs.add_with_cache(config.clone(), Some(&mut self.merge_cache))?;
    }

    let config_at_rule_stop = state.is_rule_stop();

    for (i, transition) in state.transitions.iter().enumerate() {
      if i == 0 && self.can_drop_loop_entry_edge_in_left_recursive_rule(&config) {
        continue;
      }

      let continue_collecting =
        collect_predicates && !matches!(transition, Transition::Action { .. });
      let Some(mut c) = self.epsilon_target(
        &config,
        transition,
        continue_collecting,
        depth == 0,
        full_ctx,
        treat_eof_as_epsilon,
      )?
      else {
        continue;
      };

      let mut new_depth = depth;
      if config_at_rule_stop {
        // Fell off the end of the decision entry rule: this configuration
        // now depends on the invocation context SLL pretends not to have.
        debug_assert!(!full_ctx);

        if self.dfa().is_precedence_dfa {
          if let Transition::Epsilon { outermost_precedence_return, .. } = transition {
            let entry_rule = self.atn().state(self.dfa().atn_start_state).rule_index;
            if *outermost_precedence_return == entry_rule as i32 {
              c.set_precedence_filter_suppressed(true);
            }
          }
        }

        c.increment_outer_context_depth();
        if !closure_busy.insert(c.clone()) {
          continue;
        }
        configs.dips_into_outer_context = true;
        new_depth -= 1;
      } else {
        if !transition.is_epsilon() && !closure_busy.insert(c.clone()) {
          continue;
        }
        if matches!(transition, Transition::Rule { .. }) {
          // Latch at negative depth: once closure has stepped out of the
          // entry context it never counts as back inside.
          if new_depth >= 0 {
            new_depth += 1;
          }
        }
      }

      self.closure_checking_stop_state(
        c,
        configs,
        closure_busy,
        collect_predicates,
        full_ctx,
        new_depth,
        treat_eof_as_epsilon,
      )?;
    }
    Ok(())
  }

  fn epsilon_target(
    &mut self,
    config: &AtnConfig,
    transition: &Transition,
    collect_predicates: bool,
    in_context: bool,
    full_ctx: bool,
    treat_eof_as_epsilon: bool,
  ) -> TrellisResult<Option<AtnConfig>> {
    Ok(match transition {
      Transition::Rule { rule_start, follow_state, .. } => {
        let new_context =
          PredictionContext::singleton(Some(config.context.clone()), *follow_state);
        Some(config.transform_with_context(*rule_start, new_context))
      }
      // Precedence predicates only matter while closure is still inside
      // the decision entry rule; continuations that already fell off the
      // rule pass through unguarded.
      Transition::PrecedencePredicate { target, precedence } => self.predicate_target(
        config,
        *target,
        SemanticContext::precedence(*precedence),
        collect_predicates && in_context,
        full_ctx,
      )?,
      Transition::Predicate { target, rule_index, pred_index, is_ctx_dependent } => {
        let gate = collect_predicates && (!is_ctx_dependent || in_context);
        if gate {
          self.predicate_target(
            config,
            *target,
            SemanticContext::predicate(*rule_index, *pred_index, *is_ctx_dependent),
            true,
            full_ctx,
          )?
        } else {
          Some(config.transform(*target))
        }
      }
      // Action transitions are invisible to prediction.
      Transition::Action { target, .. } => Some(config.transform(*target)),
      Transition::Epsilon { target, .. } => Some(config.transform(*target)),
      Transition::Atom { .. } | Transition::Range { .. } | Transition::Set { .. } => {
        if treat_eof_as_epsilon && transition.matches(TOKEN_EOF, 0, 1) {
          Some(config.transform(transition.target()))
        } else {
          None
        }
      }
      _ => None,
    })
  }

  fn predicate_target(
    &mut self,
    config: &AtnConfig,
    target: usize,
    predicate: SharedSemanticContext,
    collect_predicates: bool,
    full_ctx: bool,
  ) -> TrellisResult<Option<AtnConfig>> {
    if !collect_predicates {
      return Ok(Some(config.transform(target)));
    }
    if full_ctx {
      // In full-context mode the stack is real, so the predicate can be
      // evaluated on the spot; a false result prunes the configuration.
      let current = self.input.index();
      self.input.seek(self.start_index);
      let succeeds = predicate.eval(self.recognizer, self.outer_context.as_ref());
      self.input.seek(current);
      Ok(succeeds.then(|| config.transform(target)))
    } else {
      let combined = SemanticContext::and(&config.semantic_context, &predicate);
      Ok(Some(config.transform_with_semantic_context(target, combined)))
    }
  }

  /// The left-recursion loop-entry shortcut: when every stack top provably
  /// returns to this decision's rule through epsilon alone, alternative 1
  /// (re-entering the loop head) adds nothing the loop-back path does not,
  /// and skipping it keeps left-recursive DFAs linear.
  fn can_drop_loop_entry_edge_in_left_recursive_rule(&self, config: &AtnConfig) -> bool {
    let p = self.atn().state(config.state);
    if !p.is_precedence_decision() {
      return false;
    }
    if config.context.is_empty() || config.context.has_empty_path() {
      return false;
    }

    let num_ctxs = config.context.size();
    for i in 0..num_ctxs {
      let return_state = self.atn().state(config.context.return_state(i));
      if return_state.rule_index != p.rule_index {
        return false;
      }
    }

    let AtnStateKind::StarLoopEntry { .. } = p.kind else { return false };
    let decision_start = p.transitions[0].target();
    let Some(block_end) = self.atn().state(decision_start).block_end_state() else {
      return false;
    };

    for i in 0..num_ctxs {
      let return_state = self.atn().state(config.context.return_state(i));
      if return_state.transitions.len() != 1 || !return_state.transitions[0].is_epsilon() {
        return false;
      }
      let return_target = return_state.transitions[0].target();

      // (1) the block end feeding the loop entry directly
      if matches!(return_state.kind, AtnStateKind::BlockEnd { .. }) && return_target == p.number {
        continue;
      }
      // (2) the internal block's end state itself
      if return_state.number == block_end {
        continue;
      }
      // (3) one epsilon away from the internal block's end
      if return_target == block_end {
        continue;
      }
      // (4) two epsilon steps through the block end to the loop entry
      let target_state = self.atn().state(return_target);
      if matches!(target_state.kind, AtnStateKind::BlockEnd { .. })
        && target_state.transitions.len() == 1
        && target_state.transitions[0].is_epsilon()
        && target_state.transitions[0].target() == p.number
      {
        continue;
      }

      return false;
    }
    true
  }

  // PRECEDENCE FILTER --------------------------------------------------

  /// Keeps, for the precedence start state, only the configurations the
  /// current precedence admits: alt-1 configurations filter by their
  /// precedence predicates, higher alts drop when an equal-context alt-1
  /// configuration exists, unless explicitly suppressed.
  fn apply_precedence_filter(&mut self, configs: &AtnConfigSet) -> TrellisResult<AtnConfigSet> {
    let mut states_from_alt1: Map<usize, SharedContext> = Map::default();
    let mut result = AtnConfigSet::new(configs.full_ctx);

    for config in configs.iter() {
      if config.alt != 1 {
        continue;
      }
      let Some(updated) = SemanticContext::eval_precedence(
        &config.semantic_context,
        self.recognizer,
        self.outer_context.as_ref(),
      ) else {
        continue;
      };
      states_from_alt1.insert(config.state, config.context.clone());
      if !Arc::ptr_eq(&updated, &config.semantic_context) {
        let mut rewritten = config.clone();
        rewritten.semantic_context = updated;
        result.add_with_cache(rewritten, Some(&mut self.merge_cache))?;
      } else {
        result.add_with_cache(config.clone(), Some(&mut self.merge_cache))?;
      }
    }

    for config in configs.iter() {
      if config.alt == 1 {
        continue;
      }
      if !config.is_precedence_filter_suppressed() {
        if let Some(context) = states_from_alt1.get(&config.state) {
          if **context == *config.context {
            // Covered by the higher-precedence alternative.
            continue;
          }
        }
      }
      result.add_with_cache(config.clone(), Some(&mut self.merge_cache))?;
    }

    Ok(result)
  }

  // PREDICATES ---------------------------------------------------------

  fn predicate_dfa_state(&mut self, configs: &AtnConfigSet, nalts: usize) -> Option<Vec<PredPrediction>> {
    let alts_to_collect = if configs.unique_alt != INVALID_ALT_NUMBER {
      AltSet::of(configs.unique_alt)
    } else {
      configs.conflicting_alts.clone().unwrap_or_else(|| configs.alts())
    };

    let alt_to_pred = self.preds_for_ambig_alts(&alts_to_collect, configs, nalts)?;

    let mut pairs = Vec::new();
    let mut contains_predicate = false;
    for alt in 1..=nalts as u32 {
      let pred = alt_to_pred[alt as usize].clone();
      if alts_to_collect.contains(alt) {
        pairs.push(PredPrediction { pred: pred.clone(), alt });
      }
      if !pred.is_none() {
        contains_predicate = true;
      }
    }
    contains_predicate.then_some(pairs)
  }

  /// OR together the semantic contexts of the configurations predicting
  /// each ambiguous alternative; unpredicated slots become NONE. `None`
  /// when no predicated alternative remains.
  fn preds_for_ambig_alts(
    &self,
    ambig_alts: &AltSet,
    configs: &AtnConfigSet,
    nalts: usize,
  ) -> Option<Vec<SharedSemanticContext>> {
    let mut alt_to_pred: Vec<Option<SharedSemanticContext>> = vec![None; nalts + 1];
    for config in configs.iter() {
      if ambig_alts.contains(config.alt) {
        let slot = &mut alt_to_pred[config.alt as usize];
        *slot = Some(match slot.take() {
          Some(existing) => SemanticContext::or(&existing, &config.semantic_context),
          None => config.semantic_context.clone(),
        });
      }
    }

    let mut n_pred_alts = 0;
    let resolved: Vec<SharedSemanticContext> = alt_to_pred
      .into_iter()
      .map(|slot| match slot {
        Some(pred) => {
          if !pred.is_none() {
            n_pred_alts += 1;
          }
          pred
        }
        None => SemanticContext::none(),
      })
      .collect();

    (n_pred_alts > 0).then_some(resolved)
  }

  /// Evaluates predicate/alt pairs against the outer context. Unpredicated
  /// alternatives succeed unconditionally. With `complete` unset the first
  /// success wins.
  fn eval_predicate_predictions(&mut self, pairs: &[PredPrediction], complete: bool) -> AltSet {
    let mut predictions = AltSet::new();
    for pair in pairs {
      if pair.pred.is_none() {
        predictions.insert(pair.alt);
        if !complete {
          break;
        }
        continue;
      }
      if pair.pred.eval(self.recognizer, self.outer_context.as_ref()) {
        trace!(alt = pair.alt, "predicate passed");
        predictions.insert(pair.alt);
        if !complete {
          break;
        }
      }
    }
    predictions
  }

  // ERROR PATH ---------------------------------------------------------

  /// When reach dies, prefer a syntactically valid alternative that
  /// completed the decision entry rule, taking semantically valid
  /// configurations first and invalid ones as a last resort.
  fn syn_valid_or_sem_invalid_alt_that_finished_decision_entry_rule(
    &mut self,
    configs: &AtnConfigSet,
  ) -> TrellisResult<u32> {
    let (sem_valid, sem_invalid) = self.split_according_to_semantic_validity(configs)?;
    let alt = self.alt_that_finished_decision_entry_rule(&sem_valid);
    if alt != INVALID_ALT_NUMBER {
      return Ok(alt);
    }
    if !sem_invalid.is_empty() {
      let alt = self.alt_that_finished_decision_entry_rule(&sem_invalid);
      if alt != INVALID_ALT_NUMBER {
        return Ok(alt);
      }
    }
    Ok(INVALID_ALT_NUMBER)
  }

  fn alt_that_finished_decision_entry_rule(&self, configs: &AtnConfigSet) -> u32 {
    let mut alts = AltSet::new();
    for config in configs.iter() {
      if config.outer_context_depth() > 0
        || (self.atn().state(config.state).is_rule_stop() && config.context.has_empty_path())
      {
        alts.insert(config.alt);
      }
    }
    alts.min().unwrap_or(INVALID_ALT_NUMBER)
  }

  fn split_according_to_semantic_validity(
    &mut self,
    configs: &AtnConfigSet,
  ) -> TrellisResult<(AtnConfigSet, AtnConfigSet)> {
    let mut succeeded = AtnConfigSet::new(configs.full_ctx);
    let mut failed = AtnConfigSet::new(configs.full_ctx);
    for config in configs.iter() {
      if !config.semantic_context.is_none() {
        let passes = config.semantic_context.eval(self.recognizer, self.outer_context.as_ref());
        if passes {
          succeeded.add(config.clone())?;
        } else {
          failed.add(config.clone())?;
        }
      } else {
        succeeded.add(config.clone())?;
      }
    }
    Ok((succeeded, failed))
  }

  fn no_viable_alt(&self, configs: Arc<AtnConfigSet>) -> TrellisError {
    TrellisError::NoViableAlt {
      decision:    self.decision,
      configs,
      start_index: self.start_index,
      outer_context_state: self
        .outer_context
        .as_ref()
        .filter(|c| !c.is_empty())
        .map(|c| c.invoking_state as usize),
    }
  }

  // DFA BOOKKEEPING -----------------------------------------------------

  fn install_dfa_state(
    &mut self,
    mut configs: AtnConfigSet,
    is_accept: bool,
    requires_full_context: bool,
    prediction: u32,
    predicates: Option<Vec<PredPrediction>>,
  ) -> TrellisResult<DfaStateId> {
    // Canonicalize contexts through the shared cache and freeze before the
    // set becomes visible to other readers of the DFA.
    configs.optimize_contexts(&self.sim.context_cache);
    configs.set_readonly(true);
    let configs = Arc::new(configs);
    let id = self.dfa().add_state(configs.clone(), |id| {
      trace!(id, configs = %configs, "new DFA state");
      let mut state = DfaState::new(id, configs.clone());
      state.is_accept = is_accept;
      state.prediction = prediction;
      state.requires_full_context = requires_full_context;
      state.predicates = predicates;
      state
    });
    Ok(id)
  }

  fn add_dfa_state(&mut self, configs: AtnConfigSet) -> TrellisResult<DfaStateId> {
    self.install_dfa_state(configs, false, false, INVALID_ALT_NUMBER, None)
  }
}

/// The single alternative every configuration agrees on, or
/// [`INVALID_ALT_NUMBER`].
pub fn unique_alt(configs: &AtnConfigSet) -> u32 {
  let mut alt = INVALID_ALT_NUMBER;
  for config in configs.iter() {
    if alt == INVALID_ALT_NUMBER {
      alt = config.alt;
    } else if config.alt != alt {
      return INVALID_ALT_NUMBER;
    }
  }
  alt
}
