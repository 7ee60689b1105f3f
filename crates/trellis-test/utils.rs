//! Shared fixtures: a programmatic ATN producer plus recognizer, lexer
//! host and listener doubles. Built automata always round through the
//! serializer and deserializer, so every test also exercises the wire
//! format, link-up and verification passes.

use std::sync::Arc;

use trellis_runtime::{
  atn::{
    Atn, AtnDeserializer, AtnSerializer, AtnState, AtnStateKind, DecisionData, GrammarType,
    Transition, INVALID_RULE_INDEX, INVALID_STATE_NUMBER,
  },
  context::PredictionContextCache,
  engine::{decision_dfas, mode_dfas, LexerAtnSimulator, ParserAtnSimulator},
  lexer::LexerAction,
  prediction::AtnConfigSet,
  recognizer::{DiagnosticListener, LexerHost, Recognizer, RuleContext},
  types::{AltSet, Interval, IntervalSet},
};

/// Builds automata the way the grammar tool would emit them: states,
/// edges and tables only. Stop-state derivation, return edges, back-link
/// resolution and precedence marking all happen in the deserializer that
/// `build` routes the result through.
pub struct AtnBuilder {
  atn: Atn,
}

impl AtnBuilder {
  pub fn parser(max_token_type: i32) -> Self {
    Self { atn: Atn::new(GrammarType::Parser, max_token_type) }
  }

  pub fn lexer(max_token_type: i32) -> Self {
    Self { atn: Atn::new(GrammarType::Lexer, max_token_type) }
  }

  pub fn state(&mut self, rule: usize, kind: AtnStateKind) -> usize {
    let number = self.atn.states.len();
    self.atn.states.push(AtnState::new(number, rule, kind));
    number
  }

  pub fn basic(&mut self, rule: usize) -> usize {
    self.state(rule, AtnStateKind::Basic)
  }

  pub fn rule_start(&mut self, rule: usize) -> usize {
    let start = self.state(
      rule,
      AtnStateKind::RuleStart { stop_state: INVALID_STATE_NUMBER, is_left_recursive: false },
    );
    debug_assert_eq!(self.atn.rule_to_start_state.len(), rule);
    self.atn.rule_to_start_state.push(start);
    start
  }

  pub fn left_recursive_rule_start(&mut self, rule: usize) -> usize {
    let start = self.rule_start(rule);
    self.atn.states[start].kind =
      AtnStateKind::RuleStart { stop_state: INVALID_STATE_NUMBER, is_left_recursive: true };
    start
  }

  pub fn rule_stop(&mut self, rule: usize) -> usize {
    self.state(rule, AtnStateKind::RuleStop)
  }

  pub fn block_start(&mut self, rule: usize, end_state: usize) -> usize {
    self.state(rule, AtnStateKind::BlockStart { end_state, decision: DecisionData::unassigned() })
  }

  pub fn block_end(&mut self, rule: usize) -> usize {
    self.state(rule, AtnStateKind::BlockEnd { start_state: INVALID_STATE_NUMBER })
  }

  pub fn token_type(&mut self, rule: usize, token_type: i32) {
    debug_assert_eq!(self.atn.rule_to_token_type.len(), rule);
    self.atn.rule_to_token_type.push(token_type);
  }

  pub fn decision(&mut self, state: usize) -> usize {
    self.atn.decision_to_state.push(state);
    self.atn.decision_to_state.len() - 1
  }

  pub fn mode(&mut self, tokens_start: usize) -> usize {
    self.atn.mode_to_start_state.push(tokens_start);
    self.atn.mode_to_start_state.len() - 1
  }

  pub fn lexer_action(&mut self, action: LexerAction) -> usize {
    self.atn.lexer_actions.push(action);
    self.atn.lexer_actions.len() - 1
  }

  pub fn edge(&mut self, from: usize, transition: Transition) {
    self.atn.states[from].add_transition(transition);
  }

  pub fn eps(&mut self, from: usize, to: usize) {
    self.edge(from, Transition::epsilon(to));
  }

  pub fn atom(&mut self, from: usize, label: i32, to: usize) {
    self.edge(from, Transition::Atom { target: to, label });
  }

  pub fn set(&mut self, from: usize, set: IntervalSet, to: usize) {
    self.edge(from, Transition::Set { target: to, set });
  }

  pub fn serialize(&self) -> Vec<u16> {
    AtnSerializer::serialize(&self.atn).expect("serializable test automaton")
  }

  pub fn build(self) -> Arc<Atn> {
    let words = self.serialize();
    Arc::new(AtnDeserializer::new().deserialize(&words).expect("well-formed test automaton"))
  }
}

// SIMULATOR WIRING -----------------------------------------------------

pub fn parser_sim(atn: &Arc<Atn>) -> ParserAtnSimulator {
  ParserAtnSimulator::new(
    atn.clone(),
    Arc::new(decision_dfas(atn)),
    Arc::new(PredictionContextCache::new()),
  )
}

pub fn lexer_sim(atn: &Arc<Atn>) -> LexerAtnSimulator {
  LexerAtnSimulator::new(
    atn.clone(),
    Arc::new(mode_dfas(atn)),
    Arc::new(PredictionContextCache::new()),
  )
}

// RECOGNIZER DOUBLES ---------------------------------------------------

/// Recognizer whose precedence predicates compare against a fixed parser
/// precedence and whose semantic predicates answer from a table.
pub struct TestRecognizer {
  pub precedence: i32,
  pub sempred_answers: Vec<bool>,
}

impl Default for TestRecognizer {
  fn default() -> Self {
    Self { precedence: 0, sempred_answers: Vec::new() }
  }
}

impl TestRecognizer {
  pub fn at_precedence(precedence: i32) -> Self {
    Self { precedence, ..Default::default() }
  }
}

impl Recognizer for TestRecognizer {
  fn sempred(&mut self, _: Option<&Arc<RuleContext>>, _: usize, pred_index: usize) -> bool {
    self.sempred_answers.get(pred_index).copied().unwrap_or(true)
  }

  fn precpred(&mut self, _: Option<&Arc<RuleContext>>, precedence: i32) -> bool {
    precedence >= self.precedence
  }

  fn action(&mut self, _: Option<&Arc<RuleContext>>, _: usize, _: usize) {}

  fn current_precedence(&self) -> i32 {
    self.precedence
  }
}

/// Lexer host that records every mutation the action executor performs.
#[derive(Default)]
pub struct TestLexerHost {
  pub skipped: bool,
  pub more_called: bool,
  pub token_type: Option<i32>,
  pub channel: Option<i32>,
  pub mode_sets: Vec<usize>,
  pub mode_pushes: Vec<usize>,
  pub mode_pops: usize,
  pub custom_actions: Vec<(usize, usize)>,
}

impl Recognizer for TestLexerHost {
  fn sempred(&mut self, _: Option<&Arc<RuleContext>>, _: usize, _: usize) -> bool {
    true
  }

  fn precpred(&mut self, _: Option<&Arc<RuleContext>>, _: i32) -> bool {
    true
  }

  fn action(&mut self, _: Option<&Arc<RuleContext>>, rule_index: usize, action_index: usize) {
    self.custom_actions.push((rule_index, action_index));
  }
}

impl LexerHost for TestLexerHost {
  fn skip(&mut self) {
    self.skipped = true;
  }

  fn more(&mut self) {
    self.more_called = true;
  }

  fn set_token_type(&mut self, token_type: i32) {
    self.token_type = Some(token_type);
  }

  fn set_channel(&mut self, channel: i32) {
    self.channel = Some(channel);
  }

  fn set_mode(&mut self, mode: usize) {
    self.mode_sets.push(mode);
  }

  fn push_mode(&mut self, mode: usize) {
    self.mode_pushes.push(mode);
  }

  fn pop_mode(&mut self) {
    self.mode_pops += 1;
  }
}

/// Listener accumulating every advisory event.
#[derive(Default)]
pub struct CollectingListener {
  pub ambiguities: Vec<(usize, AltSet, bool)>,
  pub full_context_attempts: usize,
  pub context_sensitivities: Vec<(usize, u32)>,
}

impl DiagnosticListener for CollectingListener {
  fn report_ambiguity(
    &mut self,
    decision: usize,
    _interval: Interval,
    exact: bool,
    ambig_alts: &AltSet,
    _configs: &AtnConfigSet,
  ) {
    self.ambiguities.push((decision, ambig_alts.clone(), exact));
  }

  fn report_attempting_full_context(
    &mut self,
    _decision: usize,
    _interval: Interval,
    _conflicting_alts: &AltSet,
    _configs: &AtnConfigSet,
  ) {
    self.full_context_attempts += 1;
  }

  fn report_context_sensitivity(
    &mut self,
    decision: usize,
    _interval: Interval,
    prediction: u32,
    _configs: &AtnConfigSet,
  ) {
    self.context_sensitivities.push((decision, prediction));
  }
}

// GRAMMAR FIXTURES -----------------------------------------------------

pub const TOK_A: i32 = 1;
pub const TOK_B: i32 = 2;
pub const TOK_C: i32 = 3;

/// `S : 'a' 'b' | 'a' 'c' ;` with the decision at the rule's entry block.
pub fn two_alt_atn() -> Arc<Atn> {
  let mut b = AtnBuilder::parser(3);
  let start = b.rule_start(0);
  let stop = b.rule_stop(0);

  let end = b.block_end(0);
  let d = b.block_start(0, end);
  b.decision(d);

  let a1 = b.basic(0);
  let a2 = b.basic(0);
  let a3 = b.basic(0);
  b.atom(a1, TOK_A, a2);
  b.atom(a2, TOK_B, a3);
  b.eps(a3, end);

  let c1 = b.basic(0);
  let c2 = b.basic(0);
  let c3 = b.basic(0);
  b.atom(c1, TOK_A, c2);
  b.atom(c2, TOK_C, c3);
  b.eps(c3, end);

  b.eps(d, a1);
  b.eps(d, c1);
  b.eps(start, d);
  b.eps(end, stop);
  b.build()
}

/// `S : 'a' 'b' | 'a' 'b' 'c' ;`, a common-prefix decision only EOF
/// settles.
pub fn common_prefix_atn() -> Arc<Atn> {
  let mut b = AtnBuilder::parser(3);
  let start = b.rule_start(0);
  let stop = b.rule_stop(0);

  let end = b.block_end(0);
  let d = b.block_start(0, end);
  b.decision(d);

  let a1 = b.basic(0);
  let a2 = b.basic(0);
  let a3 = b.basic(0);
  b.atom(a1, TOK_A, a2);
  b.atom(a2, TOK_B, a3);
  b.eps(a3, end);

  let c1 = b.basic(0);
  let c2 = b.basic(0);
  let c3 = b.basic(0);
  let c4 = b.basic(0);
  b.atom(c1, TOK_A, c2);
  b.atom(c2, TOK_B, c3);
  b.atom(c3, TOK_C, c4);
  b.eps(c4, end);

  b.eps(d, a1);
  b.eps(d, c1);
  b.eps(start, d);
  b.eps(end, stop);
  b.build()
}

/// `S : 'a' | 'a' ;`, a genuine ambiguity: SLL conflicts, full context
/// confirms the ambiguity and resolves to alternative 1.
pub fn ambiguous_atn() -> Arc<Atn> {
  let mut b = AtnBuilder::parser(3);
  let start = b.rule_start(0);
  let stop = b.rule_stop(0);

  let end = b.block_end(0);
  let d = b.block_start(0, end);
  b.decision(d);

  let a1 = b.basic(0);
  let a2 = b.basic(0);
  b.atom(a1, TOK_A, a2);
  b.eps(a2, end);

  let c1 = b.basic(0);
  let c2 = b.basic(0);
  b.atom(c1, TOK_A, c2);
  b.eps(c2, end);

  b.eps(d, a1);
  b.eps(d, c1);
  b.eps(start, d);
  b.eps(end, stop);
  b.build()
}

pub const TOK_INT: i32 = 1;
pub const TOK_PLUS: i32 = 2;

/// `s : e <EOF> ; e : e '+' e | INT ;` with `e` in its eliminated form
/// `e[p] : INT ( {2 >= p}? '+' e[3] )* ;`. Decision 0 is the loop entry,
/// marked as a precedence decision during deserialization. The outer call
/// from `s` carries precedence 0, so the return edge derived from it is
/// the outermost-precedence return that drives filter suppression.
pub fn left_recursive_atn() -> Arc<Atn> {
  let mut b = AtnBuilder::parser(2);

  // rule 0: s
  let s_start = b.rule_start(0);
  let s_stop = b.rule_stop(0);
  let s_mid = b.basic(0);
  let s_end = b.basic(0);

  // rule 1: e
  let e_start = b.left_recursive_rule_start(1);
  let e_stop = b.rule_stop(1);

  let primary = b.basic(1);
  let after_primary = b.basic(1);

  let block_end = b.block_end(1);
  let block_start =
    b.state(1, AtnStateKind::StarBlockStart { end_state: block_end, decision: DecisionData::unassigned() });
  let loop_entry = b.state(1, AtnStateKind::StarLoopEntry {
    loop_back: INVALID_STATE_NUMBER,
    is_precedence_decision: false,
    decision:  DecisionData::unassigned(),
  });
  let loop_back = b.state(1, AtnStateKind::StarLoopback);
  let loop_end = b.state(1, AtnStateKind::LoopEnd { loop_back: loop_entry });
  b.decision(loop_entry);

  let pred = b.basic(1);
  let op = b.basic(1);
  let operand = b.basic(1);

  b.edge(s_start, Transition::Rule {
    rule_start:   e_start,
    rule_index:   1,
    precedence:   0,
    follow_state: s_mid,
  });
  b.atom(s_mid, trellis_runtime::types::TOKEN_EOF, s_end);
  b.eps(s_end, s_stop);

  b.eps(e_start, primary);
  b.atom(primary, TOK_INT, after_primary);
  b.eps(after_primary, loop_entry);

  b.eps(loop_entry, block_start);
  b.eps(loop_entry, loop_end);

  b.eps(block_start, pred);
  b.edge(pred, Transition::PrecedencePredicate { target: op, precedence: 2 });
  b.atom(op, TOK_PLUS, operand);
  b.edge(operand, Transition::Rule {
    rule_start:   e_start,
    rule_index:   1,
    precedence:   3,
    follow_state: block_end,
  });

  b.eps(block_end, loop_back);
  b.eps(loop_back, loop_entry);
  b.eps(loop_end, e_stop);
  b.build()
}

pub const TOK_ID: i32 = 1;
pub const TOK_NUM: i32 = 2;
pub const TOK_WS: i32 = 3;

/// `ID : [a-z]+ ; INT : [0-9]+ ; WS : [ \t\r\n]+ -> skip ;` in one mode.
pub fn three_rule_lexer_atn() -> Arc<Atn> {
  let mut b = AtnBuilder::lexer(3);
  let tokens_start =
    b.state(INVALID_RULE_INDEX, AtnStateKind::TokensStart { decision: DecisionData::unassigned() });
  b.decision(tokens_start);
  b.mode(tokens_start);

  let skip_action = b.lexer_action(LexerAction::Skip);

  let mut plus_loop_rule = |b: &mut AtnBuilder, rule: usize, label: IntervalSet| -> (usize, usize) {
    let start = b.rule_start(rule);
    let stop = b.rule_stop(rule);

    let block_end = b.block_end(rule);
    let block_start = b.state(rule, AtnStateKind::PlusBlockStart {
      end_state: block_end,
      loop_back: INVALID_STATE_NUMBER,
      decision:  DecisionData::unassigned(),
    });
    let loop_back =
      b.state(rule, AtnStateKind::PlusLoopback { decision: DecisionData::unassigned() });
    let loop_end = b.state(rule, AtnStateKind::LoopEnd { loop_back });
    b.decision(loop_back);

    let body = b.basic(rule);
    b.eps(start, block_start);
    b.eps(block_start, body);
    b.set(body, label, block_end);
    b.eps(block_end, loop_back);
    b.eps(loop_back, block_start);
    b.eps(loop_back, loop_end);
    (loop_end, stop)
  };

  // ID : [a-z]+
  let (id_loop_end, id_stop) = plus_loop_rule(&mut b, 0, IntervalSet::of_range(97, 122));
  b.token_type(0, TOK_ID);
  b.eps(id_loop_end, id_stop);

  // INT : [0-9]+
  let (int_loop_end, int_stop) = plus_loop_rule(&mut b, 1, IntervalSet::of_range(48, 57));
  b.token_type(1, TOK_NUM);
  b.eps(int_loop_end, int_stop);

  // WS : [ \t\r\n]+ -> skip
  let mut ws_set = IntervalSet::new();
  ws_set.add_one(9);
  ws_set.add_one(10);
  ws_set.add_one(13);
  ws_set.add_one(32);
  let (ws_loop_end, ws_stop) = plus_loop_rule(&mut b, 2, ws_set);
  b.token_type(2, TOK_WS);
  let ws_action_state = b.basic(2);
  b.eps(ws_loop_end, ws_action_state);
  b.edge(ws_action_state, Transition::Action {
    target:           ws_stop,
    rule_index:       2,
    action_index:     skip_action,
    is_ctx_dependent: false,
  });

  let rule_starts: Vec<usize> = (0..3).map(|r| b.atn.rule_to_start_state[r]).collect();
  for start in rule_starts {
    b.eps(tokens_start, start);
  }
  b.build()
}
