use crate::utils::*;
use trellis_runtime::{
  prediction::PredictionMode,
  streams::{IntStream, VecTokenStream},
  types::{TrellisError, TOKEN_EOF},
};

#[test_log::test]
fn two_alt_decision_resolves_with_one_symbol_of_lookahead() {
  let atn = two_alt_atn();
  let sim = parser_sim(&atn);
  let mut input = VecTokenStream::from_types([TOK_A, TOK_B]);
  let mut recognizer = TestRecognizer::default();
  let mut listener = CollectingListener::default();

  let alt = sim.adaptive_predict(&mut input, 0, None, &mut recognizer, &mut listener).unwrap();
  assert_eq!(alt, 1);
  assert_eq!(listener.full_context_attempts, 0);
  assert!(listener.ambiguities.is_empty());

  let mut input = VecTokenStream::from_types([TOK_A, TOK_C]);
  let alt = sim.adaptive_predict(&mut input, 0, None, &mut recognizer, &mut listener).unwrap();
  assert_eq!(alt, 2);
}

#[test_log::test]
fn prediction_leaves_the_input_where_it_found_it() {
  let atn = two_alt_atn();
  let sim = parser_sim(&atn);
  let mut input = VecTokenStream::from_types([TOK_A, TOK_C]);
  let mut recognizer = TestRecognizer::default();
  let mut listener = CollectingListener::default();

  assert_eq!(input.index(), 0);
  sim.adaptive_predict(&mut input, 0, None, &mut recognizer, &mut listener).unwrap();
  assert_eq!(input.index(), 0);

  input.consume();
  sim.adaptive_predict(&mut input, 0, None, &mut recognizer, &mut listener).ok();
  assert_eq!(input.index(), 1);
}

#[test_log::test]
fn repeated_prediction_is_idempotent_and_reuses_the_dfa() {
  let atn = two_alt_atn();
  let sim = parser_sim(&atn);
  let mut recognizer = TestRecognizer::default();
  let mut listener = CollectingListener::default();

  let mut input = VecTokenStream::from_types([TOK_A, TOK_B]);
  let first = sim.adaptive_predict(&mut input, 0, None, &mut recognizer, &mut listener).unwrap();
  let states_after_first = sim.dfa(0).num_states();

  for _ in 0..3 {
    let mut input = VecTokenStream::from_types([TOK_A, TOK_B]);
    let again = sim.adaptive_predict(&mut input, 0, None, &mut recognizer, &mut listener).unwrap();
    assert_eq!(again, first);
  }
  // Everything after the first run is table lookups.
  assert_eq!(sim.dfa(0).num_states(), states_after_first);
}

#[test_log::test]
fn common_prefix_grammar_commits_at_the_distinguishing_symbol() {
  let atn = common_prefix_atn();
  let mut sim = parser_sim(&atn);
  sim.mode = PredictionMode::Ll;
  let mut recognizer = TestRecognizer::default();
  let mut listener = CollectingListener::default();

  // "a b <EOF>": only the two-token alternative remains viable.
  let mut input = VecTokenStream::from_types([TOK_A, TOK_B]);
  let alt = sim.adaptive_predict(&mut input, 0, None, &mut recognizer, &mut listener).unwrap();
  assert_eq!(alt, 1);

  // "a b c": the longer alternative wins instead.
  let mut input = VecTokenStream::from_types([TOK_A, TOK_B, TOK_C]);
  let alt = sim.adaptive_predict(&mut input, 0, None, &mut recognizer, &mut listener).unwrap();
  assert_eq!(alt, 2);
}

#[test_log::test]
fn true_ambiguity_falls_back_to_full_context_and_reports() {
  let atn = ambiguous_atn();
  let mut sim = parser_sim(&atn);
  sim.mode = PredictionMode::Ll;
  let mut recognizer = TestRecognizer::default();
  let mut listener = CollectingListener::default();

  let mut input = VecTokenStream::from_types([TOK_A]);
  let alt = sim.adaptive_predict(&mut input, 0, None, &mut recognizer, &mut listener).unwrap();

  assert_eq!(alt, 1);
  assert_eq!(listener.full_context_attempts, 1);
  assert_eq!(listener.ambiguities.len(), 1);
  let (decision, alts, _exact) = &listener.ambiguities[0];
  assert_eq!(*decision, 0);
  assert!(alts.contains(1) && alts.contains(2));
}

#[test_log::test]
fn sll_mode_resolves_conflicts_to_the_minimum_alternative_without_fallback() {
  let atn = ambiguous_atn();
  let sim = parser_sim(&atn);
  let mut recognizer = TestRecognizer::default();
  let mut listener = CollectingListener::default();

  let mut input = VecTokenStream::from_types([TOK_A]);
  let alt = sim.adaptive_predict(&mut input, 0, None, &mut recognizer, &mut listener).unwrap();

  assert_eq!(alt, 1);
  assert_eq!(listener.full_context_attempts, 0);
}

#[test_log::test]
fn dead_input_raises_no_viable_alt_with_the_offending_configs() {
  let atn = two_alt_atn();
  let sim = parser_sim(&atn);
  let mut recognizer = TestRecognizer::default();
  let mut listener = CollectingListener::default();

  let mut input = VecTokenStream::from_types([TOK_B]);
  let err = sim.adaptive_predict(&mut input, 0, None, &mut recognizer, &mut listener).unwrap_err();
  match err {
    TrellisError::NoViableAlt { decision, start_index, configs, .. } => {
      assert_eq!(decision, 0);
      assert_eq!(start_index, 0);
      assert!(!configs.is_empty());
    }
    other => panic!("expected NoViableAlt, got {other:?}"),
  }
  // The mark/seek discipline holds on the error path too.
  assert_eq!(input.index(), 0);
}

// PRECEDENCE ------------------------------------------------------------

#[test_log::test]
fn left_recursive_loop_continues_at_low_precedence_and_exits_at_high() {
  let atn = left_recursive_atn();
  let sim = parser_sim(&atn);
  let mut listener = CollectingListener::default();

  assert!(sim.dfa(0).is_precedence_dfa);

  // Outermost invocation (precedence 0), cursor on '+': take the loop.
  let mut input = VecTokenStream::from_types([TOK_INT, TOK_PLUS, TOK_INT]);
  input.seek(1);
  let mut outer = TestRecognizer::at_precedence(0);
  let alt = sim.adaptive_predict(&mut input, 0, None, &mut outer, &mut listener).unwrap();
  assert_eq!(alt, 1);

  // Right-operand invocation (precedence 3): '+' no longer binds, the
  // loop exits and the operator is left for the outer invocation. This is
  // what makes the operator left-associative.
  let mut input = VecTokenStream::from_types([TOK_INT, TOK_PLUS, TOK_INT]);
  input.seek(1);
  let mut inner = TestRecognizer::at_precedence(3);
  let alt = sim.adaptive_predict(&mut input, 0, None, &mut inner, &mut listener).unwrap();
  assert_eq!(alt, 2);

  // At EOF every precedence level exits.
  let mut input = VecTokenStream::from_types([TOK_INT, TOK_PLUS, TOK_INT]);
  input.seek(3);
  assert_eq!(input.la(1), TOKEN_EOF);
  let alt = sim.adaptive_predict(&mut input, 0, None, &mut outer, &mut listener).unwrap();
  assert_eq!(alt, 2);

  // Each precedence level got its own start state.
  assert!(sim.dfa(0).precedence_start_state(0).is_some());
  assert!(sim.dfa(0).precedence_start_state(3).is_some());
}

#[test_log::test]
fn left_recursive_parse_drives_a_full_expression() {
  // Hand-driven parse of 1+2+3, playing the role of the generated
  // parser: match INT, then consult the loop decision until it exits.
  let atn = left_recursive_atn();
  let sim = parser_sim(&atn);
  let mut listener = CollectingListener::default();
  let mut input = VecTokenStream::from_types([TOK_INT, TOK_PLUS, TOK_INT, TOK_PLUS, TOK_INT]);

  let mut recognizer = TestRecognizer::at_precedence(0);
  let mut operators = 0;
  assert_eq!(input.la(1), TOK_INT);
  input.consume();
  loop {
    let alt = sim.adaptive_predict(&mut input, 0, None, &mut recognizer, &mut listener).unwrap();
    if alt != 1 {
      break;
    }
    assert_eq!(input.la(1), TOK_PLUS);
    input.consume();
    // Right operand at raised precedence: its own loop decision must
    // immediately exit, leaving the next '+' to this level.
    let mut operand = TestRecognizer::at_precedence(3);
    assert_eq!(input.la(1), TOK_INT);
    input.consume();
    let inner =
      sim.adaptive_predict(&mut input, 0, None, &mut operand, &mut listener).unwrap();
    assert_eq!(inner, 2);
    operators += 1;
  }
  assert_eq!(operators, 2);
  assert_eq!(input.la(1), TOKEN_EOF);
}
