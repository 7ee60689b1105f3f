use crate::utils::*;
use trellis_runtime::{
  atn::{AtnDeserializer, AtnSerializer, GrammarType, SERIALIZED_VERSION},
  lexer::LexerAction,
  types::TrellisError,
};

#[test_log::test]
fn rejected_version_fails_before_construction() {
  let mut b = AtnBuilder::parser(3);
  let start = b.rule_start(0);
  let stop = b.rule_stop(0);
  b.atom(start, TOK_A, stop);
  let mut words = b.serialize();

  words[0] = SERIALIZED_VERSION + 1;
  let err = AtnDeserializer::new().deserialize(&words).unwrap_err();
  assert!(matches!(err, TrellisError::UnsupportedVersion { .. }));
}

#[test_log::test]
fn truncation_surfaces_as_corruption() {
  let words = {
    let mut b = AtnBuilder::parser(3);
    let start = b.rule_start(0);
    let stop = b.rule_stop(0);
    b.atom(start, TOK_A, stop);
    b.serialize()
  };

  let err = AtnDeserializer::new().deserialize(&words[..words.len() / 2]).unwrap_err();
  assert!(matches!(err, TrellisError::CorruptedAtn(_)));
}

/// Re-serializing a deserialized automaton must reproduce the byte
/// stream: the serialized form is canonical for a given automaton.
fn assert_round_trips(words: Vec<u16>) {
  let atn = AtnDeserializer::new().deserialize(&words).expect("fixture deserializes");
  let again = AtnSerializer::serialize(&atn).expect("fixture re-serializes");
  assert_eq!(words, again);

  let atn2 = AtnDeserializer::new().deserialize(&again).expect("round-tripped form deserializes");
  assert_eq!(atn.num_states(), atn2.num_states());
  assert_eq!(atn.decision_to_state, atn2.decision_to_state);
  assert_eq!(atn.rule_to_start_state, atn2.rule_to_start_state);
  assert_eq!(atn.rule_to_stop_state, atn2.rule_to_stop_state);
  for (a, b) in atn.states.iter().zip(atn2.states.iter()) {
    assert_eq!(a.kind, b.kind, "state {} diverged", a.number);
    assert_eq!(a.transitions, b.transitions, "state {} edges diverged", a.number);
  }
}

#[test_log::test]
fn parser_automata_round_trip() {
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
  b.atom(c1, TOK_B, c2);
  b.eps(c2, end);
  b.eps(d, a1);
  b.eps(d, c1);
  b.eps(start, d);
  b.eps(end, stop);

  assert_round_trips(b.serialize());
}

#[test_log::test]
fn precedence_grammars_round_trip_with_flags_intact() {
  let atn = left_recursive_atn();
  let words = AtnSerializer::serialize(&atn).unwrap();
  assert_round_trips(words.clone());

  let again = AtnDeserializer::new().deserialize(&words).unwrap();
  let loop_entry = again.decision_to_state[0];
  assert!(again.state(loop_entry).is_precedence_decision());
}

#[test_log::test]
fn lexer_automata_round_trip_with_action_tables() {
  let atn = three_rule_lexer_atn();
  assert_eq!(atn.grammar_type, GrammarType::Lexer);
  assert_eq!(atn.lexer_actions, vec![LexerAction::Skip]);
  assert_eq!(atn.rule_to_token_type, vec![TOK_ID, TOK_NUM, TOK_WS]);

  assert_round_trips(AtnSerializer::serialize(&atn).unwrap());
}

#[test_log::test]
fn wide_code_point_sets_round_trip_through_the_supplementary_table() {
  let mut b = AtnBuilder::lexer(3);
  let tokens_start = b.state(
    trellis_runtime::atn::INVALID_RULE_INDEX,
    trellis_runtime::atn::AtnStateKind::TokensStart {
      decision: trellis_runtime::atn::DecisionData::unassigned(),
    },
  );
  b.decision(tokens_start);
  b.mode(tokens_start);

  let start = b.rule_start(0);
  let stop = b.rule_stop(0);
  b.token_type(0, 1);
  let body = b.basic(0);
  b.eps(start, body);
  // One narrow set and one set reaching past the BMP.
  let mut emoji = trellis_runtime::types::IntervalSet::of_range(0x1F600, 0x1F64F);
  emoji.add_range(97, 122);
  b.set(body, emoji, stop);
  b.eps(tokens_start, start);

  let words = b.serialize();
  let atn = AtnDeserializer::new().deserialize(&words).unwrap();
  let body_state = atn.state(atn.rule_to_start_state[0]).transition(0).target();
  let label = atn.state(body_state).transition(0).label().unwrap();
  assert!(label.contains(0x1F610));
  assert!(label.contains(110));
  assert!(!label.contains(0x1F650));

  assert_round_trips(words);
}
