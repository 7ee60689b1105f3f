use crate::utils::*;
use std::sync::Arc;
use trellis_runtime::{
  lexer::{LexerAction, LexerActionExecutor},
  streams::{CharStream, CodePointStream, IntStream},
  types::{Interval, TrellisError, TOKEN_EOF},
};

/// Drives the simulator over a whole string, returning
/// `(token_type, text)` pairs until EOF.
fn tokenize(input: &str) -> (Vec<(i32, String)>, TestLexerHost) {
  let atn = three_rule_lexer_atn();
  let mut sim = lexer_sim(&atn);
  let mut host = TestLexerHost::default();
  let mut stream = CodePointStream::new(input);
  let mut tokens = Vec::new();

  loop {
    let start = stream.index();
    let token_type = sim.match_token(&mut stream, 0, &mut host).unwrap();
    if token_type == TOKEN_EOF {
      tokens.push((TOKEN_EOF, "<EOF>".to_string()));
      break;
    }
    let text = stream.text(Interval::new(start as i32, stream.index() as i32 - 1));
    tokens.push((token_type, text));
  }
  (tokens, host)
}

#[test_log::test]
fn keywords_numbers_and_trivia_tokenize_greedily() {
  let (tokens, host) = tokenize("abc 12");
  assert_eq!(tokens, vec![
    (TOK_ID, "abc".to_string()),
    (TOK_WS, " ".to_string()),
    (TOK_NUM, "12".to_string()),
    (TOKEN_EOF, "<EOF>".to_string()),
  ]);
  // WS carries `-> skip`; the executor must have told the host so.
  assert!(host.skipped);
}

#[test_log::test]
fn the_mode_dfa_learns_edges_and_accept_states() {
  let atn = three_rule_lexer_atn();
  let mut sim = lexer_sim(&atn);
  let mut host = TestLexerHost::default();
  let mut stream = CodePointStream::new("abc 12");
  while sim.match_token(&mut stream, 0, &mut host).unwrap() != TOKEN_EOF {}

  let dfa = sim.dfa(0);
  let s0 = dfa.s0().expect("start state installed");

  let id_state = dfa.edge(s0, 'a' as i32).expect("letter edge cached");
  assert!(dfa.read(id_state, |s| s.is_accept));
  assert_eq!(
    dfa.read(id_state, |s| s.lexer_accept.as_ref().unwrap().token_type),
    TOK_ID
  );

  let int_state = dfa.edge(s0, '1' as i32).expect("digit edge cached");
  assert_eq!(
    dfa.read(int_state, |s| s.lexer_accept.as_ref().unwrap().token_type),
    TOK_NUM
  );

  // Within a token, letter edges chain back into the same accept state.
  assert_eq!(dfa.edge(id_state, 'b' as i32), Some(id_state));
}

#[test_log::test]
fn newline_resets_column_and_increments_line() {
  let atn = three_rule_lexer_atn();
  let mut sim = lexer_sim(&atn);
  let mut host = TestLexerHost::default();
  let mut stream = CodePointStream::new("ab\ncd");

  assert_eq!(sim.match_token(&mut stream, 0, &mut host).unwrap(), TOK_ID);
  assert_eq!((sim.line, sim.column), (1, 2));

  assert_eq!(sim.match_token(&mut stream, 0, &mut host).unwrap(), TOK_WS);
  assert_eq!((sim.line, sim.column), (2, 0));

  assert_eq!(sim.match_token(&mut stream, 0, &mut host).unwrap(), TOK_ID);
  assert_eq!((sim.line, sim.column), (2, 2));
}

#[test_log::test]
fn unmatchable_input_raises_lexer_no_viable_alt() {
  let atn = three_rule_lexer_atn();
  let mut sim = lexer_sim(&atn);
  let mut host = TestLexerHost::default();
  let mut stream = CodePointStream::new("!");

  let err = sim.match_token(&mut stream, 0, &mut host).unwrap_err();
  match err {
    TrellisError::LexerNoViableAlt { start_index, mode, .. } => {
      assert_eq!(start_index, 0);
      assert_eq!(mode, 0);
    }
    other => panic!("expected LexerNoViableAlt, got {other:?}"),
  }
}

#[test_log::test]
fn empty_input_yields_eof_without_error() {
  let atn = three_rule_lexer_atn();
  let mut sim = lexer_sim(&atn);
  let mut host = TestLexerHost::default();
  let mut stream = CodePointStream::new("");
  assert_eq!(sim.match_token(&mut stream, 0, &mut host).unwrap(), TOKEN_EOF);
}

#[test_log::test]
fn longest_match_wins_after_a_shorter_accept() {
  // "ab1": ID accepts at "a" and "ab"; the DFA keeps extending and the
  // final token is the longest accepted prefix, with the stream parked
  // on the first unconsumed character.
  let atn = three_rule_lexer_atn();
  let mut sim = lexer_sim(&atn);
  let mut host = TestLexerHost::default();
  let mut stream = CodePointStream::new("ab1");

  assert_eq!(sim.match_token(&mut stream, 0, &mut host).unwrap(), TOK_ID);
  assert_eq!(stream.index(), 2);
  assert_eq!(sim.match_token(&mut stream, 0, &mut host).unwrap(), TOK_NUM);
  assert_eq!(stream.index(), 3);
}

// ACTION EXECUTORS -------------------------------------------------------

#[test_log::test]
fn executors_drive_host_mutations_in_declaration_order() {
  let executor = LexerActionExecutor::new(vec![
    LexerAction::Channel { channel: 2 },
    LexerAction::Type { token_type: 9 },
    LexerAction::PushMode { mode: 1 },
  ]);
  let mut host = TestLexerHost::default();
  let mut stream = CodePointStream::new("xyz");
  stream.seek(3);

  executor.execute(&mut host, &mut stream, 0);
  assert_eq!(host.channel, Some(2));
  assert_eq!(host.token_type, Some(9));
  assert_eq!(host.mode_pushes, vec![1]);
}

#[test_log::test]
fn indexed_actions_replay_at_their_recorded_offset() {
  let custom = LexerActionExecutor::new(vec![LexerAction::Custom { rule_index: 4, action_index: 0 }]);
  let fixed = LexerActionExecutor::fix_offset_before_match(&custom, 2);
  assert!(matches!(fixed.actions()[0], LexerAction::Indexed { offset: 2, .. }));

  // Wrapping an already-indexed executor changes nothing.
  let fixed_again = LexerActionExecutor::fix_offset_before_match(&fixed, 5);
  assert!(Arc::ptr_eq(&fixed, &fixed_again));

  let mut host = TestLexerHost::default();
  let mut stream = CodePointStream::new("abcdef");
  stream.seek(6);
  fixed.execute(&mut host, &mut stream, 1);
  assert_eq!(host.custom_actions, vec![(4, 0)]);
  // The cursor was restored after the indexed seek.
  assert_eq!(stream.index(), 6);
}

#[test_log::test]
fn append_builds_a_new_executor_and_preserves_equality_semantics() {
  let a = LexerActionExecutor::new(vec![LexerAction::Skip]);
  let b = LexerActionExecutor::append(Some(&a), LexerAction::More);
  assert_eq!(a.actions().len(), 1);
  assert_eq!(b.actions(), &[LexerAction::Skip, LexerAction::More]);

  let c = LexerActionExecutor::append(Some(&a), LexerAction::More);
  assert_eq!(*b, *c);
}
