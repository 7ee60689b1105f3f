use std::sync::Arc;

use crate::{
  atn::{Atn, AtnStateKind, Transition},
  context::{PredictionContext, SharedContext, EMPTY_RETURN_STATE},
  prediction::AtnConfig,
  recognizer::RuleContext,
  types::{proxy::Set, AltSet, IntervalSet, TOKEN_EOF, TOKEN_EPSILON, TOKEN_INVALID_TYPE, TOKEN_MIN_USER_TYPE},
};

/// Token added to a lookahead set in place of anything hidden behind a
/// semantic predicate, when predicates are treated as opaque.
pub const HIT_PRED: i32 = TOKEN_INVALID_TYPE;

/// Context-aware FOLLOW computation over the ATN.
///
/// `look` collects the token types matchable from a state, chasing rule
/// invocations through an explicit context graph. A bit set of rules on
/// the simulated call stack breaks left-recursion cycles; a busy set over
/// (state, context) pairs bounds re-entry.
pub struct LookaheadAnalyzer<'a> {
  atn: &'a Atn,
  /// When false, predicate transitions contribute [`HIT_PRED`] instead of
  /// being traversed.
  see_thru_preds: bool,
}

impl<'a> LookaheadAnalyzer<'a> {
  pub fn new(atn: &'a Atn) -> Self {
    Self { atn, see_thru_preds: true }
  }

  pub fn with_opaque_predicates(atn: &'a Atn) -> Self {
    Self { atn, see_thru_preds: false }
  }

  /// Token types that can appear after `state`, stopping the walk at
  /// `stop_state` when given. With no rule context the result carries
  /// EPSILON wherever the owning rule can complete; with one, completion
  /// chases the invocation chain and contributes EOF at its end.
  pub fn look(
    &self,
    state: usize,
    stop_state: Option<usize>,
    ctx: Option<&Arc<RuleContext>>,
  ) -> IntervalSet {
    let mut result = IntervalSet::new();
    let look_ctx = ctx.map(|c| PredictionContext::from_rule_context(self.atn, Some(c)));
    let mut busy = Set::default();
    let mut called_rule_stack = AltSet::new();
    self.walk(state, stop_state, look_ctx, &mut result, &mut busy, &mut called_rule_stack, true);
    result
  }

  #[allow(clippy::too_many_arguments)]
  fn walk(
    &self,
    state: usize,
    stop_state: Option<usize>,
    ctx: Option<SharedContext>,
    look: &mut IntervalSet,
    busy: &mut Set<AtnConfig>,
    called_rule_stack: &mut AltSet,
    add_eof: bool,
  ) {
    // The alt slot distinguishes "no context" from an explicit empty
    // context; both shapes reach this walk.
    let marker = AtnConfig::new(
      state,
      ctx.is_some() as u32,
      ctx.clone().unwrap_or_else(PredictionContext::empty),
    );
    if !busy.insert(marker) {
      return;
    }

    let s = self.atn.state(state);

    if Some(state) == stop_state || s.is_rule_stop() {
      match &ctx {
        None => {
          look.add_one(TOKEN_EPSILON);
          return;
        }
        Some(c) if c.is_empty() && add_eof => {
          look.add_one(TOKEN_EOF);
          return;
        }
        _ => {}
      }

      if s.is_rule_stop() {
        let ctx = ctx.as_ref().expect("non-empty context checked above");
        if !ctx.is_empty() {
          // Pop every stack top, masking this rule off the call stack for
          // the duration so mutual recursion cannot spin.
          let was_on_stack = called_rule_stack.contains(s.rule_index as u32);
          called_rule_stack.remove(s.rule_index as u32);
          for i in 0..ctx.size() {
            if ctx.return_state(i) == EMPTY_RETURN_STATE {
              continue;
            }
            self.walk(
              ctx.return_state(i),
              stop_state,
              ctx.parent(i).cloned(),
              look,
              busy,
              called_rule_stack,
              add_eof,
            );
          }
          if was_on_stack {
            called_rule_stack.insert(s.rule_index as u32);
          }
          return;
        }
      }
    }

    for transition in &s.transitions {
      match transition {
        Transition::Rule { rule_start, rule_index, follow_state, .. } => {
          if called_rule_stack.contains(*rule_index as u32) {
            continue;
          }
          let new_ctx = PredictionContext::singleton(
            Some(ctx.clone().unwrap_or_else(PredictionContext::empty)),
            *follow_state,
          );
          // Restore the stack bit on every exit path out of the callee.
          called_rule_stack.insert(*rule_index as u32);
          self.walk(*rule_start, stop_state, Some(new_ctx), look, busy, called_rule_stack, add_eof);
          called_rule_stack.remove(*rule_index as u32);
        }
        Transition::Predicate { target, .. } | Transition::PrecedencePredicate { target, .. } => {
          if self.see_thru_preds {
            self.walk(*target, stop_state, ctx.clone(), look, busy, called_rule_stack, add_eof);
          } else {
            look.add_one(HIT_PRED);
          }
        }
        Transition::Wildcard { .. } => {
          look.add_range(TOKEN_MIN_USER_TYPE, self.atn.max_token_type);
        }
        t if t.is_epsilon() => {
          self.walk(t.target(), stop_state, ctx.clone(), look, busy, called_rule_stack, add_eof);
        }
        Transition::NotSet { set, .. } => {
          look.add_set(&set.complement(TOKEN_MIN_USER_TYPE, self.atn.max_token_type));
        }
        t => {
          if let Some(set) = t.label() {
            look.add_set(&set);
          }
        }
      }
    }
  }
}

// Rule-context note: a `None` context means "look only within this rule";
// `RuleStart` states reached through `Rule` transitions always get a real
// context, so EPSILON can only ever surface for the rule `look` started in.

#[cfg(test)]
mod test {
  use super::*;
  use crate::atn::{AtnState, GrammarType};

  // A two-rule parser ATN built by hand:
  //   rule 0:  start0 -> (invoke rule 1) -> mid -> 'c'(99) -> stop0
  //   rule 1:  start1 -> 'a'(97) -> s -> 'b'(98)? -> stop1
  // The optional 'b' is modeled as two epsilon paths.
  fn two_rule_atn() -> Atn {
    let mut atn = Atn::new(GrammarType::Parser, 130);
    let add = |atn: &mut Atn, rule, kind| {
      let number = atn.states.len();
      atn.states.push(AtnState::new(number, rule, kind));
      number
    };

    let start0 = add(&mut atn, 0, AtnStateKind::RuleStart { stop_state: 0, is_left_recursive: false });
    let stop0 = add(&mut atn, 0, AtnStateKind::RuleStop);
    let mid = add(&mut atn, 0, AtnStateKind::Basic);
    let start1 = add(&mut atn, 1, AtnStateKind::RuleStart { stop_state: 0, is_left_recursive: false });
    let stop1 = add(&mut atn, 1, AtnStateKind::RuleStop);
    let s1a = add(&mut atn, 1, AtnStateKind::Basic);
    let s1b = add(&mut atn, 1, AtnStateKind::Basic);

    atn.states[start0].kind = AtnStateKind::RuleStart { stop_state: stop0, is_left_recursive: false };
    atn.states[start1].kind = AtnStateKind::RuleStart { stop_state: stop1, is_left_recursive: false };

    atn.states[start0].add_transition(Transition::Rule {
      rule_start:   start1,
      rule_index:   1,
      precedence:   0,
      follow_state: mid,
    });
    atn.states[mid].add_transition(Transition::Atom { target: stop0, label: 99 });
    atn.states[start1].add_transition(Transition::Atom { target: s1a, label: 97 });
    atn.states[s1a].add_transition(Transition::Atom { target: s1b, label: 98 });
    atn.states[s1a].add_transition(Transition::epsilon(stop1));
    atn.states[s1b].add_transition(Transition::epsilon(stop1));

    atn.rule_to_start_state = vec![start0, start1];
    atn.rule_to_stop_state = vec![stop0, stop1];
    atn
  }

  #[test]
  fn look_enters_called_rules() {
    let atn = two_rule_atn();
    let look = LookaheadAnalyzer::new(&atn).look(atn.rule_to_start_state[0], None, None);
    assert!(look.contains(97));
    assert!(!look.contains(98));
    assert!(!look.contains(99));
  }

  #[test]
  fn look_follows_the_invocation_context_through_rule_stops() {
    let atn = two_rule_atn();
    // After 'a' inside rule 1: either 'b', or pop back out. Without an
    // invocation context the pop is EPSILON; `look` then chases the
    // follow edge of the in-rule invocation graph only when a context
    // exists, so EPSILON marks "can exit rule" here.
    let look = LookaheadAnalyzer::new(&atn).look(5, None, None);
    assert!(look.contains(98));
    assert!(look.contains(TOKEN_EPSILON));
  }

  #[test]
  fn next_tokens_in_context_resolves_follow() {
    let atn = two_rule_atn();
    // Same state, but invoked from rule 0 at `start0`: popping rule 1
    // resumes at `mid`, whose next token is 'c'.
    let outer = RuleContext::new(Some(RuleContext::empty()), 0);
    let look = atn.next_tokens_in_context(5, Some(&outer));
    assert!(look.contains(98));
    assert!(look.contains(99));
    assert!(!look.contains(TOKEN_EPSILON));
  }

  #[test]
  fn expected_tokens_walks_invocation_chain() {
    let atn = two_rule_atn();
    let outer = RuleContext::new(Some(RuleContext::empty()), 0);
    let expected = atn.expected_tokens(5, Some(&outer));
    assert!(expected.contains(98));
    assert!(expected.contains(99));
  }
}
