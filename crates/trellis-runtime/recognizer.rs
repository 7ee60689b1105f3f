//! Contracts the prediction core consumes from the generated recognizer
//! side. Generated parsers and lexers live outside this crate; these traits
//! are the whole surface the simulators see of them.

use std::sync::Arc;

use crate::{
  prediction::AtnConfigSet,
  types::{AltSet, Interval},
};

/// The invocation-chain node handed to prediction as "outer context". A
/// chain of these is folded into an initial prediction context; nothing
/// else of the caller's rule context is consulted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuleContext {
  pub parent: Option<Arc<RuleContext>>,
  /// Number of the ATN state that invoked the current rule, or -1 at the
  /// outermost level.
  pub invoking_state: i32,
}

impl RuleContext {
  pub fn empty() -> Arc<RuleContext> {
    Arc::new(RuleContext { parent: None, invoking_state: -1 })
  }

  pub fn new(parent: Option<Arc<RuleContext>>, invoking_state: i32) -> Arc<RuleContext> {
    Arc::new(RuleContext { parent, invoking_state })
  }

  pub fn is_empty(&self) -> bool {
    self.invoking_state == -1
  }
}

/// Predicate and action callbacks implemented by the generated recognizer.
pub trait Recognizer {
  /// Evaluates semantic predicate `pred_index` of rule `rule_index`.
  fn sempred(&mut self, ctx: Option<&Arc<RuleContext>>, rule_index: usize, pred_index: usize) -> bool;

  /// Evaluates a precedence predicate: `current precedence < precedence`.
  fn precpred(&mut self, ctx: Option<&Arc<RuleContext>>, precedence: i32) -> bool;

  /// Runs custom action `action_index` of rule `rule_index`.
  fn action(&mut self, ctx: Option<&Arc<RuleContext>>, rule_index: usize, action_index: usize);

  /// The parser's current operator precedence; the precedence-aware start
  /// state is selected with this.
  fn current_precedence(&self) -> i32 {
    0
  }
}

/// Mutations a lexer front-end exposes to the action executor.
pub trait LexerHost: Recognizer {
  fn skip(&mut self);
  fn more(&mut self);
  fn set_token_type(&mut self, token_type: i32);
  fn set_channel(&mut self, channel: i32);
  fn set_mode(&mut self, mode: usize);
  fn push_mode(&mut self, mode: usize);
  fn pop_mode(&mut self);
}

/// Advisory prediction diagnostics. Reporting changes nothing about the
/// parse; listeners typically surface grammar ambiguities to developers.
pub trait DiagnosticListener {
  fn report_ambiguity(
    &mut self,
    _decision: usize,
    _interval: Interval,
    _exact: bool,
    _ambig_alts: &AltSet,
    _configs: &AtnConfigSet,
  ) {
  }

  fn report_attempting_full_context(
    &mut self,
    _decision: usize,
    _interval: Interval,
    _conflicting_alts: &AltSet,
    _configs: &AtnConfigSet,
  ) {
  }

  fn report_context_sensitivity(
    &mut self,
    _decision: usize,
    _interval: Interval,
    _prediction: u32,
    _configs: &AtnConfigSet,
  ) {
  }
}

/// Listener that drops every event.
#[derive(Default, Clone, Copy, Debug)]
pub struct NoopDiagnosticListener;

impl DiagnosticListener for NoopDiagnosticListener {}
