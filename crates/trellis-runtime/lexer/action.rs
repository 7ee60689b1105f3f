use std::sync::Arc;

use crate::{recognizer::LexerHost, streams::CharStream};

/// A single side effect attached to a lexer rule. Actions run only after a
/// token has definitively matched, in declaration order.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum LexerAction {
  /// `-> channel(n)`
  Channel { channel: i32 },
  /// An embedded `{ ... }` action, dispatched through the recognizer.
  Custom { rule_index: usize, action_index: usize },
  /// `-> mode(m)`
  Mode { mode: usize },
  /// `-> more`
  More,
  /// `-> popMode`
  PopMode,
  /// `-> pushMode(m)`
  PushMode { mode: usize },
  /// `-> skip`
  Skip,
  /// `-> type(t)`
  Type { token_type: i32 },
  /// Wrapper produced by [`LexerActionExecutor::fix_offset_before_match`]:
  /// runs `action` with the stream seeked to `offset` characters past the
  /// token start.
  Indexed { offset: usize, action: Box<LexerAction> },
}

impl LexerAction {
  /// Position-dependent actions observe the stream cursor and must run at
  /// the exact offset they were encountered at.
  pub fn is_position_dependent(&self) -> bool {
    match self {
      LexerAction::Custom { .. } => true,
      LexerAction::Indexed { action, .. } => action.is_position_dependent(),
      _ => false,
    }
  }

  fn execute(&self, lexer: &mut dyn LexerHost) {
    match self {
      LexerAction::Channel { channel } => lexer.set_channel(*channel),
      LexerAction::Custom { rule_index, action_index } => {
        lexer.action(None, *rule_index, *action_index)
      }
      LexerAction::Mode { mode } => lexer.set_mode(*mode),
      LexerAction::More => lexer.more(),
      LexerAction::PopMode => lexer.pop_mode(),
      LexerAction::PushMode { mode } => lexer.push_mode(*mode),
      LexerAction::Skip => lexer.skip(),
      LexerAction::Type { token_type } => lexer.set_token_type(*token_type),
      LexerAction::Indexed { action, .. } => action.execute(lexer),
    }
  }
}

/// An immutable ordered list of lexer actions. Executors ride on lexer ATN
/// configurations and accept states, so they participate in equality and
/// hashing.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct LexerActionExecutor {
  actions: Vec<LexerAction>,
}

impl LexerActionExecutor {
  pub fn new(actions: Vec<LexerAction>) -> Arc<Self> {
    Arc::new(Self { actions })
  }

  pub fn actions(&self) -> &[LexerAction] {
    &self.actions
  }

  /// Returns an executor with `action` appended. Used when one alternative
  /// passes through several action transitions before accepting.
  pub fn append(existing: Option<&Arc<Self>>, action: LexerAction) -> Arc<Self> {
    let mut actions = existing.map(|e| e.actions.clone()).unwrap_or_default();
    actions.push(action);
    Arc::new(Self { actions })
  }

  /// Wraps every position-dependent action in an [`LexerAction::Indexed`]
  /// recording the current match offset. Called when a configuration with
  /// actions survives past its accept position, so a later `execute` can
  /// still replay each action at the stream position it was seen at.
  pub fn fix_offset_before_match(this: &Arc<Self>, offset: usize) -> Arc<Self> {
    let mut updated: Option<Vec<LexerAction>> = None;
    for (i, action) in this.actions.iter().enumerate() {
      if action.is_position_dependent() && !matches!(action, LexerAction::Indexed { .. }) {
        updated
          .get_or_insert_with(|| this.actions.clone())
          .splice(i..=i, [LexerAction::Indexed { offset, action: Box::new(action.clone()) }]);
      }
    }
    match updated {
      Some(actions) => Arc::new(Self { actions }),
      None => Arc::clone(this),
    }
  }

  /// Runs the actions. `start_index` is the index of the first character of
  /// the matched token; the stream cursor is restored afterwards if any
  /// indexed action moved it.
  pub fn execute(
    &self,
    lexer: &mut dyn LexerHost,
    input: &mut dyn CharStream,
    start_index: usize,
  ) {
    let stop_index = input.index();
    let mut requires_seek = false;

    for action in &self.actions {
      match action {
        LexerAction::Indexed { offset, action } => {
          input.seek(start_index + offset);
          requires_seek = start_index + offset != stop_index;
          action.execute(lexer);
        }
        action if action.is_position_dependent() => {
          input.seek(stop_index);
          requires_seek = false;
          action.execute(lexer);
        }
        action => action.execute(lexer),
      }
    }

    if requires_seek {
      input.seek(stop_index);
    }
  }
}
