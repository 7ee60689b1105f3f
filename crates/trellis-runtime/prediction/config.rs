use std::{
  collections::hash_map::DefaultHasher,
  hash::{Hash, Hasher},
  sync::Arc,
};

use crate::{
  atn::AtnState,
  context::{contexts_equal, SharedContext},
  lexer::LexerActionExecutor,
  prediction::{SemanticContext, SharedSemanticContext},
};

/// Bit of `reaches_into_outer_context` marking configurations the
/// precedence filter must not drop. Stolen from the top of the depth
/// counter so the field stays one word, as the depth never gets anywhere
/// near it.
const SUPPRESS_PRECEDENCE_FILTER: u32 = 0x4000_0000;

/// One point of progress through the ATN: a state, the alternative whose
/// subgraph it sits in, the call-stack suffixes it was reached under, and
/// the semantic predicates collected on the way.
#[derive(Clone, Debug)]
pub struct AtnConfig {
  pub state: usize,
  pub alt:   u32,
  pub context: SharedContext,
  pub semantic_context: SharedSemanticContext,

  /// Depth counter of rule exits past the decision entry rule, with the
  /// suppression flag folded into the high bit.
  reaches_into_outer_context: u32,

  /// Actions accumulated along this path (lexer simulation only).
  pub lexer_executor: Option<Arc<LexerActionExecutor>>,
  /// Set once the path traverses a non-greedy decision state (lexer
  /// simulation only).
  pub passed_through_non_greedy: bool,
}

impl AtnConfig {
  pub fn new(state: usize, alt: u32, context: SharedContext) -> Self {
    Self::with_semantic_context(state, alt, context, SemanticContext::none())
  }

  pub fn with_semantic_context(
    state: usize,
    alt: u32,
    context: SharedContext,
    semantic_context: SharedSemanticContext,
  ) -> Self {
    Self {
      state,
      alt,
      context,
      semantic_context,
      reaches_into_outer_context: 0,
      lexer_executor: None,
      passed_through_non_greedy: false,
    }
  }

  // Derivation helpers used by closure: same configuration, moved to a new
  // state and optionally rewritten context or predicate.

  pub fn transform(&self, state: usize) -> Self {
    let mut next = self.clone();
    next.state = state;
    next
  }

  pub fn transform_with_context(&self, state: usize, context: SharedContext) -> Self {
    let mut next = self.transform(state);
    next.context = context;
    next
  }

  pub fn transform_with_semantic_context(
    &self,
    state: usize,
    semantic_context: SharedSemanticContext,
  ) -> Self {
    let mut next = self.transform(state);
    next.semantic_context = semantic_context;
    next
  }

  pub fn with_context(&self, context: SharedContext) -> Self {
    let mut next = self.clone();
    next.context = context;
    next
  }

  /// Lexer derivation: tracks passage through non-greedy decisions and
  /// drops into the target state.
  pub fn lexer_transform(&self, target: &AtnState) -> Self {
    let mut next = self.transform(target.number);
    next.passed_through_non_greedy = self.passed_through_non_greedy || target.is_non_greedy();
    next
  }

  pub fn lexer_transform_with_executor(
    &self,
    target: &AtnState,
    executor: Arc<LexerActionExecutor>,
  ) -> Self {
    let mut next = self.lexer_transform(target);
    next.lexer_executor = Some(executor);
    next
  }

  /// Number of times closure popped out of the decision's entry rule while
  /// producing this configuration.
  pub fn outer_context_depth(&self) -> u32 {
    self.reaches_into_outer_context & !SUPPRESS_PRECEDENCE_FILTER
  }

  pub fn increment_outer_context_depth(&mut self) {
    self.reaches_into_outer_context += 1;
  }

  pub fn is_precedence_filter_suppressed(&self) -> bool {
    self.reaches_into_outer_context & SUPPRESS_PRECEDENCE_FILTER != 0
  }

  pub fn set_precedence_filter_suppressed(&mut self, suppressed: bool) {
    if suppressed {
      self.reaches_into_outer_context |= SUPPRESS_PRECEDENCE_FILTER;
    } else {
      self.reaches_into_outer_context &= !SUPPRESS_PRECEDENCE_FILTER;
    }
  }

  /// Carries forward merge bookkeeping when an equal-keyed configuration
  /// is folded into this one.
  pub fn absorb(&mut self, other: &AtnConfig, merged_context: SharedContext) {
    self.reaches_into_outer_context = (self.outer_context_depth().max(other.outer_context_depth()))
      | (((self.is_precedence_filter_suppressed() || other.is_precedence_filter_suppressed()) as u32)
        * SUPPRESS_PRECEDENCE_FILTER);
    self.context = merged_context;
  }

  pub fn config_hash(&self) -> u64 {
    let mut h = DefaultHasher::new();
    self.hash(&mut h);
    h.finish()
  }
}

impl PartialEq for AtnConfig {
  fn eq(&self, other: &Self) -> bool {
    self.state == other.state
      && self.alt == other.alt
      && contexts_equal(&self.context, &other.context)
      && *self.semantic_context == *other.semantic_context
      && self.is_precedence_filter_suppressed() == other.is_precedence_filter_suppressed()
      && self.passed_through_non_greedy == other.passed_through_non_greedy
      && self.lexer_executor == other.lexer_executor
  }
}

impl Eq for AtnConfig {}

impl Hash for AtnConfig {
  fn hash<H: Hasher>(&self, state: &mut H) {
    self.state.hash(state);
    self.alt.hash(state);
    state.write_u64(self.context.cached_hash());
    self.semantic_context.hash(state);
    self.is_precedence_filter_suppressed().hash(state);
    self.passed_through_non_greedy.hash(state);
    self.lexer_executor.hash(state);
  }
}

impl std::fmt::Display for AtnConfig {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "({},{},{}", self.state, self.alt, self.context)?;
    if !self.semantic_context.is_none() {
      write!(f, ",{:?}", self.semantic_context)?;
    }
    if self.outer_context_depth() > 0 {
      write!(f, ",up={}", self.outer_context_depth())?;
    }
    f.write_str(")")
  }
}
