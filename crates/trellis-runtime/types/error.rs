use std::sync::Arc;

use thiserror::Error;

use crate::prediction::AtnConfigSet;

/// Alias used by all fallible runtime operations.
pub type TrellisResult<T> = Result<T, TrellisError>;

/// Every error the runtime core can produce.
///
/// Deserialization errors are fatal and surface at construction time.
/// Prediction errors surface to the caller, which is expected to hand them
/// to an error-recovery strategy; the core performs no recovery of its own.
#[derive(Error, Debug, Clone)]
pub enum TrellisError {
  /// Adaptive prediction exhausted its options at a decision point.
  #[error("no viable alternative at input index {start_index} (decision {decision})")]
  NoViableAlt {
    decision:    usize,
    configs:     Arc<AtnConfigSet>,
    start_index: usize,
    /// State number of the outer invocation context, if one was supplied.
    outer_context_state: Option<usize>,
  },

  /// No lexer rule matched at the given position.
  #[error("no viable token at input index {start_index} in mode {mode}")]
  LexerNoViableAlt {
    start_index: usize,
    mode:        usize,
    configs:     Arc<AtnConfigSet>,
  },

  /// The expected symbol set disagreed with the lookahead.
  #[error("mismatched input: found token type {found}, expected {expected}")]
  InputMismatch { found: i32, expected: String },

  /// The serialized automaton carries an unknown format version.
  #[error("unsupported serialized ATN version {found} (expected {expected})")]
  UnsupportedVersion { found: u16, expected: u16 },

  /// The serialized automaton carries a feature-revision id this runtime
  /// does not accept.
  #[error("unsupported serialized ATN revision {uuid}")]
  UnsupportedUuid { uuid: uuid::Uuid },

  /// A structural invariant failed while decoding or verifying an ATN.
  #[error("corrupted ATN: {0}")]
  CorruptedAtn(String),

  /// Mutation of a frozen configuration set or interval set.
  #[error("attempted to modify a read-only {0}")]
  SetReadonly(&'static str),

  /// A capability the current variant does not provide.
  #[error("unsupported operation: {0}")]
  UnsupportedOperation(&'static str),

  /// Internal invariant violated; fatal to the current prediction.
  #[error("illegal state: {0}")]
  IllegalState(String),
}

impl TrellisError {
  /// The mismatch error an error strategy raises when lookahead is not in
  /// the expected set (usually computed via `Atn::expected_tokens`).
  pub fn input_mismatch(found: i32, expected: &crate::types::IntervalSet) -> Self {
    TrellisError::InputMismatch { found, expected: expected.to_string() }
  }

  /// True when the error should abort automaton construction rather than a
  /// single prediction.
  pub fn is_construction_error(&self) -> bool {
    matches!(
      self,
      TrellisError::UnsupportedVersion { .. }
        | TrellisError::UnsupportedUuid { .. }
        | TrellisError::CorruptedAtn(..)
    )
  }
}
