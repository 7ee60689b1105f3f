use super::{TOKEN_EOF, TOKEN_EPSILON, TOKEN_INVALID_TYPE};

/// Display names for token types, used by debug rendering and error
/// text. Literal names ('+', 'while') win over symbolic names (PLUS,
/// WHILE); types with neither render as their number.
#[derive(Clone, Debug, Default)]
pub struct Vocabulary {
  literal_names:  Vec<Option<String>>,
  symbolic_names: Vec<Option<String>>,
}

impl Vocabulary {
  pub fn new(literal_names: Vec<Option<String>>, symbolic_names: Vec<Option<String>>) -> Self {
    Self { literal_names, symbolic_names }
  }

  /// Builds a vocabulary with symbolic names only, indexed from token
  /// type 1.
  pub fn from_symbolic(names: impl IntoIterator<Item = impl Into<String>>) -> Self {
    let mut symbolic_names = vec![None];
    symbolic_names.extend(names.into_iter().map(|n| Some(n.into())));
    Self { literal_names: Vec::new(), symbolic_names }
  }

  pub fn max_token_type(&self) -> i32 {
    self.literal_names.len().max(self.symbolic_names.len()) as i32 - 1
  }

  pub fn literal_name(&self, token_type: i32) -> Option<&str> {
    usize::try_from(token_type)
      .ok()
      .and_then(|t| self.literal_names.get(t))
      .and_then(Option::as_deref)
  }

  pub fn symbolic_name(&self, token_type: i32) -> Option<&str> {
    usize::try_from(token_type)
      .ok()
      .and_then(|t| self.symbolic_names.get(t))
      .and_then(Option::as_deref)
  }

  pub fn display_name(&self, token_type: i32) -> String {
    match token_type {
      TOKEN_EOF => "<EOF>".to_string(),
      TOKEN_EPSILON => "<epsilon>".to_string(),
      TOKEN_INVALID_TYPE => "<INVALID>".to_string(),
      t => self
        .literal_name(t)
        .or_else(|| self.symbolic_name(t))
        .map(str::to_string)
        .unwrap_or_else(|| t.to_string()),
    }
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn literal_names_win_over_symbolic() {
    let vocab = Vocabulary::new(
      vec![None, Some("'+'".into())],
      vec![None, Some("PLUS".into()), Some("INT".into())],
    );
    assert_eq!(vocab.display_name(1), "'+'");
    assert_eq!(vocab.display_name(2), "INT");
    assert_eq!(vocab.display_name(3), "3");
    assert_eq!(vocab.display_name(TOKEN_EOF), "<EOF>");
    assert_eq!(vocab.max_token_type(), 2);
  }

  #[test]
  fn symbolic_only_vocabulary_indexes_from_one() {
    let vocab = Vocabulary::from_symbolic(["A", "B"]);
    assert_eq!(vocab.display_name(1), "A");
    assert_eq!(vocab.display_name(2), "B");
    assert_eq!(vocab.literal_name(1), None);
  }
}
