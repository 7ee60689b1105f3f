use std::{
  collections::hash_map::DefaultHasher,
  hash::{Hash, Hasher},
  sync::Arc,
};

use once_cell::sync::Lazy;

use crate::recognizer::{Recognizer, RuleContext};

pub type SharedSemanticContext = Arc<SemanticContext>;

/// The always-true context every unpredicated configuration carries.
/// Reference-compared; obtain it only through [`SemanticContext::none`].
static NONE: Lazy<SharedSemanticContext> = Lazy::new(|| Arc::new(SemanticContext::None));

/// A tree of semantic predicates guarding an alternative. Built up during
/// closure when predicate transitions are collected rather than evaluated,
/// then evaluated against the recognizer once an accept state needs it.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SemanticContext {
  /// Always true.
  None,
  Predicate {
    rule_index:       usize,
    pred_index:       usize,
    is_ctx_dependent: bool,
  },
  PrecedencePredicate {
    precedence: i32,
  },
  /// All operands must hold.
  And(Vec<SharedSemanticContext>),
  /// At least one operand must hold.
  Or(Vec<SharedSemanticContext>),
}

impl SemanticContext {
  pub fn none() -> SharedSemanticContext {
    NONE.clone()
  }

  pub fn predicate(rule_index: usize, pred_index: usize, is_ctx_dependent: bool) -> SharedSemanticContext {
    Arc::new(SemanticContext::Predicate { rule_index, pred_index, is_ctx_dependent })
  }

  pub fn precedence(precedence: i32) -> SharedSemanticContext {
    Arc::new(SemanticContext::PrecedencePredicate { precedence })
  }

  pub fn is_none(&self) -> bool {
    matches!(self, SemanticContext::None)
  }

  /// `a ∧ b` with simplification: NONE is the identity, nested ANDs
  /// flatten, duplicate operands collapse, and of several precedence
  /// predicates only the weakest (minimum) survives.
  pub fn and(a: &SharedSemanticContext, b: &SharedSemanticContext) -> SharedSemanticContext {
    if a.is_none() {
      return b.clone();
    }
    if b.is_none() {
      return a.clone();
    }

    let mut operands = Vec::new();
    collect_operands(a, true, &mut operands);
    collect_operands(b, true, &mut operands);
    let operands = reduce_precedence_operands(operands, |best, next| next < best);

    match operands.len() {
      1 => operands.into_iter().next().expect("nonempty"),
      _ => Arc::new(SemanticContext::And(operands)),
    }
  }

  /// `a ∨ b` with simplification: NONE annihilates, nested ORs flatten,
  /// duplicates collapse, and only the strongest (maximum) precedence
  /// predicate survives.
  pub fn or(a: &SharedSemanticContext, b: &SharedSemanticContext) -> SharedSemanticContext {
    if a.is_none() || b.is_none() {
      return SemanticContext::none();
    }

    let mut operands = Vec::new();
    collect_operands(a, false, &mut operands);
    collect_operands(b, false, &mut operands);
    let operands = reduce_precedence_operands(operands, |best, next| next > best);

    match operands.len() {
      1 => operands.into_iter().next().expect("nonempty"),
      _ => Arc::new(SemanticContext::Or(operands)),
    }
  }

  /// Evaluates the tree against the recognizer. `And` stops at the first
  /// false operand, `Or` at the first true one.
  pub fn eval(&self, recognizer: &mut dyn Recognizer, ctx: Option<&Arc<RuleContext>>) -> bool {
    match self {
      SemanticContext::None => true,
      SemanticContext::Predicate { rule_index, pred_index, is_ctx_dependent } => {
        let pred_ctx = if *is_ctx_dependent { ctx } else { None };
        recognizer.sempred(pred_ctx, *rule_index, *pred_index)
      }
      SemanticContext::PrecedencePredicate { precedence } => recognizer.precpred(ctx, *precedence),
      SemanticContext::And(operands) => operands.iter().all(|op| op.eval(recognizer, ctx)),
      SemanticContext::Or(operands) => operands.iter().any(|op| op.eval(recognizer, ctx)),
    }
  }

  /// Partial evaluation for the precedence filter: precedence predicates
  /// resolve immediately, ordinary predicates survive unchanged. Returns
  /// `None` when the tree is known false, the NONE context when known
  /// true. Every `Or` operand is evaluated so each one gets simplified,
  /// even after the result is already known true.
  pub fn eval_precedence(
    this: &SharedSemanticContext,
    recognizer: &mut dyn Recognizer,
    ctx: Option<&Arc<RuleContext>>,
  ) -> Option<SharedSemanticContext> {
    match &**this {
      SemanticContext::PrecedencePredicate { precedence } => {
        if recognizer.precpred(ctx, *precedence) {
          Some(SemanticContext::none())
        } else {
          None
        }
      }
      SemanticContext::And(operands) => {
        let mut differs = false;
        let mut remaining = Vec::new();
        for op in operands {
          let evaluated = SemanticContext::eval_precedence(op, recognizer, ctx)?;
          differs |= !Arc::ptr_eq(&evaluated, op);
          if !evaluated.is_none() {
            remaining.push(evaluated);
          }
        }
        if !differs {
          return Some(this.clone());
        }
        if remaining.is_empty() {
          return Some(SemanticContext::none());
        }
        let mut result = remaining[0].clone();
        for op in &remaining[1..] {
          result = SemanticContext::and(&result, op);
        }
        Some(result)
      }
      SemanticContext::Or(operands) => {
        let mut differs = false;
        let mut known_true = false;
        let mut remaining = Vec::new();
        for op in operands {
          match SemanticContext::eval_precedence(op, recognizer, ctx) {
            Some(evaluated) => {
              differs |= !Arc::ptr_eq(&evaluated, op);
              known_true |= evaluated.is_none();
              if !evaluated.is_none() {
                remaining.push(evaluated);
              }
            }
            None => differs = true,
          }
        }
        if known_true {
          return Some(SemanticContext::none());
        }
        if !differs {
          return Some(this.clone());
        }
        if remaining.is_empty() {
          return None;
        }
        let mut result = remaining[0].clone();
        for op in &remaining[1..] {
          result = SemanticContext::or(&result, op);
        }
        Some(result)
      }
      _ => Some(this.clone()),
    }
  }
}

fn collect_operands(
  ctx: &SharedSemanticContext,
  conjunction: bool,
  out: &mut Vec<SharedSemanticContext>,
) {
  match (&**ctx, conjunction) {
    (SemanticContext::And(ops), true) | (SemanticContext::Or(ops), false) => {
      for op in ops {
        collect_operands(op, conjunction, out);
      }
    }
    _ => {
      if !out.iter().any(|existing| **existing == **ctx) {
        out.push(ctx.clone());
      }
    }
  }
}

/// Keeps every ordinary operand but reduces all precedence predicates to
/// the single winner chosen by `prefer`, then orders operands canonically
/// so structurally equal trees compare and hash equal.
fn reduce_precedence_operands(
  operands: Vec<SharedSemanticContext>,
  prefer: impl Fn(i32, i32) -> bool,
) -> Vec<SharedSemanticContext> {
  let mut best: Option<i32> = None;
  let mut rest = Vec::new();
  for op in operands {
    match &*op {
      SemanticContext::PrecedencePredicate { precedence } => match best {
        Some(current) if !prefer(current, *precedence) => {}
        _ => best = Some(*precedence),
      },
      _ => rest.push(op),
    }
  }
  if let Some(precedence) = best {
    rest.push(SemanticContext::precedence(precedence));
  }
  rest.sort_by_key(|op| {
    let mut h = DefaultHasher::new();
    op.hash(&mut h);
    h.finish()
  });
  rest.dedup_by(|a, b| **a == **b);
  rest
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn none_is_and_identity_and_or_annihilator() {
    let p = SemanticContext::predicate(1, 0, false);
    assert_eq!(*SemanticContext::and(&SemanticContext::none(), &p), *p);
    assert_eq!(*SemanticContext::and(&p, &SemanticContext::none()), *p);
    assert!(SemanticContext::or(&p, &SemanticContext::none()).is_none());
  }

  #[test]
  fn nested_operands_flatten_and_dedupe() {
    let p = SemanticContext::predicate(1, 0, false);
    let q = SemanticContext::predicate(2, 0, false);
    let r = SemanticContext::predicate(3, 1, true);

    let pq = SemanticContext::and(&p, &q);
    let pqr = SemanticContext::and(&pq, &r);
    let SemanticContext::And(ops) = &*pqr else { panic!("expected And") };
    assert_eq!(ops.len(), 3);

    let again = SemanticContext::and(&pqr, &q);
    assert_eq!(*again, *pqr);
  }

  #[test]
  fn and_keeps_minimum_precedence_or_keeps_maximum() {
    let lo = SemanticContext::precedence(2);
    let hi = SemanticContext::precedence(7);
    assert_eq!(
      *SemanticContext::and(&lo, &hi),
      SemanticContext::PrecedencePredicate { precedence: 2 }
    );
    assert_eq!(
      *SemanticContext::or(&lo, &hi),
      SemanticContext::PrecedencePredicate { precedence: 7 }
    );
  }

  #[test]
  fn operand_order_is_canonical() {
    let p = SemanticContext::predicate(1, 0, false);
    let q = SemanticContext::predicate(2, 0, false);
    assert_eq!(*SemanticContext::and(&p, &q), *SemanticContext::and(&q, &p));
    assert_eq!(*SemanticContext::or(&p, &q), *SemanticContext::or(&q, &p));
  }

  struct FixedPrecedence(i32);

  impl Recognizer for FixedPrecedence {
    fn sempred(&mut self, _: Option<&Arc<RuleContext>>, _: usize, _: usize) -> bool {
      true
    }

    fn precpred(&mut self, _: Option<&Arc<RuleContext>>, precedence: i32) -> bool {
      self.0 < precedence
    }

    fn action(&mut self, _: Option<&Arc<RuleContext>>, _: usize, _: usize) {}
  }

  #[test]
  fn precedence_reduction_resolves_precedence_predicates_only() {
    let mut recognizer = FixedPrecedence(3);
    let passing = SemanticContext::precedence(5);
    let failing = SemanticContext::precedence(2);
    let plain = SemanticContext::predicate(0, 0, false);

    assert!(SemanticContext::eval_precedence(&passing, &mut recognizer, None).unwrap().is_none());
    assert!(SemanticContext::eval_precedence(&failing, &mut recognizer, None).is_none());

    let mixed = SemanticContext::and(&passing, &plain);
    let reduced = SemanticContext::eval_precedence(&mixed, &mut recognizer, None).unwrap();
    assert_eq!(*reduced, *plain);

    let doomed = SemanticContext::and(&failing, &plain);
    assert!(SemanticContext::eval_precedence(&doomed, &mut recognizer, None).is_none());
  }
}
