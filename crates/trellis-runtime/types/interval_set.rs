use std::fmt::{Display, Write};

use super::{TrellisError, TrellisResult, TOKEN_EOF, TOKEN_EPSILON};

/// A closed range of symbol values. `a` and `b` are both inclusive, so a
/// single symbol is represented as `Interval { a: s, b: s }`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Interval {
  pub a: i32,
  pub b: i32,
}

impl Interval {
  pub fn new(a: i32, b: i32) -> Self {
    Self { a, b }
  }

  pub fn contains(&self, el: i32) -> bool {
    self.a <= el && el <= self.b
  }

  /// Number of symbols covered. Zero when the interval is inverted.
  pub fn length(&self) -> usize {
    if self.b < self.a {
      0
    } else {
      (self.b - self.a + 1) as usize
    }
  }
}

/// An ordered set of non-overlapping symbol intervals.
///
/// The runtime uses these for transition labels, lookahead sets, and the
/// serialized set tables. Mutation after [`IntervalSet::set_readonly`] fails
/// with [`TrellisError::SetReadonly`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct IntervalSet {
  intervals: Vec<Interval>,
  readonly:  bool,
}

impl IntervalSet {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn of(el: i32) -> Self {
    let mut s = Self::new();
    s.add_one(el);
    s
  }

  pub fn of_range(a: i32, b: i32) -> Self {
    let mut s = Self::new();
    s.add_range(a, b);
    s
  }

  pub fn is_nil(&self) -> bool {
    self.intervals.is_empty()
  }

  pub fn size(&self) -> usize {
    self.intervals.iter().map(Interval::length).sum()
  }

  pub fn intervals(&self) -> &[Interval] {
    &self.intervals
  }

  pub fn contains(&self, el: i32) -> bool {
    // Sorted and disjoint, so a binary search on the lower bound suffices.
    match self.intervals.binary_search_by(|iv| iv.a.cmp(&el)) {
      Ok(_) => true,
      Err(0) => false,
      Err(idx) => self.intervals[idx - 1].contains(el),
    }
  }

  pub fn min_element(&self) -> Option<i32> {
    self.intervals.first().map(|iv| iv.a)
  }

  pub fn max_element(&self) -> Option<i32> {
    self.intervals.last().map(|iv| iv.b)
  }

  pub fn set_readonly(&mut self, readonly: bool) {
    self.readonly = readonly;
  }

  pub fn is_readonly(&self) -> bool {
    self.readonly
  }

  pub fn add_one(&mut self, el: i32) {
    self.add_range(el, el)
  }

  pub fn add_range(&mut self, a: i32, b: i32) {
    self.try_add_range(a, b).expect("mutated a read-only IntervalSet")
  }

  /// Inserts `[a..b]`, coalescing with any overlapping or adjacent
  /// intervals so the internal list stays sorted and disjoint.
  pub fn try_add_range(&mut self, a: i32, b: i32) -> TrellisResult<()> {
    if self.readonly {
      return Err(TrellisError::SetReadonly("IntervalSet"));
    }
    if b < a {
      return Ok(());
    }

    // Position of the first interval that could touch [a..b]. An interval
    // touches when its end reaches a - 1 (adjacency counts as touching).
    let mut idx = self.intervals.partition_point(|iv| iv.b < a.saturating_sub(1));
    let mut new = Interval::new(a, b);

    let mut removed = 0;
    while idx + removed < self.intervals.len() {
      let next = self.intervals[idx + removed];
      if next.a > b.saturating_add(1) {
        break;
      }
      new.a = new.a.min(next.a);
      new.b = new.b.max(next.b);
      removed += 1;
    }

    self.intervals.splice(idx..idx + removed, [new]);
    Ok(())
  }

  pub fn add_set(&mut self, other: &IntervalSet) {
    for iv in &other.intervals {
      self.add_range(iv.a, iv.b);
    }
  }

  pub fn union(&self, other: &IntervalSet) -> IntervalSet {
    let mut out = self.clone();
    out.readonly = false;
    out.add_set(other);
    out
  }

  /// All symbols in `[min_el..max_el]` absent from this set.
  pub fn complement(&self, min_el: i32, max_el: i32) -> IntervalSet {
    let mut vocabulary = IntervalSet::of_range(min_el, max_el);
    vocabulary.subtract_in_place(self);
    vocabulary
  }

  pub fn subtract(&self, other: &IntervalSet) -> IntervalSet {
    let mut out = self.clone();
    out.readonly = false;
    out.subtract_in_place(other);
    out
  }

  fn subtract_in_place(&mut self, other: &IntervalSet) {
    let mut result = Vec::with_capacity(self.intervals.len());
    let mut rhs = other.intervals.iter().copied().peekable();

    for mut iv in self.intervals.iter().copied() {
      loop {
        match rhs.peek() {
          Some(cut) if cut.b < iv.a => {
            rhs.next();
          }
          Some(cut) if cut.a <= iv.b => {
            if cut.a > iv.a {
              result.push(Interval::new(iv.a, cut.a - 1));
            }
            if cut.b < iv.b {
              iv.a = cut.b + 1;
              // The same cut cannot reach the next interval of self twice,
              // but a later cut might still split the remainder.
              rhs.next();
              continue;
            }
            iv.a = 1;
            iv.b = 0;
            break;
          }
          _ => break,
        }
      }
      if iv.a <= iv.b {
        result.push(iv);
      }
    }

    self.intervals = result;
  }
}

impl Display for IntervalSet {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    if self.is_nil() {
      return f.write_str("{}");
    }
    let multi = self.size() > 1;
    if multi {
      f.write_char('{')?;
    }
    for (i, iv) in self.intervals.iter().enumerate() {
      if i > 0 {
        f.write_str(", ")?;
      }
      match (iv.a, iv.b) {
        (a, b) if a == b => write_symbol(f, a)?,
        (a, b) => {
          write_symbol(f, a)?;
          f.write_str("..")?;
          write_symbol(f, b)?;
        }
      }
    }
    if multi {
      f.write_char('}')?;
    }
    Ok(())
  }
}

fn write_symbol(f: &mut std::fmt::Formatter<'_>, s: i32) -> std::fmt::Result {
  match s {
    TOKEN_EOF => f.write_str("<EOF>"),
    TOKEN_EPSILON => f.write_str("<epsilon>"),
    s => write!(f, "{s}"),
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn ranges_coalesce_when_overlapping_or_adjacent() {
    let mut set = IntervalSet::new();
    set.add_range(10, 20);
    set.add_range(22, 30);
    assert_eq!(set.intervals().len(), 2);

    set.add_one(21);
    assert_eq!(set.intervals(), &[Interval::new(10, 30)]);

    set.add_range(5, 12);
    assert_eq!(set.intervals(), &[Interval::new(5, 30)]);
  }

  #[test]
  fn contains_uses_interval_bounds() {
    let set = IntervalSet::of_range(97, 122);
    assert!(set.contains(97));
    assert!(set.contains(110));
    assert!(set.contains(122));
    assert!(!set.contains(96));
    assert!(!set.contains(123));
  }

  #[test]
  fn complement_covers_vocabulary_gaps() {
    let mut set = IntervalSet::new();
    set.add_range(5, 9);
    set.add_one(12);

    let comp = set.complement(1, 15);
    assert!(comp.contains(1));
    assert!(comp.contains(4));
    assert!(!comp.contains(5));
    assert!(!comp.contains(9));
    assert!(comp.contains(10));
    assert!(comp.contains(11));
    assert!(!comp.contains(12));
    assert!(comp.contains(15));
  }

  #[test]
  fn subtraction_splits_intervals() {
    let whole = IntervalSet::of_range(0, 100);
    let cut = IntervalSet::of_range(40, 60);
    let result = whole.subtract(&cut);
    assert_eq!(result.intervals(), &[Interval::new(0, 39), Interval::new(61, 100)]);
  }

  #[test]
  fn readonly_sets_reject_mutation() {
    let mut set = IntervalSet::of(3);
    set.set_readonly(true);
    assert!(matches!(set.try_add_range(4, 5), Err(TrellisError::SetReadonly(_))));
  }
}
