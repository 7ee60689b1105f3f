//! Collection aliases. Deterministic iteration matters in a few places
//! (DFA state numbering, debug output), so ordered variants are spelled out
//! at the use site instead of hiding behind one generic map type.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

pub type Map<K, V> = HashMap<K, V>;
pub type Set<K> = HashSet<K>;
pub type OrderedMap<K, V> = BTreeMap<K, V>;
pub type OrderedSet<K> = BTreeSet<K>;
