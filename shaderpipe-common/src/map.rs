use core::hash::BuildHasherDefault;
use std::collections::{HashMap, HashSet};

/// Fast hash map for the small string-keyed sets used throughout the
/// preprocessing pipeline.
pub type FastHashMap<K, V> = HashMap<K, V, BuildHasherDefault<rustc_hash::FxHasher>>;

/// Companion set type to [`FastHashMap`].
pub type FastHashSet<V> = HashSet<V, BuildHasherDefault<rustc_hash::FxHasher>>;
