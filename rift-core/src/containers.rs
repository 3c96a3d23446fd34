//! Container choices for hot-path tables.
//!
//! Command-table and keyspace lookups sit on the request path, so the map implementation is
//! picked once here instead of being named at every use site.

use hashbrown::HashMap;

/// Hash map used for request-path lookup tables.
pub type FastMap<K, V> = HashMap<K, V>;
