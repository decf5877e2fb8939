//! redb table definitions for the autopool state store.

use redb::TableDefinition;

/// Latest pool snapshot keyed by pool name.
pub const POOLS: TableDefinition<&str, &[u8]> = TableDefinition::new("pools");

/// Scaling activities keyed by `{pool}:{seq:020}`.
pub const ACTIVITIES: TableDefinition<&str, &[u8]> = TableDefinition::new("activities");
