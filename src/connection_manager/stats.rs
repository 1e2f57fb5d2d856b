//! Manager statistics

use serde::Serialize;
use std::collections::HashMap;

/// Aggregate view over every registered connection
#[derive(Debug, Clone, Default, Serialize)]
pub struct ManagerStats {
    pub total_connections: usize,
    /// Sum of reference counts across connections
    pub total_ref_count: usize,
    /// Connection count keyed by status name
    pub by_status: HashMap<String, usize>,
}
