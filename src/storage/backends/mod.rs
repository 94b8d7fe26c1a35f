//! Storage backend implementations

pub mod loader;
pub mod memory;

pub use loader::{load_cluster, read_customers, read_invoice_lines, ClusterLayout, InvoiceLine};
pub use memory::{partition_for, ClusterBuilder, InMemoryCluster};
