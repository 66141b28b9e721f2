//! Catalog Directory and Catalog Discovery Service
//!
//! The directory holds an immutable snapshot of every discovered table.
//! Discovery rebuilds the snapshot from the remote catalog on an interval
//! and swaps it in whole.

pub mod descriptor;
pub mod directory;
pub mod discovery;
pub mod namespaces;

pub use descriptor::{ColumnDescriptor, SqlType, TableDescriptor};
pub use directory::{CatalogDirectory, CatalogSnapshot};
pub use discovery::{DiscoveryHandle, DiscoveryReport, DiscoveryService};
pub use namespaces::ReservedNamespaces;
