//! groundwork-import library - CSV bulk loading of declared entities
//!
//! Discovers `<service>.csv` files, orders them parent before child from the
//! registry's associations, and imports every row through the persistence
//! gateway.

pub mod coerce;
pub mod importer;
pub mod plan;
pub mod source;

pub use importer::{CsvImporter, FileReport, ImportReport, FLUSH_EVERY};
pub use plan::{ChildLinkSpec, ImportPlan, PlannedService};
pub use source::ServiceFiles;
