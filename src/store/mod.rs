//! The three logical stores the ingestion orchestrator and query engine
//! write to and read from (spec §4.6).
//!
//! RV (relational + vector metadata), VI (vector index), and GR (entity
//! graph) are exposed as three narrow traits so the rest of the crate
//! depends on behavior, not schema. All three are currently backed by the
//! same physical SQLite database — a deliberate simplification (see
//! `DESIGN.md`): no graph-database crate appears anywhere in the reference
//! corpus for this architecture, so GR is modeled as two ordinary tables
//! behind a traversal-shaped API instead of introducing one.

pub mod gr;
pub mod rv;
pub mod vi;

pub use gr::GrStore;
pub use rv::RvStore;
pub use vi::ViStore;
