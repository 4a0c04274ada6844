pub mod cache;
pub mod reconciler;

pub use cache::StandingsCache;
pub use reconciler::{ReconciliationStatus, Reconciler, StandingsSettings};
