pub mod cache;
pub mod error;
pub mod history;
pub mod lookup;
pub mod rpc;
pub mod script;
pub mod tasks;
#[cfg(test)]
pub(crate) mod test_util;
pub mod token;
pub mod transport;
pub mod types;

pub use error::CoreError;
pub use history::{HistoryReconciler, ReconcilerConfig};
