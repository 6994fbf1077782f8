pub mod classifier;
pub mod config;
pub mod error;
pub mod extract;
pub mod fingerprint;
pub mod io;
pub mod matcher;
pub mod paths;
pub mod payload;
pub mod poll;
pub mod query;
pub mod reconciler;
pub mod store;
pub mod transport;
pub mod types;

pub use error::{PollError, Result, TransportError};
pub use poll::{PollFinished, Poller};
pub use store::PollStore;
