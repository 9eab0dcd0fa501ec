//! # Duplex Client
//!
//! Drives a local store through a sync with one remote replica.
//!
//! ```rust,ignore
//! use duplex_client::{HttpConfig, HttpTransport, ProgressReporter, SyncOutcome, SyncSession};
//!
//! let transport = HttpTransport::new(
//!     HttpConfig::new("http://localhost:3000").with_credentials("alice", "s3cret"),
//! )?;
//! let session = SyncSession::new(store, transport);
//! match session.sync(&ProgressReporter::new()).await? {
//!     SyncOutcome::Completed(report) => println!("pushed {}", report.pushed),
//!     SyncOutcome::Conflicts(conflicts) => {
//!         for conflict in &conflicts {
//!             session.resolve_conflict_local_wins(conflict.identity()).await?;
//!         }
//!     }
//! }
//! ```
//!
//! Transports are interchangeable: [`DirectTransport`] calls a
//! [`duplex_engine::SyncHost`] in process, [`HttpTransport`] talks to a
//! `duplex-server`.

pub mod config;
pub mod error;
pub mod http;
pub mod progress;
pub mod session;
pub mod transport;

pub use config::{HttpConfig, SyncConfig};
pub use error::{Error, Result};
pub use http::HttpTransport;
pub use progress::{CancelToken, Progress, ProgressReporter, Stage};
pub use session::{PullSummary, SyncOutcome, SyncReport, SyncSession};
pub use transport::{DirectTransport, Transport};
