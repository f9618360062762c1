//! Canopy
//!
//! Task orchestration for HTTP transfers on top of a pluggable transport.
//!
//! Canopy does not open sockets or parse HTTP. A [`Transport`](transport::Transport)
//! does that, and reports bytes, state changes and a final outcome back through a
//! [`TransferListener`](session::TransferListener). What canopy adds on top is:
//!
//! 1. An immutable [`Request`] / [`Response`] model with builders for staging changes.
//! 2. A [`Task`] per transfer, which can be consumed with callbacks, by blocking the
//!    current thread, or by awaiting it.
//! 3. Interceptors which rewrite every request before submission and every response
//!    before delivery.
//! 4. Retry policies which re-issue a failed transfer under the same [`Task`].
//! 5. A single [`Progress`](progress::Progress) per task, merged from the transport's
//!    byte counters, whose pause/resume/cancel controls reach back into the transfer.
//!
//! # Example
//! ```no_run
//! # use canopy::{Request, Session};
//! # fn run(session: Session) -> Result<(), canopy::Error> {
//! let mut builder = Request::builder("https://api.example.com/items".parse().unwrap());
//! builder.add_url_parameter("q", "leaves");
//!
//! let task = session.fetch_task(&builder.build());
//! let response = task.blocking_consume()?;
//! println!("{}", response.text()?);
//! # Ok(())
//! # }
//! ```

#![cfg_attr(docsrs, feature(doc_auto_cfg))]

use std::fmt;
use std::future::Future;
use std::pin::Pin;

pub mod auth;
pub mod body;
pub use body::Body;
pub mod error;
pub use error::{Error, ErrorCode};
pub mod progress;
pub mod request;
pub use request::Request;
pub mod response;
pub use response::{Payload, Response};
pub mod session;
pub use session::{init, Session};
pub mod task;
pub use task::Task;
pub mod transform;
pub mod transport;

/// Boxed error type used at the transport boundary.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub(crate) type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub(crate) struct DebugLiteral<T: fmt::Display>(T);

impl<T: fmt::Display> fmt::Debug for DebugLiteral<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
