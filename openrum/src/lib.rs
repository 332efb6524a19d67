//! openrum is a client-side real-user-monitoring agent.
//!
//! Applications embed it to record a hierarchical trace of user sessions —
//! actions, reported values, events, errors, crashes and traced web
//! requests — and to transmit those traces to a collector over HTTP in the
//! beacon wire format.
//!
//! # Overview
//!
//! - [`OpenKit`] is the root object: one per application, built with
//!   [`OpenKit::builder`]. It owns the background sender thread and the
//!   cache evictor.
//! - [`Session`] records one user visit. Sessions hand out [`RootAction`]s,
//!   which hand out nested [`Action`]s and [`WebRequestTracer`]s.
//! - Everything reported is gated by the operator's privacy settings
//!   ([`DataCollectionLevel`], [`CrashReportingLevel`]) and by the
//!   collector's capture and traffic-control configuration, serialized into
//!   the wire format, buffered in a bounded in-memory cache, and shipped in
//!   chunks by a background worker.
//!
//! The agent never raises an error into the host application: invalid input
//! degrades to no-op objects, transport failures are retried, and the only
//! user-visible failure is an oversized custom-event payload.
//!
//! # Example
//!
//! ```no_run
//! use openrum::OpenKit;
//!
//! let openkit = OpenKit::builder("https://collector.example.com/mbeacon", "APP-ID", 42)
//!     .with_application_version("1.2.3")
//!     .build()
//!     .expect("valid configuration");
//!
//! let session = openkit.create_session();
//! session.identify_user("jane.doe");
//!
//! let action = session.enter_action("load dashboard");
//! action.report_int_value("widgets", 12);
//! action.leave_action();
//!
//! session.end();
//! openkit.shutdown();
//! ```

#![warn(missing_docs)]

mod beacon;
mod http;
mod lifecycle;
mod openkit;
mod worker;

pub use openrum_config::{
    CacheConfig, ConfigError, CrashReportingLevel, DataCollectionLevel, HttpClientConfig,
    PrivacyConfig, ServerConfig, WatchdogConfig,
};
pub use openrum_protocol::payload::EventPayloadError;
pub use openrum_protocol::ResponseAttributes;

pub use crate::http::{
    HttpClient, HttpClientProvider, HttpError, ReqwestHttpClient, ReqwestHttpClientProvider,
    StatusResponse,
};
pub use crate::lifecycle::{Action, RootAction, Session, WebRequestTracer};
pub use crate::openkit::{OpenKit, OpenKitBuilder};
