//! Client core for the FileMaker Data API.
//!
//! # Overview
//! Builds `HttpRequest` values and parses `HttpResponse` values for every
//! Data API endpoint without touching the network (host-does-IO pattern).
//! [`Connection`] adds an async executor on top for callers that want the
//! round-trip done for them.
//!
//! # Design
//! - `DataApiClient` is stateless: it holds only a `ConnectionConfig`.
//!   Session tokens are owned by the caller and passed into each call.
//! - Each operation is split into `build_*` and `parse_*`, so the I/O
//!   boundary is explicit and every step is testable without a server.
//! - Every reply is decoded by [`envelope`]: the first message's code is
//!   authoritative, `"0"` is success, and any other code is returned
//!   verbatim as [`ApiError::Service`].
//! - DTOs are defined independently from the mock-server crate;
//!   integration tests catch schema drift.

pub mod client;
pub mod config;
pub mod container;
pub mod envelope;
pub mod error;
pub mod http;
pub mod session;
pub mod transport;
pub mod types;

pub use client::DataApiClient;
pub use config::{ConnectionConfig, Credentials};
pub use envelope::{Envelope, Message};
pub use error::{ApiError, Result};
pub use http::{HttpMethod, HttpRequest, HttpResponse};
pub use session::{Session, SessionError, SessionState, SessionToken, TransitionError};
pub use transport::{Connection, ReqwestTransport, Transport};
pub use types::{
    DataInfo, Database, FieldData, FieldMeta, FindRequest, FoundSet, GetRecords, Layout, LayoutMetadata,
    PortalDataInfo, ProductInfo, QueryGroup, Record, ScriptOutcome, Script, SortOrder, SortSpec, ValueList,
    ValueListEntry,
};
