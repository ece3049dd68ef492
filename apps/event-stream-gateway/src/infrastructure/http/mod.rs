//! Public HTTP Surface
//!
//! Axum router and handlers for the stream API, documentation routes, and
//! the schema repository proxy.

mod docs;
mod error;
mod headers;
mod schema;
mod server;
mod stream;

pub use docs::{has_query_flag, render_doc};
pub use error::{ApiError, Problem};
pub use headers::HeaderPolicy;
pub use schema::{CachedSchema, SchemaProxy, is_valid_schema_path};
pub use server::{
    AppState, GatewayServer, HttpServerError, HttpSettings, SCHEMA_ROUTE, create_router,
};
pub use stream::{CLIENT_IP_HEADER, LAST_EVENT_ID_HEADER, StreamQuery, parse_since};
