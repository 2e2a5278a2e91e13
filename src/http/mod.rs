//! HTTP/1.x protocol subsystem.
//!
//! # Data Flow
//! ```text
//! connection input pipe
//!     → parser.rs (request line, headers, body framing)
//!     → protocol.rs (one exchange at a time, keep-alive, errors)
//!     → context.rs (HttpContext handed to the Handler)
//!     → response.rs (status line + headers, automatic framing)
//!     → connection output pipe
//! ```
//!
//! # Design Decisions
//! - Header values are Latin-1; control characters are rejected everywhere
//! - The response head is written lazily, on first body write or completion
//! - Only a single byte range is honored (range.rs)

pub mod chunked;
pub mod context;
pub mod error;
pub mod handler;
pub mod headers;
pub mod parser;
pub mod protocol;
pub mod range;
pub mod request;
pub mod response;
pub mod server;

pub use context::{HttpContext, RequestBody, Response, ResponseOptions};
pub use error::{AppError, HttpError, ParseError};
pub use handler::{handler_fn, Handler, HandlerFn};
pub use headers::{HeaderError, HeaderMap};
pub use request::{RequestHead, TargetForm, Version};
pub use server::{HttpServer, ServerError, ServiceContext};
