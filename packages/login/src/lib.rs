//! Login pages of an identity provider's `core` module.
//!
//! [`controller::Login`] implements the pages (welcome, logout, the
//! username/password forms and clearing of discovery choices) as pure
//! request-to-response functions. [`http`] serves them over axum.

pub mod config;
pub mod controller;
pub mod error;
pub mod http;
pub mod request;
pub mod response;
pub mod source;
pub mod state;
pub mod url_check;

pub use config::LoginConfig;
pub use controller::Login;
pub use error::{LoginError, Result};
pub use request::LoginRequest;
pub use response::{Completion, DeferredAction, Response, Template};
pub use source::{AuthSource, AuthSourceRegistry, Source, SourceMap};
pub use state::{AuthState, AuthStateStore, MemoryStateStore};
pub use url_check::UrlAllowList;
