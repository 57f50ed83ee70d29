//! Stateless HTTP access to the node and wallet REST interfaces.
//!
//! [`HttpExecutor`] issues single-shot calls with basic auth, optional rate
//! limiting and a fixed status mapping (2xx decoded, 404 as `None`, anything
//! else an error). [`ResourcePath`] keeps caller data confined to template
//! slots.

mod executor;
mod path;

pub use executor::HttpExecutor;
pub use path::ResourcePath;
pub use reqwest::Method;
