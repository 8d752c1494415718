//! Koala - toolkit for building JSON web applications.
//!
//! Koala bundles the pieces a small web backend keeps rewriting:
//!
//! - **Config**: YAML settings with `{{ env "NAME" "default" }}` expansion
//! - **Router**: Route groups with tokens, per-route middleware chains
//! - **Server**: Hyper-based HTTP server
//! - **Auth**: Users, password strategies, JWT and cookie sessions
//! - **Database**: libsql pool, named-parameter queries, criteria, migrations
//! - **Validate**: Argument validators collected into one error
//!
//! # Example
//!
//! ```ignore
//! use clap::Parser;
//! use koala::{App, Module, Router};
//!
//! struct Hello;
//!
//! impl Module for Hello {
//!     fn name(&self) -> &'static str { "hello" }
//!
//!     fn up(&self, router: &mut Router) -> koala::Result<()> {
//!         let routes = vec![router.get("index", "/", |_ctx| async move {
//!             koala::response::ok(&koala::json!({ "message": "Hello!" }))
//!         })];
//!         router.add_routes("hello", routes)
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> koala::Result<()> {
//!     let args = koala::cli::Args::parse();
//!     let mut app = App::from_args(&args)?;
//!     koala::logging::init(app.config().debug);
//!
//!     app.add_module(Hello);
//!     app.run().await
//! }
//! ```

pub mod app;
pub mod auth;
pub mod cli;
pub mod config;
pub mod criteria;
pub mod db;
pub mod error;
pub mod jwt;
pub mod logging;
pub mod middleware;
pub mod migration;
pub mod response;
pub mod router;
pub mod server;
pub mod session;
pub mod template;
pub mod token;
pub mod validate;

// Re-export main types at crate root
pub use app::{App, Module};
pub use auth::UserDetails;
pub use config::{Config, Loader, SharedConfig};
pub use criteria::Criteria;
pub use db::Pool;
pub use error::{Error, Result};
pub use middleware::{MiddlewareManager, MiddlewareMapper};
pub use router::{Context, Route, Router};
pub use template::Template;
pub use token::Token;

// Re-export commonly used dependencies for convenience
pub use hyper::Method;
pub use serde_json::json;
