//! Application wiring: config, modules, router and server.
//!
//! # Example
//!
//! ```ignore
//! use koala::{App, Module, Router, Result};
//!
//! pub struct HealthModule;
//!
//! impl Module for HealthModule {
//!     fn name(&self) -> &'static str {
//!         "health"
//!     }
//!
//!     fn up(&self, router: &mut Router) -> Result<()> {
//!         let routes = vec![router.get("status", "/", |_ctx| async move {
//!             koala::response::ok(&serde_json::json!({ "status": "ok" }))
//!         })];
//!         router.add_routes("health", routes)
//!     }
//! }
//! ```

use std::sync::Arc;

use tracing::info;

use crate::cli::Args;
use crate::config::{Config, Loader, SharedConfig};
use crate::db::Pool;
use crate::router::Router;
use crate::server::{self, Server};
use crate::Result;

/// A pluggable application module.
///
/// Modules register their route groups when the application starts. State
/// can be captured in handler closures using `Arc` or similar.
pub trait Module: Send + Sync {
    /// Module name for identification and logging.
    fn name(&self) -> &'static str;

    /// Register routes, middleware maps and anything else the module needs.
    fn up(&self, router: &mut Router) -> Result<()>;
}

/// A Koala application.
pub struct App {
    config: SharedConfig,
    router: Router,
    modules: Vec<Box<dyn Module>>,
    db: Option<Pool>,
}

impl App {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
            router: Router::new(),
            modules: Vec::new(),
            db: None,
        }
    }

    /// Load the settings file named by `args` and apply the overrides.
    pub fn from_args(args: &Args) -> Result<Self> {
        let mut config = Loader::from_args(args).load()?;
        config.apply_args(args)?;
        Ok(Self::new(config))
    }

    pub fn config(&self) -> &SharedConfig {
        &self.config
    }

    pub fn set_router(&mut self, router: Router) {
        self.router = router;
    }

    pub fn router_mut(&mut self) -> &mut Router {
        &mut self.router
    }

    pub fn add_module<M: Module + 'static>(&mut self, module: M) {
        self.modules.push(Box::new(module));
    }

    pub fn add_modules<I>(&mut self, modules: I)
    where
        I: IntoIterator<Item = Box<dyn Module>>,
    {
        self.modules.extend(modules);
    }

    /// Share a database pool with every handler.
    pub fn with_db(mut self, pool: Pool) -> Self {
        self.db = Some(pool);
        self
    }

    /// Bring modules up, build the routes and start serving.
    pub async fn start(self) -> Result<Server> {
        let App {
            config,
            mut router,
            modules,
            db,
        } = self;

        info!("Starting app...");
        for module in &modules {
            module.up(&mut router)?;
            info!("Module {} is up", module.name());
        }

        router.set_debug(config.debug);
        router.set_suppress_errors(config.server.suppress_errors);
        let handle = router.start()?;

        info!("Debug: {}", config.debug);
        info!("Port: {}", config.server.port);

        server::start(config, db, handle).await
    }

    /// Serve until Ctrl-C, then shut down.
    pub async fn run(self) -> Result<()> {
        let server = self.start().await?;
        info!("On http://localhost:{}", server.addr().port());
        info!("To shut down, press <CTRL> + C.");

        tokio::signal::ctrl_c().await?;
        info!("Shutting down");
        server.shutdown().await
    }
}
