use std::sync::Arc;

use log::Logger;
use time::Duration;

use crate::clock::Clock;
use crate::db::Db;
use crate::gate::Gatekeeper;
use crate::urls::Urls;

/// Everything a request handler needs, cheap to clone into each route.
#[derive(Clone)]
pub struct Environment {
    pub logger: Arc<Logger>,
    pub db: Arc<dyn Db + Send + Sync>,
    pub urls: Arc<Urls>,
    pub clock: Arc<dyn Clock>,
    pub gatekeeper: Arc<Gatekeeper>,
    pub config: Config,
}

impl Environment {
    pub fn new(
        logger: Arc<Logger>,
        db: Arc<dyn Db + Send + Sync>,
        urls: Arc<Urls>,
        clock: Arc<dyn Clock>,
        config: Config,
    ) -> Self {
        let gatekeeper = Arc::new(Gatekeeper::new(config.cool_down));

        Self {
            logger,
            db,
            urls,
            clock,
            gatekeeper,
            config,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    /// Minimum time between two accepted submissions by one identity.
    pub(crate) cool_down: Duration,

    /// Default look-back for the recent submissions listing.
    pub(crate) recent_window: Duration,

    /// Bearer token expected on admin routes.
    pub(crate) admin_token: String,
}

impl Config {
    pub fn new(cool_down: Duration, recent_window: Duration, admin_token: impl Into<String>) -> Self {
        Self {
            cool_down,
            recent_window,
            admin_token: admin_token.into(),
        }
    }
}
