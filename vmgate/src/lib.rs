pub mod auth;
pub mod configuration;
pub mod credentials;
pub mod errors;
pub mod gateway;
pub mod handlers;
pub mod model;
pub mod rate_limit;
pub mod session;
pub mod startup;
pub mod xapi;

use std::sync::Arc;

use crate::{auth::AdminCredentials, gateway::Gateway, rate_limit::RateLimiter};

#[derive(Clone)]
pub struct App {
    gateway: Gateway,
    admin: AdminCredentials,
    rate_limiter: Arc<RateLimiter>,
}

impl App {
    pub fn new(gateway: Gateway, admin: AdminCredentials, rate_limiter: RateLimiter) -> Self {
        Self {
            gateway,
            admin,
            rate_limiter: Arc::new(rate_limiter),
        }
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    pub fn admin(&self) -> &AdminCredentials {
        &self.admin
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }
}
