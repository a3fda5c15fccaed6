use std::{sync::Arc, time::Instant};

use paird_sessions::LifecycleManager;

use crate::auth::{LoginSessions, ResolvedAuth};

/// Everything a request handler can reach.
pub struct GatewayState {
    pub manager: LifecycleManager,
    pub auth: ResolvedAuth,
    pub logins: LoginSessions,
    pub version: String,
    pub started_at: Instant,
}

impl GatewayState {
    pub fn new(manager: LifecycleManager, auth: ResolvedAuth, logins: LoginSessions) -> Arc<Self> {
        Arc::new(Self {
            manager,
            auth,
            logins,
            version: env!("CARGO_PKG_VERSION").to_string(),
            started_at: Instant::now(),
        })
    }
}

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<GatewayState>,
}
