//! Plugin update commands.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::api::types::UpdateOutcome;
use crate::protocols::host::ReloadSignal;
use crate::runtime::update_agent::UpdateAgent;

/// Reload signal for runs without a rendering surface.
pub struct HeadlessReload;

#[async_trait]
impl ReloadSignal for HeadlessReload {
    async fn force_reload(&self) {
        log::info!("Plugin updated; no editor surface to reload");
    }
}

/// Run one update cycle now.
pub async fn update_check(agent: &UpdateAgent) -> UpdateOutcome {
    log::debug!("update_check called");
    agent.check_now().await
}

/// Run the update timer until `shutdown` completes.
pub async fn update_watch(agent: &Arc<UpdateAgent>, shutdown: impl Future<Output = ()>) {
    log::debug!("update_watch called");
    let timer = agent.start();
    shutdown.await;
    timer.abort();
    log::info!("Update watch stopped");
}
