//! Optimistic drag-and-drop reordering.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::error::Result;
use crate::models::{ReorderKind, ReorderRequest, Scope};
use crate::remote::CallOptions;
use crate::sync::{lock, EntitySyncManager, SyncContext};

pub struct ReorderCoordinator {
    ctx: SyncContext,
    entities: Arc<EntitySyncManager>,
    /// Latest scheduled refresh per community; older timers see a newer
    /// generation and give up
    generations: Mutex<HashMap<String, u64>>,
}

impl ReorderCoordinator {
    pub fn new(ctx: SyncContext, entities: Arc<EntitySyncManager>) -> Arc<Self> {
        Arc::new(Self {
            ctx,
            entities,
            generations: Mutex::new(HashMap::new()),
        })
    }

    /// Moves `moved_id` to `new_index` within `to`.
    ///
    /// The displayed aggregate changes before the remote call is made. On
    /// success the aggregate is refreshed, right away for moves across scopes
    /// and debounced otherwise. On failure the affected scopes revert to the
    /// last authoritative ordering and the error is returned.
    pub async fn reorder(
        self: &Arc<Self>,
        community_id: &str,
        kind: ReorderKind,
        moved_id: &str,
        from: Scope,
        to: Scope,
        new_index: usize,
    ) -> Result<()> {
        let placement = self.entities.apply_optimistic(community_id, |aggregate| {
            aggregate.move_item(kind, moved_id, &from, &to, new_index)
        })?;
        debug!(community_id, moved_id, ?kind, order_id = placement.order_id, "reorder applied locally");

        let path = match kind {
            ReorderKind::Channel => format!("{community_id}/channels/reorder"),
            ReorderKind::Category => format!("{community_id}/categories/reorder"),
        };
        let request = ReorderRequest {
            id: moved_id.to_string(),
            category_id: placement.scope.category_id().map(str::to_string),
            order_id: placement.order_id,
        };

        let sent = match serde_json::to_value(&request) {
            Ok(body) => {
                self.ctx
                    .remote
                    .call(&path, CallOptions::write(body, self.ctx.signer.clone()))
                    .await
            }
            Err(e) => Err(e.into()),
        };

        if let Err(e) = sent {
            warn!(community_id, moved_id, error = %e, "reorder rejected, rolling back");
            let scopes = if from == to { vec![from] } else { vec![from, to] };
            self.entities.rollback(community_id, kind, &scopes);
            return Err(e);
        }

        if from != to {
            self.bump_generation(community_id);
            if let Err(e) = self.entities.refresh(community_id, false).await {
                debug!(community_id, error = %e, "post-move refresh failed");
            }
        } else {
            self.schedule_refresh(community_id);
        }
        Ok(())
    }

    fn bump_generation(&self, community_id: &str) -> u64 {
        let mut generations = lock(&self.generations);
        let generation = generations.entry(community_id.to_string()).or_insert(0);
        *generation += 1;
        *generation
    }

    /// Refreshes after the debounce window unless another reorder for the
    /// same community lands first.
    fn schedule_refresh(self: &Arc<Self>, community_id: &str) {
        let generation = self.bump_generation(community_id);
        let this = Arc::clone(self);
        let community_id = community_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(this.ctx.config.reorder_debounce).await;
            let current = lock(&this.generations).get(&community_id).copied();
            if current != Some(generation) {
                return;
            }
            if let Err(e) = this.entities.refresh(&community_id, false).await {
                debug!(community_id = %community_id, error = %e, "debounced refresh failed");
            }
        });
    }
}
