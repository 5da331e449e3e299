use crate::config::TensorSyncConfig;
use crate::error::{Result, TensorSyncError};
use crate::fusion::FusionBufferManager;
use crate::timeline::{NoopTimeline, Timeline, TracingTimeline};
use crate::types::Rank;
use std::sync::Arc;

/// Immutable per-process run state shared by every operation.
pub struct RunState {
    rank: Rank,
    world_size: u32,
    config: TensorSyncConfig,
    timeline: Arc<dyn Timeline>,
    fusion_buffers: Arc<FusionBufferManager>,
}

impl RunState {
    /// Build run state for `rank` of `world_size`. The timeline follows
    /// `config.timeline`.
    pub fn new(rank: Rank, world_size: u32, config: TensorSyncConfig) -> Result<Arc<Self>> {
        let timeline: Arc<dyn Timeline> = if config.timeline {
            Arc::new(TracingTimeline)
        } else {
            Arc::new(NoopTimeline)
        };
        Self::with_timeline(rank, world_size, config, timeline)
    }

    pub fn with_timeline(
        rank: Rank,
        world_size: u32,
        config: TensorSyncConfig,
        timeline: Arc<dyn Timeline>,
    ) -> Result<Arc<Self>> {
        if rank >= world_size {
            return Err(TensorSyncError::InvalidRank { rank, world_size });
        }
        let fusion_buffers = FusionBufferManager::from_config(&config);
        Ok(Arc::new(Self {
            rank,
            world_size,
            config,
            timeline,
            fusion_buffers,
        }))
    }

    pub fn rank(&self) -> Rank {
        self.rank
    }

    pub fn world_size(&self) -> u32 {
        self.world_size
    }

    pub fn config(&self) -> &TensorSyncConfig {
        &self.config
    }

    pub fn timeline(&self) -> &dyn Timeline {
        self.timeline.as_ref()
    }

    pub fn fusion_buffers(&self) -> &Arc<FusionBufferManager> {
        &self.fusion_buffers
    }
}
