//! Runtime-configurable tuning parameters.
//!
//! All values have sensible defaults. Override via environment variables
//! (prefixed `TENSORSYNC_`) or by constructing a custom `TensorSyncConfig`.

/// Tunable parameters. The fusion buffer manager reads them at startup and
/// operations receive them in `enabled`; the built-in operations decide by
/// device alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorSyncConfig {
    /// Initial capacity of each fusion buffer. Batches larger than this
    /// grow the buffer instead of failing.
    pub fusion_buffer_capacity_bytes: usize,

    /// Emit timeline activities as `tracing` events.
    pub timeline: bool,
}

impl Default for TensorSyncConfig {
    fn default() -> Self {
        Self {
            fusion_buffer_capacity_bytes: 64 * 1024 * 1024, // 64 MiB
            timeline: false,
        }
    }
}

impl TensorSyncConfig {
    /// Load config from environment variables, falling back to defaults.
    ///
    /// Recognized variables:
    /// - `TENSORSYNC_FUSION_BUFFER_CAPACITY_BYTES`
    /// - `TENSORSYNC_TIMELINE` (`1`/`true` to enable)
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("TENSORSYNC_FUSION_BUFFER_CAPACITY_BYTES") {
            match v.parse::<usize>() {
                Ok(n) => cfg.fusion_buffer_capacity_bytes = n,
                Err(e) => tracing::warn!(
                    value = %v,
                    error = %e,
                    "ignoring TENSORSYNC_FUSION_BUFFER_CAPACITY_BYTES"
                ),
            }
        }
        if let Ok(v) = std::env::var("TENSORSYNC_TIMELINE") {
            cfg.timeline = matches!(v.trim(), "1" | "true" | "TRUE" | "yes");
        }

        cfg
    }
}
