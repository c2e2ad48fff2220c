//! Runtime-wide tunables. A plain `Default`-implementing struct, not a file
//! format; there is no build tooling or config-file parser in scope here.

/// Configuration knobs for one [`crate::runtime::Runtime`].
#[derive(Debug, Clone, Copy)]
pub struct RuntimeConfig {
    /// Maximum depth of re-entrant `Evaluate` handling before
    /// [`crate::error::RuntimeError::ReentryDepthExceeded`] is raised.
    /// Guards against a peer (or a misbehaving test double) that never
    /// stops answering a `Respond` with another `Evaluate`.
    pub max_reentry_depth: u32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_reentry_depth: 64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_depth_is_nonzero() {
        assert!(RuntimeConfig::default().max_reentry_depth > 0);
    }
}
