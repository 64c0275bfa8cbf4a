use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

/// Tracks the abortable agent job for each session the worker is serving.
#[derive(Default)]
pub struct JobRegistry {
    jobs: DashMap<String, CancellationToken>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job for a session, returning its cancellation token.
    /// A previous job for the same session is cancelled and replaced.
    pub fn register(&self, session_id: &str) -> CancellationToken {
        let token = CancellationToken::new();
        if let Some(old) = self.jobs.insert(session_id.to_string(), token.clone()) {
            old.cancel();
        }
        token
    }

    /// Cancel and remove the job for a session. Returns whether a job was
    /// registered.
    pub fn abort(&self, session_id: &str) -> bool {
        match self.jobs.remove(session_id) {
            Some((_, token)) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.jobs.contains_key(session_id)
    }

    pub fn count(&self) -> usize {
        self.jobs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_abort() {
        let registry = JobRegistry::new();
        let token = registry.register("s1");
        assert!(registry.contains("s1"));
        assert!(!token.is_cancelled());

        assert!(registry.abort("s1"));
        assert!(token.is_cancelled());
        assert!(!registry.contains("s1"));
    }

    #[test]
    fn abort_unknown_session() {
        let registry = JobRegistry::new();
        assert!(!registry.abort("ghost"));
    }

    #[test]
    fn reregister_cancels_previous_job() {
        let registry = JobRegistry::new();
        let first = registry.register("s1");
        let second = registry.register("s1");
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
        assert_eq!(registry.count(), 1);
    }
}
