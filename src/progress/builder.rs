use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use super::{Phase, ProgressTracker};
use crate::node::ConsensusSet;

/// Follows the consensus set while it catches up with the network.
pub struct ConsensusBuilder {
    tracker: Arc<ProgressTracker>,
    bootstrap: Arc<ProgressTracker>,
    poll_interval: Duration,
}

impl ConsensusBuilder {
    pub fn new(
        tracker: Arc<ProgressTracker>,
        bootstrap: Arc<ProgressTracker>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            tracker,
            bootstrap,
            poll_interval,
        }
    }

    /// Runs until the tracker reaches a terminal phase and returns it.
    ///
    /// A downloaded snapshot makes the build unnecessary. After a skipped or
    /// failed bootstrap the build starts on its own.
    pub async fn run(&self, cs: Arc<dyn ConsensusSet>) -> Phase {
        match self.bootstrap.wait_terminal().await {
            Phase::Done => {
                let _ = self.tracker.skip();
                return self.tracker.phase();
            }
            Phase::Closed => {
                self.tracker.close();
                return self.tracker.phase();
            }
            _ => {}
        }

        if self.tracker.phase() == Phase::NotStarted {
            let _ = self.tracker.initialize();
        }
        if self.tracker.phase() != Phase::Running {
            return self.tracker.phase();
        }

        info!("Building consensus set from height {}", cs.height());
        loop {
            self.tracker.advance(cs.height());
            if cs.synced() {
                if self.tracker.complete().is_ok() {
                    info!("Consensus set synced at height {}", cs.height());
                }
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = self.tracker.wait_until(|p| *p != Phase::Running) => break,
            }
        }
        self.tracker.phase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::memory::MemoryFactory;
    use crate::node::ModuleFactory;

    fn trackers() -> (Arc<ProgressTracker>, Arc<ProgressTracker>) {
        let bootstrap = Arc::new(ProgressTracker::new("bootstrapper", "Downloading", "bytes"));
        let build = Arc::new(
            ProgressTracker::new("consensus builder", "Building", "blocks")
                .gated_by(bootstrap.clone()),
        );
        (bootstrap, build)
    }

    fn consensus_set(factory: &MemoryFactory) -> Arc<dyn ConsensusSet> {
        let dir = tempfile::tempdir().unwrap();
        let gw = factory.create_gateway(false, dir.path()).unwrap();
        factory
            .create_consensus_set(Some(gw), false, dir.path())
            .unwrap()
    }

    #[tokio::test]
    async fn test_skipped_after_snapshot() {
        let (bootstrap, build) = trackers();
        bootstrap.initialize().unwrap();
        bootstrap.complete().unwrap();
        let builder = ConsensusBuilder::new(build, bootstrap, Duration::from_millis(5));
        let factory = MemoryFactory::new();
        assert_eq!(builder.run(consensus_set(&factory)).await, Phase::Skipped);
    }

    #[tokio::test]
    async fn test_builds_until_synced() {
        let (bootstrap, build) = trackers();
        bootstrap.skip().unwrap();
        let factory = MemoryFactory::new();
        let chain = factory.chain();
        chain.set_synced(false);
        chain.set_height(10);

        let builder = ConsensusBuilder::new(build.clone(), bootstrap, Duration::from_millis(5));
        let cs = consensus_set(&factory);
        let task = tokio::spawn(async move { builder.run(cs).await });

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(build.progress(), "Building 10 blocks");
        chain.set_height(42);
        chain.set_synced(true);

        assert_eq!(task.await.unwrap(), Phase::Done);
        assert_eq!(build.completed(), 42);
    }

    #[tokio::test]
    async fn test_close_stops_build() {
        let (bootstrap, build) = trackers();
        bootstrap.fail("offline").unwrap();
        let factory = MemoryFactory::new();
        factory.chain().set_synced(false);

        let builder = ConsensusBuilder::new(build.clone(), bootstrap, Duration::from_secs(60));
        let cs = consensus_set(&factory);
        let task = tokio::spawn(async move { builder.run(cs).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        build.close();
        assert_eq!(task.await.unwrap(), Phase::Closed);
    }
}
