//! Brings the node modules up in dependency order and tears them down in
//! reverse.

use serde::Serialize;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::config::WebWalletConfig;
use crate::error::{ConfigError, ErrorList, ModuleStartupError, NodeError, ShutdownError};
use crate::node::{
    ConsensusSet, Module, ModuleFactory, Node, Wallet, CONSENSUS_DIR, GATEWAY_DIR,
    TRANSACTION_POOL_DIR,
};
use crate::progress::{Bootstrapper, ConsensusBuilder, Phase, ProgressTracker, SnapshotSource};
use crate::session::SessionRegistry;

pub const PROBE_TIMEOUT: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StartupStep {
    BootstrapGate,
    AttachToServer,
    Gateway,
    ConsensusSet,
    ConsensusBuildGate,
    TransactionPool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum StepOutcome {
    Created,
    Disabled,
    Attached,
    Tracker(Phase),
}

#[derive(Debug, Clone, Serialize)]
pub struct StepTiming {
    pub step: StartupStep,
    pub outcome: StepOutcome,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StartupReport {
    pub steps: Vec<StepTiming>,
}

impl StartupReport {
    fn record(&mut self, step: StartupStep, outcome: StepOutcome, started: Instant) {
        let elapsed = started.elapsed();
        info!("{:?}: {:?} in {:.3} seconds", step, outcome, elapsed.as_secs_f64());
        self.steps.push(StepTiming {
            step,
            outcome,
            elapsed,
        });
    }

    pub fn outcome(&self, step: StartupStep) -> Option<&StepOutcome> {
        self.steps.iter().find(|s| s.step == step).map(|s| &s.outcome)
    }
}

/// Which modules may still be created. Cleared on close.
#[derive(Debug, Clone, Copy)]
struct ModuleFlags {
    gateway: bool,
    consensus_set: bool,
    transaction_pool: bool,
    wallet: bool,
}

pub struct ModuleOrchestrator {
    factory: Arc<dyn ModuleFactory>,
    snapshots: Arc<dyn SnapshotSource>,
    node: RwLock<Node>,
    flags: Mutex<ModuleFlags>,
    bootstrap: Arc<ProgressTracker>,
    consensus_build: Arc<ProgressTracker>,
    attached: std::sync::atomic::AtomicBool,
}

impl ModuleOrchestrator {
    pub fn new(
        factory: Arc<dyn ModuleFactory>,
        snapshots: Arc<dyn SnapshotSource>,
        config: &WebWalletConfig,
    ) -> Self {
        let bootstrap = Arc::new(ProgressTracker::new("bootstrapper", "Downloading", "bytes"));
        let consensus_build = Arc::new(
            ProgressTracker::new("consensus builder", "Building", "blocks")
                .gated_by(bootstrap.clone()),
        );
        Self {
            factory,
            snapshots,
            node: RwLock::new(Node::default()),
            flags: Mutex::new(ModuleFlags {
                gateway: config.node.create_gateway,
                consensus_set: config.node.create_consensus_set,
                transaction_pool: config.node.create_transaction_pool,
                wallet: config.node.create_wallet,
            }),
            bootstrap,
            consensus_build,
            attached: std::sync::atomic::AtomicBool::new(false),
        }
    }

    fn node_read(&self) -> RwLockReadGuard<'_, Node> {
        self.node.read().unwrap_or_else(|e| e.into_inner())
    }

    fn node_write(&self) -> RwLockWriteGuard<'_, Node> {
        self.node.write().unwrap_or_else(|e| e.into_inner())
    }

    fn flags(&self) -> MutexGuard<'_, ModuleFlags> {
        self.flags.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn bootstrap_tracker(&self) -> Arc<ProgressTracker> {
        self.bootstrap.clone()
    }

    pub fn consensus_build_tracker(&self) -> Arc<ProgressTracker> {
        self.consensus_build.clone()
    }

    pub fn consensus_set(&self) -> Option<Arc<dyn ConsensusSet>> {
        self.node_read().consensus_set.clone()
    }

    /// True once the node directory is known to the server.
    pub fn is_attached(&self) -> bool {
        self.attached.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// All modules the configuration asks for are running.
    pub fn is_ready(&self) -> bool {
        let flags = *self.flags();
        let node = self.node_read();
        self.is_attached()
            && (!flags.gateway || node.gateway.is_some())
            && (!flags.consensus_set || node.consensus_set.is_some())
            && (!flags.transaction_pool || node.transaction_pool.is_some())
    }

    pub fn register_auxiliary(&self, name: impl Into<String>, module: Arc<dyn Module>) {
        self.node_write().auxiliary.push((name.into(), module));
    }

    pub fn set_mux(&self, mux: Arc<dyn Module>) {
        self.node_write().mux = Some(mux);
    }

    /// Runs every startup step in order. The first module failure aborts;
    /// modules already running are left running.
    pub async fn start(&self, config: &WebWalletConfig) -> Result<StartupReport, ModuleStartupError> {
        let dir = config.abs_dir()?;
        let mut report = StartupReport::default();

        let started = Instant::now();
        let bootstrapper = Bootstrapper::new(
            self.bootstrap.clone(),
            self.snapshots.clone(),
            dir.clone(),
            config.node.bootstrap,
            config.bootstrap_stale_after(),
        );
        let phase = bootstrapper.run().await;
        report.record(StartupStep::BootstrapGate, StepOutcome::Tracker(phase), started);

        let started = Instant::now();
        std::fs::create_dir_all(&dir)
            .map_err(|e| ConfigError::InvalidDirectory(dir.display().to_string(), e.to_string()))?;
        self.node_write().dir = dir.clone();
        self.attached.store(true, std::sync::atomic::Ordering::SeqCst);
        report.record(StartupStep::AttachToServer, StepOutcome::Attached, started);

        let started = Instant::now();
        if self.flags().gateway {
            info!("Loading gateway...");
            let gateway = self
                .factory
                .create_gateway(config.node.bootstrap, &dir.join(GATEWAY_DIR))
                .map_err(|source| ModuleStartupError::Module {
                    module: "gateway",
                    source,
                })?;
            self.node_write().gateway = Some(gateway);
            report.record(StartupStep::Gateway, StepOutcome::Created, started);
        } else {
            report.record(StartupStep::Gateway, StepOutcome::Disabled, started);
        }

        let started = Instant::now();
        if self.flags().consensus_set {
            info!("Loading consensus set...");
            let gateway = self.node_read().gateway.clone();
            let cs = self
                .factory
                .create_consensus_set(gateway, config.node.bootstrap, &dir.join(CONSENSUS_DIR))
                .map_err(|source| ModuleStartupError::Module {
                    module: "consensus set",
                    source,
                })?;
            self.node_write().consensus_set = Some(cs);
            report.record(StartupStep::ConsensusSet, StepOutcome::Created, started);
        } else {
            report.record(StartupStep::ConsensusSet, StepOutcome::Disabled, started);
        }

        let started = Instant::now();
        let phase = match self.consensus_set() {
            Some(cs) => {
                ConsensusBuilder::new(
                    self.consensus_build.clone(),
                    self.bootstrap.clone(),
                    Duration::from_millis(config.node.consensus_poll_ms),
                )
                .run(cs)
                .await
            }
            None => {
                let _ = self.consensus_build.skip();
                self.consensus_build.phase()
            }
        };
        report.record(StartupStep::ConsensusBuildGate, StepOutcome::Tracker(phase), started);

        let started = Instant::now();
        if self.flags().transaction_pool {
            info!("Loading transaction pool...");
            let (cs, gateway) = {
                let node = self.node_read();
                (node.consensus_set.clone(), node.gateway.clone())
            };
            let tp = self
                .factory
                .create_transaction_pool(cs, gateway, &dir.join(TRANSACTION_POOL_DIR))
                .map_err(|source| ModuleStartupError::Module {
                    module: "transaction pool",
                    source,
                })?;
            self.node_write().transaction_pool = Some(tp);
            report.record(StartupStep::TransactionPool, StepOutcome::Created, started);
        } else {
            report.record(StartupStep::TransactionPool, StepOutcome::Disabled, started);
        }

        info!("Finished loading node modules");
        Ok(report)
    }

    /// Opens the wallet stored in `dir` against the running modules.
    pub fn open_wallet(&self, dir: &Path) -> Result<Arc<dyn Wallet>, NodeError> {
        if !self.flags().wallet {
            return Err(NodeError::new("wallet creation is disabled"));
        }
        let (cs, tp) = {
            let node = self.node_read();
            (node.consensus_set.clone(), node.transaction_pool.clone())
        };
        info!("Loading wallet from {}", dir.display());
        self.factory.create_wallet(cs, tp, dir)
    }

    /// Closes everything that is running, newest first, and keeps going
    /// past failures.
    pub fn close(&self, sessions: &SessionRegistry) -> Result<(), ShutdownError> {
        *self.flags() = ModuleFlags {
            gateway: false,
            consensus_set: false,
            transaction_pool: false,
            wallet: false,
        };
        let mut errors = ErrorList::new();

        info!("Closing wallets...");
        if let Err(e) = sessions.close_all() {
            errors.extend(e);
        }

        let node = std::mem::take(&mut *self.node_write());
        for (name, module) in node.auxiliary.iter().rev() {
            info!("Closing {}...", name);
            errors.check(name, module.close());
        }
        if let Some(tp) = node.transaction_pool {
            info!("Closing transaction pool...");
            errors.check("transaction pool", tp.close());
        }
        if let Some(cs) = node.consensus_set {
            info!("Closing consensus set...");
            errors.check("consensus set", cs.close());
        }
        if let Some(gateway) = node.gateway {
            info!("Closing gateway...");
            errors.check("gateway", gateway.close());
        }
        if let Some(mux) = node.mux {
            info!("Closing mux...");
            errors.check("mux", mux.close());
        }
        self.bootstrap.close();
        self.consensus_build.close();

        if !errors.is_empty() {
            warn!("Some modules failed to close");
        }
        errors.into_result()
    }
}

/// Fails when something already answers HTTP on `port`.
pub async fn probe_port(port: u16) -> Result<(), ConfigError> {
    probe_port_with_timeout(port, PROBE_TIMEOUT).await
}

pub async fn probe_port_with_timeout(port: u16, timeout: Duration) -> Result<(), ConfigError> {
    let url = format!("http://localhost:{}", port);
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ConfigError::Invalid(e.to_string()))?;

    for method in [reqwest::Method::OPTIONS, reqwest::Method::GET] {
        if let Ok(resp) = client.request(method, &url).send().await {
            return match resp
                .headers()
                .get("Application")
                .and_then(|v| v.to_str().ok())
            {
                Some(app) => Err(ConfigError::PortInUseBy {
                    port,
                    application: app.to_string(),
                }),
                None => Err(ConfigError::PortInUse(port)),
            };
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::memory::MemoryFactory;
    use async_trait::async_trait;

    struct NoSnapshots;

    #[async_trait]
    impl SnapshotSource for NoSnapshots {
        async fn fetch(&self, _dest: &Path, _tracker: &ProgressTracker) -> Result<(), String> {
            Err("no snapshot server in tests".to_string())
        }
    }

    fn config(dir: &Path) -> WebWalletConfig {
        let mut config = WebWalletConfig::default();
        config.node.dir = dir.display().to_string();
        config.node.bootstrap = false;
        config.node.consensus_poll_ms = 5;
        config
    }

    fn orchestrator(factory: Arc<MemoryFactory>, config: &WebWalletConfig) -> ModuleOrchestrator {
        ModuleOrchestrator::new(factory, Arc::new(NoSnapshots), config)
    }

    #[tokio::test]
    async fn test_start_order() {
        let dir = tempfile::tempdir().unwrap();
        let factory = Arc::new(MemoryFactory::new());
        let config = config(dir.path());
        let o = orchestrator(factory.clone(), &config);

        let report = o.start(&config).await.unwrap();
        let steps: Vec<StartupStep> = report.steps.iter().map(|s| s.step).collect();
        assert_eq!(
            steps,
            vec![
                StartupStep::BootstrapGate,
                StartupStep::AttachToServer,
                StartupStep::Gateway,
                StartupStep::ConsensusSet,
                StartupStep::ConsensusBuildGate,
                StartupStep::TransactionPool,
            ]
        );
        assert_eq!(
            report.outcome(StartupStep::ConsensusBuildGate),
            Some(&StepOutcome::Tracker(Phase::Done))
        );
        assert_eq!(
            factory.chain().events(),
            vec![
                "create gateway (bootstrap=false)",
                "create consensus set",
                "create transaction pool"
            ]
        );
        assert!(o.is_ready());
    }

    #[tokio::test]
    async fn test_missing_gateway_aborts_startup() {
        let dir = tempfile::tempdir().unwrap();
        let factory = Arc::new(MemoryFactory::new());
        let mut config = config(dir.path());
        config.node.create_gateway = false;
        let o = orchestrator(factory, &config);

        let err = o.start(&config).await.unwrap_err();
        assert!(matches!(
            err,
            ModuleStartupError::Module {
                module: "consensus set",
                ..
            }
        ));
        assert!(o.is_attached());
        assert!(!o.is_ready());
    }

    #[tokio::test]
    async fn test_failed_bootstrap_falls_back_to_build() {
        let dir = tempfile::tempdir().unwrap();
        let factory = Arc::new(MemoryFactory::new());
        let mut config = config(dir.path());
        config.node.bootstrap = true;
        let o = Arc::new(orchestrator(factory, &config));

        let starter = {
            let o = o.clone();
            let config = config.clone();
            tokio::spawn(async move { o.start(&config).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        o.bootstrap_tracker().initialize().unwrap();

        let report = starter.await.unwrap().unwrap();
        assert!(matches!(
            report.outcome(StartupStep::BootstrapGate),
            Some(StepOutcome::Tracker(Phase::Failed(_)))
        ));
        assert_eq!(o.consensus_build_tracker().phase(), Phase::Done);
    }

    #[tokio::test]
    async fn test_close_order_and_totality() {
        let dir = tempfile::tempdir().unwrap();
        let factory = Arc::new(MemoryFactory::new());
        let config = config(dir.path());
        let o = orchestrator(factory.clone(), &config);
        o.start(&config).await.unwrap();

        let sessions = SessionRegistry::new(dir.path().join("wallets"));
        let id = sessions.create();
        sessions
            .attach_new_wallet(&id, "w", |d| o.open_wallet(d))
            .unwrap();

        let chain = factory.chain();
        o.register_auxiliary("miner", chain.auxiliary("miner"));
        o.register_auxiliary("host", chain.auxiliary("host"));
        o.set_mux(chain.auxiliary("mux"));
        chain.fail_close("transaction pool");
        chain.fail_close("gateway");

        let err = o.close(&sessions).unwrap_err();
        assert_eq!(err.modules(), vec!["transaction pool", "gateway"]);

        let closes: Vec<String> = chain
            .events()
            .into_iter()
            .filter(|e| e.starts_with("close"))
            .collect();
        assert_eq!(
            closes,
            vec![
                "close wallet w",
                "close host",
                "close miner",
                "close transaction pool",
                "close consensus set",
                "close gateway",
                "close mux"
            ]
        );
        assert_eq!(o.bootstrap_tracker().phase(), Phase::Skipped);
        assert!(o.open_wallet(dir.path()).is_err());
        assert!(o.close(&sessions).is_ok());
    }

    #[tokio::test]
    async fn test_free_port_accepted() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        assert!(probe_port_with_timeout(port, Duration::from_millis(500))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_busy_port_reports_application() {
        let app = axum::Router::new().route(
            "/",
            axum::routing::any(|| async { ([("Application", "Other Wallet")], "hi") }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        let err = probe_port_with_timeout(port, Duration::from_millis(500))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), format!("port {} already in use by Other Wallet", port));
    }
}
