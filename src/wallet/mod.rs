//! The web wallet itself: node modules, sessions and the pages they see.

pub mod actions;
pub mod heartbeat;
pub mod status;
pub mod view;

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::WebWalletConfig;
use crate::error::{SessionError, WebWalletError};
use crate::node::{ModuleFactory, Wallet};
use crate::orchestrator::{ModuleOrchestrator, StartupReport};
use crate::progress::{Bootstrapper, Phase, SnapshotSource};
use crate::session::SessionRegistry;
use crate::summary::{self, SummarizedTransaction};

use heartbeat::Heartbeat;
use status::OperationStatus;
use view::{Balances, Form, NodeStage, Page, StatusLine, WalletView, UNKNOWN};

/// Sent in the `Application` header so a second instance can tell who
/// holds the port.
pub const APPLICATION_NAME: &str = "ScPrime Web Wallet";

/// A page together with the header every page carries.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rendered {
    pub session_id: String,
    pub menu_collapsed: bool,
    pub status: StatusLine,
    pub balances: Balances,
    pub page: Page,
}

pub struct WebWallet {
    config: WebWalletConfig,
    orchestrator: Arc<ModuleOrchestrator>,
    sessions: Arc<SessionRegistry>,
    status: Arc<OperationStatus>,
    heartbeat: Arc<Heartbeat>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl WebWallet {
    pub fn new(
        config: WebWalletConfig,
        factory: Arc<dyn ModuleFactory>,
        snapshots: Arc<dyn SnapshotSource>,
    ) -> Result<Self, WebWalletError> {
        config.validate()?;
        let orchestrator = ModuleOrchestrator::new(factory, snapshots, &config);
        let sessions = SessionRegistry::new(config.wallets_dir()?);
        let heartbeat = Heartbeat::new(Duration::from_millis(config.server.heartbeat_timeout_ms));
        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            config,
            orchestrator: Arc::new(orchestrator),
            sessions: Arc::new(sessions),
            status: Arc::new(OperationStatus::new()),
            heartbeat: Arc::new(heartbeat),
            shutdown: Arc::new(shutdown),
        })
    }

    pub fn config(&self) -> &WebWalletConfig {
        &self.config
    }

    pub fn orchestrator(&self) -> &ModuleOrchestrator {
        &self.orchestrator
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn status(&self) -> &OperationStatus {
        &self.status
    }

    /// Brings up the node modules. Returns once the transaction pool is
    /// running, which may mean waiting for a bootstrap decision.
    pub async fn start(&self) -> Result<StartupReport, WebWalletError> {
        Ok(self.orchestrator.start(&self.config).await?)
    }

    /// Closes every wallet and module. Always runs to the end.
    pub fn shutdown(&self) -> Result<(), WebWalletError> {
        info!("Shutting down web wallet...");
        self.request_shutdown();
        self.orchestrator.close(&self.sessions)?;
        info!("Web wallet shut down");
        Ok(())
    }

    pub fn request_shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    pub async fn wait_for_shutdown(&self) {
        let mut rx = self.shutdown.subscribe();
        let _ = rx.wait_for(|stop| *stop).await;
    }

    /// Records a ping from the browser and arms the idle check.
    pub fn heartbeat(&self) -> u64 {
        let beat = self.heartbeat.beat();
        let shutdown = self.shutdown.clone();
        self.heartbeat.spawn_check(move || {
            shutdown.send_replace(true);
        });
        beat
    }

    pub fn bootstrapper_progress(&self) -> String {
        self.orchestrator.bootstrap_tracker().progress()
    }

    pub fn consensus_builder_progress(&self) -> String {
        self.orchestrator.consensus_build_tracker().progress()
    }

    pub fn node_stage(&self) -> NodeStage {
        if self.orchestrator.is_ready() {
            return NodeStage::Ready;
        }
        let progress = self.consensus_builder_progress();
        if !progress.is_empty() {
            return NodeStage::BuildingConsensus { progress };
        }
        let progress = self.bootstrapper_progress();
        if !progress.is_empty() {
            return NodeStage::Bootstrapping { progress };
        }
        let local = self
            .config
            .abs_dir()
            .map(|dir| Bootstrapper::local_consensus_size(&dir))
            .unwrap_or(0);
        let message = if local > 0 {
            "Consensus set is out of date"
        } else {
            "Consensus set was not found"
        };
        NodeStage::ChooseConsensusSource {
            message: message.to_string(),
        }
    }

    /// The user chose to download a consensus snapshot.
    pub fn initialize_bootstrapper(&self) -> Result<NodeStage, WebWalletError> {
        self.orchestrator.bootstrap_tracker().initialize()?;
        Ok(self.node_stage())
    }

    /// The user chose to build the consensus set locally.
    pub async fn initialize_consensus_builder(&self) -> Result<NodeStage, WebWalletError> {
        self.orchestrator.bootstrap_tracker().skip()?;
        let builder = self.orchestrator.consensus_build_tracker();
        let wait = Duration::from_millis(self.config.server.status_wait_ms);
        // The build task starts by itself once it sees the skip.
        let started = builder.wait_until(|p| *p != Phase::NotStarted);
        if tokio::time::timeout(wait, started).await.is_err() {
            if let Err(e) = builder.initialize() {
                warn!("Unable to start building the consensus set: {}", e);
            }
        }
        Ok(self.node_stage())
    }

    pub(crate) fn ensure_ready(&self) -> Result<(), WebWalletError> {
        if self.orchestrator.is_ready() {
            Ok(())
        } else {
            Err(WebWalletError::NotReady(format!("{:?}", self.node_stage())))
        }
    }

    /// Block height with the sync status color shown next to it.
    pub fn block_height(&self, session_id: &str) -> StatusLine {
        let wallet = self.sessions.wallet(session_id).ok();
        let cs = self.orchestrator.consensus_set();
        let height = wallet
            .as_ref()
            .and_then(|w| w.height().ok())
            .or_else(|| cs.as_ref().map(|cs| cs.height()))
            .map(|h| h.to_string())
            .unwrap_or_else(|| UNKNOWN.to_string());

        if let Some(status) = self.status.current() {
            return StatusLine::new(height, &status, "yellow");
        }
        if wallet
            .as_ref()
            .and_then(|w| w.rescanning().ok())
            .unwrap_or(false)
        {
            return StatusLine::new(height, "Rescanning", "cyan");
        }
        if cs.map(|cs| cs.synced()).unwrap_or(false) {
            StatusLine::new(height, "Synchronized", "blue")
        } else {
            StatusLine::new(height, "Synchronizing", "yellow")
        }
    }

    pub fn balances(&self, session_id: &str) -> Balances {
        self.sessions
            .wallet(session_id)
            .map(|w| Balances::of(w.as_ref()))
            .unwrap_or_default()
    }

    /// Wraps `page` with the header values. A pending alert is shown, and
    /// consumed, in place of the page. Anything else shown becomes the
    /// session's cached page.
    pub fn render(&self, session_id: &str, page: Page) -> Rendered {
        let page = match self.sessions.pop_alert(session_id) {
            Some(alert) => {
                info!("{}", alert);
                Page::error(alert)
            }
            None => {
                if !matches!(page, Page::Error { .. }) {
                    if let Ok(cached) = serde_json::to_string(&page) {
                        let _ = self.sessions.set_cached_page(session_id, cached);
                    }
                }
                page
            }
        };
        let session_id = if self.sessions.exists(session_id) {
            session_id.to_string()
        } else {
            String::new()
        };
        Rendered {
            menu_collapsed: self.sessions.menu_is_collapsed(&session_id),
            status: self.block_height(&session_id),
            balances: self.balances(&session_id),
            session_id,
            page,
        }
    }

    /// Turns a failed action into the error page the user dismisses.
    pub fn respond(
        &self,
        session_id: Option<&str>,
        result: Result<Rendered, WebWalletError>,
    ) -> Rendered {
        match result {
            Ok(rendered) => rendered,
            Err(e) => {
                info!("{}", e);
                self.render(session_id.unwrap_or_default(), Page::error(e.to_string()))
            }
        }
    }

    /// The page a session should be looking at right now.
    pub fn gui(&self, session_id: Option<&str>) -> Rendered {
        let stage = self.node_stage();
        if stage != NodeStage::Ready {
            return self.render(session_id.unwrap_or_default(), Page::Node(stage));
        }
        let Some(id) = session_id.filter(|id| self.sessions.exists(id)) else {
            return self.render("", Page::unlock());
        };
        let wallet = match self.sessions.wallet(id) {
            Ok(w) => w,
            Err(_) => return self.render(id, Page::unlock()),
        };
        if let Some(status) = self.status.current() {
            return self.render(id, Page::scanning(&status));
        }
        match wallet.encrypted() {
            Err(e) => {
                let msg = format!("Unable to determine if wallet is encrypted: {}", e);
                return self.render(id, Page::error(msg));
            }
            Ok(false) => return self.render(id, Page::form("INITIALIZE WALLET", Form::InitializeWallet)),
            Ok(true) => {}
        }
        match wallet.unlocked() {
            Err(e) => {
                let msg = format!("Unable to determine if wallet is unlocked: {}", e);
                self.render(id, Page::error(msg))
            }
            Ok(true) => match self.wallet_view(id, wallet.as_ref()) {
                Ok(view) => self.render(id, Page::Wallet(view)),
                Err(e) => {
                    let msg = format!("Unable to generate transaction history: {}", e);
                    self.render(id, Page::error(msg))
                }
            },
            Ok(false) => self.render(id, Page::unlock()),
        }
    }

    fn wallet_view(&self, session_id: &str, wallet: &dyn Wallet) -> Result<WalletView, WebWalletError> {
        let summaries = self.summaries(wallet)?;
        let page = self.sessions.tx_history_page(session_id)?;
        Ok(summary::history_page(&summaries, page).into())
    }

    /// Confirmed history followed by the unconfirmed transactions.
    pub fn summaries(&self, wallet: &dyn Wallet) -> Result<Vec<SummarizedTransaction>, WebWalletError> {
        let cs = self
            .orchestrator
            .consensus_set()
            .ok_or_else(|| WebWalletError::NotReady("consensus set is not running".to_string()))?;
        let height = cs.height();
        let mut txns = wallet.transactions(0, height)?;
        txns.extend(wallet.unconfirmed_transactions()?);
        let unspent = wallet.unspent_outputs()?;
        Ok(summary::summarize(&txns, height, &unspent, cs.as_ref())?)
    }

    /// Every non-setup transaction of the session's wallet as CSV.
    pub fn history_csv(&self, session_id: &str) -> Result<String, WebWalletError> {
        let wallet = self.sessions.wallet(session_id)?;
        Ok(summary::history_csv(&self.summaries(wallet.as_ref())?))
    }

    pub(crate) fn session_wallet(&self, session_id: Option<&str>) -> Result<(String, Arc<dyn Wallet>), WebWalletError> {
        let id = session_id
            .filter(|id| self.sessions.exists(id))
            .ok_or(SessionError::UnknownSession)?;
        let wallet = self.sessions.wallet(id)?;
        Ok((id.to_string(), wallet))
    }

    /// Waits briefly for a background wallet task so fast ones can answer
    /// with their result page.
    pub(crate) async fn wait_for_task(&self, task: tokio::task::JoinHandle<()>) {
        let wait = Duration::from_millis(self.config.server.status_wait_ms);
        if let Ok(Err(e)) = tokio::time::timeout(wait, task).await {
            error!("Wallet task failed: {}", e);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::node::memory::MemoryFactory;
    use crate::progress::ProgressTracker;
    use async_trait::async_trait;
    use std::path::Path;

    pub struct NoSnapshots;

    #[async_trait]
    impl SnapshotSource for NoSnapshots {
        async fn fetch(&self, _dest: &Path, _tracker: &ProgressTracker) -> Result<(), String> {
            Err("no snapshot server in tests".to_string())
        }
    }

    pub struct Fixture {
        pub dir: tempfile::TempDir,
        pub factory: Arc<MemoryFactory>,
        pub ww: WebWallet,
    }

    pub fn fixture_with(edit: impl FnOnce(&mut WebWalletConfig)) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let mut config = WebWalletConfig::default();
        config.node.dir = dir.path().display().to_string();
        config.node.bootstrap = false;
        config.node.consensus_poll_ms = 5;
        config.server.status_wait_ms = 2000;
        edit(&mut config);
        let factory = Arc::new(MemoryFactory::new());
        let ww = WebWallet::new(config, factory.clone(), Arc::new(NoSnapshots)).unwrap();
        Fixture { dir, factory, ww }
    }

    pub async fn started() -> Fixture {
        let f = fixture_with(|_| {});
        f.ww.start().await.unwrap();
        f
    }

    #[tokio::test]
    async fn test_stage_before_and_after_start() {
        let f = fixture_with(|c| c.node.bootstrap = true);
        assert_eq!(
            f.ww.node_stage(),
            NodeStage::ChooseConsensusSource {
                message: "Consensus set was not found".to_string()
            }
        );
        let db = Bootstrapper::consensus_db_path(f.dir.path());
        std::fs::create_dir_all(db.parent().unwrap()).unwrap();
        std::fs::write(&db, b"old").unwrap();
        assert_eq!(
            f.ww.node_stage(),
            NodeStage::ChooseConsensusSource {
                message: "Consensus set is out of date".to_string()
            }
        );

        let f = started().await;
        assert_eq!(f.ww.node_stage(), NodeStage::Ready);
        assert_eq!(f.ww.gui(None).page, Page::unlock());
    }

    #[tokio::test]
    async fn test_build_locally_instead_of_download() {
        let f = fixture_with(|c| c.node.bootstrap = true);
        let ww = Arc::new(f.ww);
        let starter = {
            let ww = ww.clone();
            tokio::spawn(async move { ww.start().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(matches!(
            ww.gui(None).page,
            Page::Node(NodeStage::ChooseConsensusSource { .. })
        ));

        ww.initialize_consensus_builder().await.unwrap();
        starter.await.unwrap().unwrap();
        assert_eq!(ww.bootstrapper_progress(), "Skipped");
        assert_eq!(ww.consensus_builder_progress(), "Done");
        assert_eq!(ww.node_stage(), NodeStage::Ready);
    }

    #[tokio::test]
    async fn test_build_requested_before_build_task_runs() {
        let f = fixture_with(|c| {
            c.node.bootstrap = true;
            c.server.status_wait_ms = 20;
        });
        let stage = f.ww.initialize_consensus_builder().await.unwrap();
        assert_eq!(f.ww.bootstrapper_progress(), "Skipped");
        assert_eq!(f.ww.orchestrator().consensus_build_tracker().phase(), Phase::Running);
        assert!(matches!(stage, NodeStage::BuildingConsensus { .. }), "{:?}", stage);

        // Asking twice is harmless.
        f.ww.initialize_consensus_builder().await.unwrap_err();
        assert_eq!(f.ww.orchestrator().consensus_build_tracker().phase(), Phase::Running);
    }

    #[tokio::test]
    async fn test_alert_replaces_next_page_once() {
        let f = started().await;
        let id = f.ww.sessions().create();
        f.ww.sessions().set_alert(&id, "Unable to send coins: boom").unwrap();

        let first = f.ww.gui(Some(&id));
        assert_eq!(first.page, Page::error("Unable to send coins: boom"));
        assert_eq!(first.session_id, id);
        assert_eq!(f.ww.gui(Some(&id)).page, Page::unlock());
    }

    #[tokio::test]
    async fn test_unknown_session_renders_without_id() {
        let f = started().await;
        let rendered = f.ww.gui(Some("feedface"));
        assert_eq!(rendered.session_id, "");
        assert!(rendered.menu_collapsed);
        assert_eq!(rendered.balances, Balances::default());
        assert_eq!(rendered.status.status, "Synchronized");
        assert_eq!(rendered.status.color, "blue");
    }

    #[tokio::test]
    async fn test_status_line_follows_operation() {
        let f = started().await;
        f.factory.chain().set_height(7);
        f.ww.status().try_begin("Scanning").unwrap();
        let line = f.ww.block_height("");
        assert_eq!(line, StatusLine::new("7".to_string(), "Scanning", "yellow"));
        f.ww.status().finish("Scanning");
        f.factory.chain().set_synced(false);
        assert_eq!(f.ww.block_height("").status, "Synchronizing");
    }

    #[tokio::test]
    async fn test_heartbeat_expiry_requests_shutdown() {
        let f = fixture_with(|c| c.server.heartbeat_timeout_ms = 20);
        f.ww.heartbeat();
        tokio::time::timeout(Duration::from_secs(2), f.ww.wait_for_shutdown())
            .await
            .unwrap();
        assert!(f.ww.is_shutting_down());
    }

    #[tokio::test]
    async fn test_shutdown_closes_modules() {
        let f = started().await;
        f.ww.shutdown().unwrap();
        assert!(f.ww.is_shutting_down());
        let events = f.factory.chain().events();
        assert_eq!(events.last().map(String::as_str), Some("close gateway"));
        assert!(!f.ww.orchestrator().is_ready());
    }
}
