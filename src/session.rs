//! Browser sessions and the wallet each one has open.

use rand::rngs::OsRng;
use rand::RngCore;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{info, warn};

use crate::error::{ErrorList, NodeError, SessionError, ShutdownError};
use crate::node::Wallet;

const SESSION_ID_BYTES: usize = 16;

#[derive(Clone)]
pub struct Session {
    pub id: String,
    /// Directory name of the attached wallet, empty when none.
    pub name: String,
    pub wallet: Option<Arc<dyn Wallet>>,
    pub alert: Option<String>,
    pub menu_collapsed: bool,
    pub tx_history_page: usize,
    pub cached_page: String,
}

impl Session {
    fn new(id: String) -> Self {
        Self {
            id,
            name: String::new(),
            wallet: None,
            alert: None,
            menu_collapsed: true,
            tx_history_page: 1,
            cached_page: String::new(),
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("wallet", &self.wallet.as_ref().map(|_| "<attached>"))
            .field("alert", &self.alert)
            .field("menu_collapsed", &self.menu_collapsed)
            .field("tx_history_page", &self.tx_history_page)
            .finish()
    }
}

pub fn new_session_id() -> String {
    let mut bytes = [0u8; SESSION_ID_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Sessions plus the wallet names currently being opened.
#[derive(Default)]
struct Registry {
    sessions: Vec<Session>,
    opening: HashSet<String>,
}

impl Registry {
    fn find_mut(&mut self, id: &str) -> Result<&mut Session, SessionError> {
        self.sessions
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or(SessionError::UnknownSession)
    }

    fn name_in_use(&self, name: &str) -> bool {
        self.opening.contains(name) || self.sessions.iter().any(|s| s.name == name)
    }
}

/// All sessions behind one lock. Wallets are opened and closed outside it.
///
/// A wallet name is held by at most one session at a time; it is reserved
/// before the wallet is opened so two requests cannot both open it.
pub struct SessionRegistry {
    inner: Mutex<Registry>,
    wallets_dir: PathBuf,
}

impl SessionRegistry {
    pub fn new(wallets_dir: PathBuf) -> Self {
        Self {
            inner: Mutex::new(Registry::default()),
            wallets_dir,
        }
    }

    pub fn wallets_dir(&self) -> &Path {
        &self.wallets_dir
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn with_session<R>(
        &self,
        id: &str,
        f: impl FnOnce(&mut Session) -> R,
    ) -> Result<R, SessionError> {
        let mut inner = self.lock();
        Ok(f(inner.find_mut(id)?))
    }

    pub fn create(&self) -> String {
        let id = new_session_id();
        self.lock().sessions.push(Session::new(id.clone()));
        id
    }

    pub fn get(&self, id: &str) -> Result<Session, SessionError> {
        self.with_session(id, |s| s.clone())
    }

    pub fn exists(&self, id: &str) -> bool {
        self.lock().sessions.iter().any(|s| s.id == id)
    }

    pub fn len(&self) -> usize {
        self.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().sessions.is_empty()
    }

    pub fn wallet(&self, id: &str) -> Result<Arc<dyn Wallet>, SessionError> {
        self.with_session(id, |s| s.wallet.clone())?
            .ok_or(SessionError::NoWallet)
    }

    fn wallet_dir(&self, name: &str) -> Result<PathBuf, SessionError> {
        let valid = !name.is_empty()
            && name != "."
            && name != ".."
            && !name.contains(['/', '\\']);
        if !valid {
            return Err(SessionError::InvalidWalletName(name.to_string()));
        }
        Ok(self.wallets_dir.join(name))
    }

    /// Creates a new wallet in `<wallets>/<name>` and attaches it.
    pub fn attach_new_wallet<F>(
        &self,
        id: &str,
        name: &str,
        open: F,
    ) -> Result<Arc<dyn Wallet>, SessionError>
    where
        F: FnOnce(&Path) -> Result<Arc<dyn Wallet>, NodeError>,
    {
        self.attach(Some(id), name, true, open).map(|(_, wallet)| wallet)
    }

    /// Opens the wallet in `<wallets>/<name>` and attaches it.
    pub fn attach_existing_wallet<F>(
        &self,
        id: &str,
        name: &str,
        open: F,
    ) -> Result<Arc<dyn Wallet>, SessionError>
    where
        F: FnOnce(&Path) -> Result<Arc<dyn Wallet>, NodeError>,
    {
        self.attach(Some(id), name, false, open).map(|(_, wallet)| wallet)
    }

    /// Like [`attach_new_wallet`](Self::attach_new_wallet), but the session
    /// is only created once the wallet is open.
    pub fn create_with_new_wallet<F>(
        &self,
        name: &str,
        open: F,
    ) -> Result<(String, Arc<dyn Wallet>), SessionError>
    where
        F: FnOnce(&Path) -> Result<Arc<dyn Wallet>, NodeError>,
    {
        self.attach(None, name, true, open)
    }

    pub fn create_with_existing_wallet<F>(
        &self,
        name: &str,
        open: F,
    ) -> Result<(String, Arc<dyn Wallet>), SessionError>
    where
        F: FnOnce(&Path) -> Result<Arc<dyn Wallet>, NodeError>,
    {
        self.attach(None, name, false, open)
    }

    fn attach<F>(
        &self,
        id: Option<&str>,
        name: &str,
        create: bool,
        open: F,
    ) -> Result<(String, Arc<dyn Wallet>), SessionError>
    where
        F: FnOnce(&Path) -> Result<Arc<dyn Wallet>, NodeError>,
    {
        let dir = self.wallet_dir(name)?;
        self.reserve(id, name)?;
        let opened = if create && dir.exists() {
            Err(SessionError::WalletExists(name.to_string()))
        } else if !create && !dir.is_dir() {
            Err(SessionError::WalletMissing(name.to_string()))
        } else {
            open(&dir).map_err(SessionError::from)
        };
        match opened {
            Ok(wallet) => self.install(id, name, wallet),
            Err(e) => {
                self.lock().opening.remove(name);
                Err(e)
            }
        }
    }

    fn reserve(&self, id: Option<&str>, name: &str) -> Result<(), SessionError> {
        let mut inner = self.lock();
        if let Some(id) = id {
            if inner.find_mut(id)?.wallet.is_some() {
                return Err(SessionError::WalletAlreadyAttached);
            }
        }
        if inner.name_in_use(name) {
            return Err(SessionError::WalletInUse(name.to_string()));
        }
        inner.opening.insert(name.to_string());
        Ok(())
    }

    /// Stores a freshly opened wallet unless the session changed meanwhile.
    fn install(
        &self,
        id: Option<&str>,
        name: &str,
        wallet: Arc<dyn Wallet>,
    ) -> Result<(String, Arc<dyn Wallet>), SessionError> {
        let installed = {
            let mut inner = self.lock();
            inner.opening.remove(name);
            match id {
                Some(id) => inner.find_mut(id).and_then(|s| {
                    if s.wallet.is_some() {
                        return Err(SessionError::WalletAlreadyAttached);
                    }
                    s.wallet = Some(wallet.clone());
                    s.name = name.to_string();
                    Ok(s.id.clone())
                }),
                None => {
                    let mut session = Session::new(new_session_id());
                    session.wallet = Some(wallet.clone());
                    session.name = name.to_string();
                    let id = session.id.clone();
                    inner.sessions.push(session);
                    Ok(id)
                }
            }
        };
        match installed {
            Ok(id) => {
                info!("Wallet '{}' attached to session", name);
                Ok((id, wallet))
            }
            Err(e) => {
                if let Err(close_err) = wallet.close() {
                    warn!("Unable to close wallet '{}': {}", name, close_err);
                }
                Err(e)
            }
        }
    }

    /// Closes the session's wallet, if it has one.
    /// The name stays reserved until the wallet has closed.
    pub fn detach(&self, id: &str) -> Result<(), SessionError> {
        let (name, wallet) = {
            let mut inner = self.lock();
            let session = inner.find_mut(id)?;
            let name = std::mem::take(&mut session.name);
            let wallet = session.wallet.take();
            if wallet.is_some() {
                inner.opening.insert(name.clone());
            }
            (name, wallet)
        };
        if let Some(wallet) = wallet {
            let closed = wallet.close();
            self.lock().opening.remove(&name);
            closed?;
        }
        Ok(())
    }

    /// Closes every attached wallet, reporting all that failed.
    pub fn close_all(&self) -> Result<(), ShutdownError> {
        let wallets: Vec<(String, Arc<dyn Wallet>)> = self
            .lock()
            .sessions
            .iter_mut()
            .filter_map(|s| {
                let name = std::mem::take(&mut s.name);
                s.wallet.take().map(|w| (name, w))
            })
            .collect();

        let mut errors = ErrorList::new();
        for (name, wallet) in wallets {
            if let Err(e) = wallet.close() {
                warn!("Unable to close wallet '{}': {}", name, e);
                errors.push(format!("wallet {}", name), e);
            }
        }
        errors.into_result()
    }

    pub fn set_alert(&self, id: &str, message: impl Into<String>) -> Result<(), SessionError> {
        let message = message.into();
        self.with_session(id, |s| s.alert = Some(message))
    }

    pub fn pop_alert(&self, id: &str) -> Option<String> {
        self.with_session(id, |s| s.alert.take()).ok().flatten()
    }

    pub fn has_alert(&self, id: &str) -> bool {
        self.with_session(id, |s| s.alert.is_some()).unwrap_or(false)
    }

    pub fn collapse_menu(&self, id: &str) -> Result<(), SessionError> {
        self.with_session(id, |s| s.menu_collapsed = true)
    }

    pub fn expand_menu(&self, id: &str) -> Result<(), SessionError> {
        self.with_session(id, |s| s.menu_collapsed = false)
    }

    pub fn menu_is_collapsed(&self, id: &str) -> bool {
        self.with_session(id, |s| s.menu_collapsed).unwrap_or(true)
    }

    pub fn set_tx_history_page(&self, id: &str, page: usize) -> Result<(), SessionError> {
        self.with_session(id, |s| s.tx_history_page = page.max(1))
    }

    pub fn tx_history_page(&self, id: &str) -> Result<usize, SessionError> {
        self.with_session(id, |s| s.tx_history_page)
    }

    pub fn set_cached_page(&self, id: &str, page: String) -> Result<(), SessionError> {
        self.with_session(id, |s| s.cached_page = page)
    }

    pub fn cached_page(&self, id: &str) -> Result<String, SessionError> {
        self.with_session(id, |s| s.cached_page.clone())
    }
}
