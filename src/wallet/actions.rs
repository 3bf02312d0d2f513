//! What the user can do to a wallet from the browser.
//!
//! Validation failures come back as errors carrying the user-facing
//! message. Unlock, seed creation and restore run on a blocking task; its
//! failures reach the user as a session alert on the next page.

use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

use super::view::{Form, Page, TransactionView};
use super::{Rendered, WebWallet};
use crate::currency::{self, CoinType};
use crate::error::{NodeError, SessionError, WebWalletError};
use crate::node::types::{Address, TransactionId};
use crate::node::Wallet;
use crate::seed::{encryption_keys, CipherKey, SeedPhrase};
use crate::session::SessionRegistry;

const CHANGE_LOCK: &str = "Unable to change lock: ";
const INITIALIZE_SEED: &str = "Unable to initialize new wallet seed: ";
const LOCK_WALLET: &str = "Unable to lock wallet: ";
const RESTORE_SEED: &str = "Unable to restore wallet from seed: ";
const SEND_COINS: &str = "Unable to send coins: ";
const UNLOCK_WALLET: &str = "Unable to unlock wallet: ";
const RECOVER_SEED: &str = "Unable to recover seed: ";
const RETRIEVE_ADDRESS: &str = "Unable to retrieve address: ";
const RETRIEVE_TRANSACTION: &str = "Unable to retrieve the transaction: ";

const SCANNING: &str = "Scanning";
const INITIALIZING: &str = "Initializing";
const RESTORING: &str = "Restoring";

fn prefixed(prefix: &str, err: impl fmt::Display) -> WebWalletError {
    WebWalletError::Invalid(format!("{}{}", prefix, err))
}

/// Tries every key `password` may stand for until the wallet opens.
fn unlock_with(wallet: &dyn Wallet, password: &str) -> Result<bool, NodeError> {
    for key in encryption_keys(password) {
        if !wallet.unlocked()? {
            let _ = wallet.unlock(&key);
        }
    }
    wallet.unlocked()
}

/// True when `password` opens the wallet. Errors only if every key failed
/// to be checked.
fn is_password_valid(wallet: &dyn Wallet, password: &str) -> Result<bool, NodeError> {
    let mut last_err = None;
    for key in encryption_keys(password) {
        match wallet.is_master_key(&key) {
            Ok(valid) => return Ok(valid),
            Err(e) => last_err = Some(e),
        }
    }
    match last_err {
        Some(e) => Err(e),
        None => Ok(false),
    }
}

fn check_new_password(prefix: &str, new_password: &str, confirm: &str) -> Result<(), WebWalletError> {
    if new_password.is_empty() {
        return Err(prefixed(prefix, "A new password must be provided."));
    }
    if confirm.is_empty() {
        return Err(prefixed(prefix, "A confirmation password must be provided."));
    }
    if new_password != confirm {
        return Err(prefixed(prefix, "New password does not match confirmation password."));
    }
    Ok(())
}

/// Finishes a seed operation by opening the wallet with the new password.
fn unlock_after_seed(
    sessions: &SessionRegistry,
    session_id: &str,
    wallet: &dyn Wallet,
    password: &str,
    prefix: &str,
) {
    if let Err(e) = unlock_with(wallet, password) {
        let _ = sessions.set_alert(session_id, format!("{}{}", prefix, e));
    }
}

impl WebWallet {
    /// The wallet of a known session, opening `name` into it when it has
    /// none. Without a known session, one is created once the wallet opens.
    fn attached_or_open(
        &self,
        session_id: Option<&str>,
        name: &str,
    ) -> Result<(String, Arc<dyn Wallet>), SessionError> {
        let open = |dir: &std::path::Path| self.orchestrator.open_wallet(dir);
        match session_id.filter(|id| self.sessions.exists(id)) {
            Some(id) => match self.sessions.wallet(id) {
                Ok(wallet) => Ok((id.to_string(), wallet)),
                Err(SessionError::NoWallet) => self
                    .sessions
                    .attach_existing_wallet(id, name, open)
                    .map(|wallet| (id.to_string(), wallet)),
                Err(e) => Err(e),
            },
            None => self.sessions.create_with_existing_wallet(name, open),
        }
    }

    fn open_new(
        &self,
        session_id: Option<&str>,
        name: &str,
    ) -> Result<(String, Arc<dyn Wallet>), SessionError> {
        let open = |dir: &std::path::Path| self.orchestrator.open_wallet(dir);
        match session_id.filter(|id| self.sessions.exists(id)) {
            Some(id) => self
                .sessions
                .attach_new_wallet(id, name, open)
                .map(|wallet| (id.to_string(), wallet)),
            None => self.sessions.create_with_new_wallet(name, open),
        }
    }

    /// Gives back a wallet that turned out to be unusable.
    fn release(&self, session_id: &str) {
        if let Err(e) = self.sessions.detach(session_id) {
            warn!("Unable to close wallet: {}", e);
        }
    }

    /// The scanning page while the background task is still going,
    /// otherwise wherever the session is now.
    fn after_action(&self, session_id: &str) -> Rendered {
        match self.status.current() {
            Some(status) => self.render(session_id, Page::scanning(&status)),
            None => self.gui(Some(session_id)),
        }
    }

    pub async fn unlock(
        &self,
        session_id: Option<&str>,
        wallet_name: &str,
        password: &str,
    ) -> Result<Rendered, WebWalletError> {
        self.ensure_ready()?;
        if password.is_empty() {
            return Err(prefixed(UNLOCK_WALLET, "A password must be provided."));
        }
        let guard = self.status.begin(SCANNING)?;
        let (id, wallet) = self
            .attached_or_open(session_id, wallet_name)
            .map_err(|e| prefixed(UNLOCK_WALLET, e))?;

        let sessions = self.sessions.clone();
        let password = password.to_string();
        let task_id = id.clone();
        let task = tokio::task::spawn_blocking(move || {
            let _guard = guard;
            match unlock_with(wallet.as_ref(), &password) {
                Ok(true) => info!("Wallet unlocked"),
                Ok(false) => {
                    let _ = sessions.set_alert(&task_id, format!("{}Password is not valid.", UNLOCK_WALLET));
                }
                Err(e) => {
                    let _ = sessions.set_alert(&task_id, format!("{}{}", UNLOCK_WALLET, e));
                }
            }
        });
        self.wait_for_task(task).await;
        Ok(self.after_action(&id))
    }

    /// Creates a wallet named `wallet_name` with a fresh seed.
    pub async fn initialize_seed(
        &self,
        session_id: Option<&str>,
        wallet_name: &str,
        new_password: &str,
        confirm_password: &str,
    ) -> Result<Rendered, WebWalletError> {
        check_new_password(INITIALIZE_SEED, new_password, confirm_password)?;
        self.ensure_ready()?;
        let guard = self.status.begin(INITIALIZING)?;
        let (id, wallet) = self
            .open_new(session_id, wallet_name)
            .map_err(|e| prefixed(INITIALIZE_SEED, e))?;
        match wallet.encrypted() {
            Ok(false) => {}
            Ok(true) => {
                self.release(&id);
                return Err(prefixed(INITIALIZE_SEED, "Seed was already initialized."));
            }
            Err(e) => {
                self.release(&id);
                return Err(prefixed(INITIALIZE_SEED, e));
            }
        }

        let sessions = self.sessions.clone();
        let password = new_password.to_string();
        let task_id = id.clone();
        let task = tokio::task::spawn_blocking(move || {
            let _guard = guard;
            match wallet.encrypt(&CipherKey::from_password(&password)) {
                Ok(_) => {
                    info!("New wallet seed created");
                    unlock_after_seed(&sessions, &task_id, wallet.as_ref(), &password, INITIALIZE_SEED);
                }
                Err(e) => {
                    let _ = sessions.set_alert(&task_id, format!("{}{}", INITIALIZE_SEED, e));
                }
            }
        });
        self.wait_for_task(task).await;
        Ok(self.after_action(&id))
    }

    /// Creates a wallet named `wallet_name` from an existing seed.
    pub async fn restore_seed(
        &self,
        session_id: Option<&str>,
        wallet_name: &str,
        new_password: &str,
        confirm_password: &str,
        seed: &str,
    ) -> Result<Rendered, WebWalletError> {
        check_new_password(RESTORE_SEED, new_password, confirm_password)?;
        if seed.trim().is_empty() {
            return Err(prefixed(RESTORE_SEED, "A seed must be provided."));
        }
        self.ensure_ready()?;
        self.ensure_synced()?;
        let seed = SeedPhrase::parse(seed).map_err(|e| prefixed(RESTORE_SEED, e))?;
        let guard = self.status.begin(RESTORING)?;
        let (id, wallet) = self
            .open_new(session_id, wallet_name)
            .map_err(|e| prefixed(RESTORE_SEED, e))?;
        match wallet.encrypted() {
            Ok(false) => {}
            Ok(true) => {
                self.release(&id);
                return Err(prefixed(RESTORE_SEED, "Seed is already initialized."));
            }
            Err(e) => {
                self.release(&id);
                return Err(prefixed(RESTORE_SEED, e));
            }
        }

        let sessions = self.sessions.clone();
        let password = new_password.to_string();
        let task_id = id.clone();
        let task = tokio::task::spawn_blocking(move || {
            let _guard = guard;
            match wallet.init_from_seed(&CipherKey::from_password(&password), &seed) {
                Ok(()) => {
                    info!("Wallet restored from seed");
                    unlock_after_seed(&sessions, &task_id, wallet.as_ref(), &password, RESTORE_SEED);
                }
                Err(e) => {
                    let _ = sessions.set_alert(&task_id, format!("{}{}", RESTORE_SEED, e));
                }
            }
        });
        self.wait_for_task(task).await;
        Ok(self.after_action(&id))
    }

    fn ensure_synced(&self) -> Result<(), WebWalletError> {
        let synced = self
            .orchestrator
            .consensus_set()
            .map(|cs| cs.synced())
            .unwrap_or(false);
        if synced {
            Ok(())
        } else {
            Err(WebWalletError::Invalid(
                "Wallet must be syncronized with the network before it can be restored from a seed."
                    .to_string(),
            ))
        }
    }

    /// Polled while a background action runs.
    pub fn action_status(&self, session_id: Option<&str>) -> Rendered {
        let id = session_id.unwrap_or_default();
        if let Some(status) = self.status.current() {
            return self.render(id, Page::scanning(&status));
        }
        if !self.sessions.exists(id) {
            return self.render("", Page::unlock());
        }
        self.gui(Some(id))
    }

    /// Locks the wallet and closes it, leaving the session without one.
    pub fn lock_wallet(&self, session_id: Option<&str>) -> Result<Rendered, WebWalletError> {
        let (id, wallet) = match self.session_wallet(session_id) {
            Ok(found) => found,
            Err(WebWalletError::Session(SessionError::NoWallet)) => {
                return Err(prefixed(LOCK_WALLET, "Wallet was already locked."))
            }
            Err(e) => return Err(e),
        };
        if !wallet.unlocked().map_err(|e| prefixed(LOCK_WALLET, e))? {
            return Err(prefixed(LOCK_WALLET, "Wallet was already locked."));
        }
        wallet.lock().map_err(|e| prefixed(LOCK_WALLET, e))?;
        self.sessions
            .detach(&id)
            .map_err(|e| prefixed(LOCK_WALLET, e))?;
        info!("Wallet locked");
        Ok(self.gui(Some(&id)))
    }

    pub fn change_lock(
        &self,
        session_id: Option<&str>,
        original_password: &str,
        new_password: &str,
        confirm_password: &str,
    ) -> Result<Rendered, WebWalletError> {
        let (id, wallet) = self.session_wallet(session_id)?;
        if original_password.is_empty() {
            return Err(prefixed(CHANGE_LOCK, "The original password must be provided."));
        }
        if !is_password_valid(wallet.as_ref(), original_password).map_err(|e| prefixed(CHANGE_LOCK, e))? {
            return Err(prefixed(CHANGE_LOCK, "The original password is not valid."));
        }
        check_new_password(CHANGE_LOCK, new_password, confirm_password)?;
        let seed = wallet.primary_seed().map_err(|e| prefixed(CHANGE_LOCK, e))?;
        wallet
            .change_key_with_seed(&seed, &CipherKey::from_password(new_password))
            .map_err(|e| prefixed(CHANGE_LOCK, e))?;
        info!("Wallet lock changed");
        Ok(self.gui(Some(&id)))
    }

    /// Sends `amount` of `coin_type` (`SCP`, `SPF`, `SPF-A` or `SPF-B`) to
    /// `destination`.
    pub fn send(
        &self,
        session_id: Option<&str>,
        destination: &str,
        amount: &str,
        coin_type: &str,
    ) -> Result<Rendered, WebWalletError> {
        let (id, wallet) = self.session_wallet(session_id)?;
        if !wallet.unlocked().map_err(|e| prefixed(SEND_COINS, e))? {
            return Err(prefixed(SEND_COINS, "Wallet is locked."));
        }
        let dest =
            Address::parse(destination).map_err(|_| prefixed(SEND_COINS, "Destination is not valid."))?;
        let coin: CoinType = coin_type
            .parse()
            .map_err(|_| prefixed(SEND_COINS, "Coin type was not supplied."))?;
        let amount = currency::parse_for(coin, amount).map_err(|e| prefixed(SEND_COINS, e))?;

        let sent = match coin.siafund_class() {
            None => wallet.send_siacoins(&amount.value, &dest),
            Some(class) => wallet.send_siafunds(class, &amount.value, &dest),
        };
        match sent {
            Ok(ids) => info!("Sent {} {} in {} transaction(s)", amount.value, coin.label(), ids.len()),
            Err(e) => {
                warn!("Send failed: {}", e);
                return Err(prefixed(SEND_COINS, e));
            }
        }
        Ok(self.gui(Some(&id)))
    }

    pub fn recover_seed(&self, session_id: Option<&str>) -> Result<Rendered, WebWalletError> {
        let (id, wallet) = self.session_wallet(session_id)?;
        if !wallet.unlocked().map_err(|e| prefixed(RECOVER_SEED, e))? {
            return Err(prefixed(RECOVER_SEED, "Wallet is locked."));
        }
        let seed = wallet.primary_seed().map_err(|e| prefixed(RECOVER_SEED, e))?;
        Ok(self.render(&id, Page::message("RECOVER SEED", seed.as_str())))
    }

    /// The newest receive address, creating the first one if needed.
    pub fn receive_address(&self, session_id: Option<&str>) -> Result<Rendered, WebWalletError> {
        let (id, wallet) = self.session_wallet(session_id)?;
        let mut addresses = wallet
            .last_addresses(1)
            .map_err(|e| prefixed(RETRIEVE_ADDRESS, e))?;
        if addresses.is_empty() {
            addresses.push(wallet.next_address().map_err(|e| prefixed(RETRIEVE_ADDRESS, e))?);
        }
        let address = addresses
            .first()
            .ok_or_else(|| prefixed(RETRIEVE_ADDRESS, "wallet has no addresses"))?;
        Ok(self.render(&id, Page::message("RECEIVE", address.as_str().to_uppercase())))
    }

    pub fn transaction(
        &self,
        session_id: Option<&str>,
        transaction_id: &str,
    ) -> Result<Rendered, WebWalletError> {
        if !session_id.map(|id| self.sessions.exists(id)).unwrap_or(false) {
            return Ok(self.render("", Page::unlock()));
        }
        let (id, wallet) = self.session_wallet(session_id)?;
        let txid = transaction_id.trim();
        if txid.is_empty() {
            return Err(prefixed(RETRIEVE_TRANSACTION, "No transaction ID was provided."));
        }
        if !txid.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(prefixed(RETRIEVE_TRANSACTION, "Unable to parse transaction ID."));
        }
        let txn = wallet
            .transaction(&TransactionId::new(txid.to_lowercase()))
            .map_err(|e| prefixed(RETRIEVE_TRANSACTION, e))?
            .ok_or_else(|| prefixed(RETRIEVE_TRANSACTION, "Transaction was not found."))?;
        Ok(self.render(&id, Page::Transaction(TransactionView::from(&txn))))
    }

    pub fn set_history_page(&self, session_id: Option<&str>, page: usize) -> Rendered {
        match session_id.filter(|id| self.sessions.exists(id)) {
            Some(id) => {
                let _ = self.sessions.set_tx_history_page(id, page);
                self.gui(Some(id))
            }
            None => self.render("", Page::unlock()),
        }
    }

    pub fn expand_menu(&self, session_id: Option<&str>) -> Rendered {
        self.toggle_menu(session_id, false)
    }

    pub fn collapse_menu(&self, session_id: Option<&str>) -> Rendered {
        self.toggle_menu(session_id, true)
    }

    /// Re-renders the cached page with the menu in its new state.
    fn toggle_menu(&self, session_id: Option<&str>, collapsed: bool) -> Rendered {
        let Some(id) = session_id.filter(|id| self.sessions.exists(id)) else {
            return self.render("", Page::unlock());
        };
        let _ = if collapsed {
            self.sessions.collapse_menu(id)
        } else {
            self.sessions.expand_menu(id)
        };
        let cached = self
            .sessions
            .cached_page(id)
            .ok()
            .and_then(|page| serde_json::from_str::<Page>(&page).ok());
        match cached {
            Some(page) => self.render(id, page),
            None => self.gui(Some(id)),
        }
    }

    /// One of the input forms. Forms that act on a wallet need a session.
    pub fn show_form(&self, session_id: Option<&str>, form: Form) -> Result<Rendered, WebWalletError> {
        let title = match form {
            Form::UnlockWallet => "UNLOCK WALLET",
            Form::InitializeWallet => "INITIALIZE WALLET",
            Form::ScanningWallet => return Ok(self.action_status(session_id)),
            Form::CreateNewWallet => "CREATE NEW WALLET",
            Form::RestoreFromSeed => {
                self.ensure_synced()?;
                "RESTORE FROM SEED"
            }
            Form::ChangeLock => "CHANGE LOCK",
            Form::SendCoins => "SEND",
            Form::ExplainWhale => "WHAT WHALE ARE YOU?",
        };
        let needs_session = matches!(form, Form::ChangeLock | Form::SendCoins | Form::ExplainWhale);
        let id = session_id.filter(|id| self.sessions.exists(id));
        if needs_session && id.is_none() {
            return Err(SessionError::UnknownSession.into());
        }
        Ok(self.render(id.unwrap_or_default(), Page::form(title, form)))
    }

    pub fn privacy(&self, session_id: Option<&str>) -> Rendered {
        self.render(session_id.unwrap_or_default(), Page::Privacy)
    }
}
