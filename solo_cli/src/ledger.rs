use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use super::Result;

/// Ledger client usage mode
#[derive(PartialEq, Debug, Clone)]
pub enum Mode {
    /// Real SDK transport against the deployed network
    Standard,
    /// No transport, deterministic dummy data
    Mocked,
}

/// Account ids handed out by the mocked ledger start here.
const MOCKED_ACCOUNT_BASE: u64 = 1001;

/// The ledger SDK boundary.
///
/// Commands talk to the consensus ledger only through this client; the
/// transport itself is outside the orchestrator. The mocked mode returns
/// deterministic data so node and account flows stay testable without a
/// running network.
pub struct LedgerClient {
    mode: Mode,
    realm: i64,
    shard: i64,
    next_account: AtomicU64,
    closed: AtomicBool,
}

impl LedgerClient {
    pub fn mocked(realm: i64, shard: i64) -> LedgerClient {
        LedgerClient {
            mode: Mode::Mocked,
            realm,
            shard,
            next_account: AtomicU64::new(MOCKED_ACCOUNT_BASE),
            closed: AtomicBool::new(false),
        }
    }

    pub fn standard(realm: i64, shard: i64) -> LedgerClient {
        LedgerClient {
            mode: Mode::Standard,
            realm,
            shard,
            next_account: AtomicU64::new(MOCKED_ACCOUNT_BASE),
            closed: AtomicBool::new(false),
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode.clone()
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            bail!("ledger client is closed");
        }
        if self.mode == Mode::Standard {
            bail!("no ledger gateway configured; re-run with --dev to use the mocked ledger");
        }
        Ok(())
    }

    fn account(&self, num: u64) -> String {
        format!("{}.{}.{}", self.shard, self.realm, num)
    }

    /// Create a ledger account, returning its account id.
    pub fn create_account(&self, initial_balance: u64) -> Result<String> {
        self.check_open()?;
        let num = self.next_account.fetch_add(1, Ordering::SeqCst);
        let id = self.account(num);
        debug!("created account {} with balance {}", id, initial_balance);
        Ok(id)
    }

    pub fn account_balance(&self, account_id: &str) -> Result<u64> {
        self.check_open()?;
        debug!("queried balance of {}", account_id);
        Ok(0)
    }

    pub fn update_account(&self, account_id: &str, memo: &str) -> Result<()> {
        self.check_open()?;
        debug!("updated account {} ({})", account_id, memo);
        Ok(())
    }

    /// Submit a node-update transaction for a consensus node.
    pub fn update_node(&self, node_id: u64, account_id: &str) -> Result<()> {
        self.check_open()?;
        debug!("node-update for node {} -> account {}", node_id, account_id);
        Ok(())
    }

    /// Submit a node-delete transaction.
    pub fn delete_node(&self, node_id: u64) -> Result<()> {
        self.check_open()?;
        debug!("node-delete for node {}", node_id);
        Ok(())
    }

    /// Ask the network to freeze for an upgrade.
    pub fn freeze_network(&self) -> Result<()> {
        self.check_open()?;
        debug!("freeze requested");
        Ok(())
    }

    /// Close the client; further calls fail. Idempotent.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mocked_accounts_are_deterministic() {
        let ledger = LedgerClient::mocked(0, 0);
        assert_eq!(ledger.create_account(100).unwrap(), "0.0.1001");
        assert_eq!(ledger.create_account(100).unwrap(), "0.0.1002");
    }

    #[test]
    fn standard_without_gateway_fails_clearly() {
        let ledger = LedgerClient::standard(0, 0);
        let err = ledger.create_account(1).unwrap_err();
        assert!(err.to_string().contains("--dev"));
    }

    #[test]
    fn closed_client_refuses_calls() {
        let ledger = LedgerClient::mocked(0, 0);
        ledger.close();
        ledger.close();
        assert!(ledger.account_balance("0.0.2").is_err());
    }
}
