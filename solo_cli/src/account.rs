use std::collections::BTreeMap;
use std::sync::Arc;

use crate::app::App;
use crate::kube::ResourceRef;
use crate::settings::flags;
use super::Result;

/// Secret carrying the operator account used for ledger transactions.
const OPERATOR_SECRET: &str = "solo-operator";

/// `solo account init`
///
/// Create the operator account and store its id in the deployment
/// namespace. Account commands touch the ledger, not the remote state, so
/// no lease is taken.
pub fn init(app: &Arc<App>) -> Result<()> {
    let target = app.target()?;
    let secret = ResourceRef::new(target.namespace.clone(), OPERATOR_SECRET)?;
    if target.kube.secrets().read(&secret).is_ok() {
        info!("operator account already initialized");
        return Ok(());
    }
    let account = app.ledger.create_account(0)?;
    let mut labels = BTreeMap::new();
    labels.insert("app.kubernetes.io/managed-by".to_string(), "solo".to_string());
    let mut data = BTreeMap::new();
    data.insert("accountId".to_string(), account.clone());
    target.kube.secrets().create(&secret, labels, data)?;
    info!("operator account {} stored in {}", account, secret);
    Ok(())
}

/// `solo account create`
pub fn create(app: &Arc<App>) -> Result<()> {
    let _ = app.target()?;
    let balance: u64 = app
        .settings
        .get(flags::INITIAL_BALANCE)
        .map(|v| v.parse())
        .unwrap_or(Ok(0))?;
    let account = app.ledger.create_account(balance)?;
    println!(
        "{}",
        json!({ "accountId": account, "balance": balance })
    );
    Ok(())
}

/// `solo account update`
pub fn update(app: &Arc<App>) -> Result<()> {
    let _ = app.target()?;
    let account = app.settings.require(flags::ACCOUNT_ID)?;
    let memo = app.settings.get(flags::MEMO).unwrap_or_default();
    app.ledger.update_account(&account, &memo)?;
    info!("updated account {}", account);
    Ok(())
}

/// `solo account get`
pub fn get(app: &Arc<App>) -> Result<()> {
    let _ = app.target()?;
    let account = app.settings.require(flags::ACCOUNT_ID)?;
    let balance = app.ledger.account_balance(&account)?;
    println!(
        "{}",
        json!({ "accountId": account, "balance": balance })
    );
    Ok(())
}
