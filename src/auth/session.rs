// 账号会话上下文
//
// 持有当前已连接的各平台账号，所有修改同步写入 AccountStore

use super::store::AccountStore;
use super::types::{Account, Platform, RefreshedTokens};
use anyhow::Result;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// 会话上下文
pub struct Session {
    accounts: RwLock<HashMap<Platform, Account>>,
    store: Arc<dyn AccountStore>,
}

impl Session {
    /// 创建空会话
    pub fn new(store: Arc<dyn AccountStore>) -> Self {
        Self {
            accounts: RwLock::new(HashMap::new()),
            store,
        }
    }

    /// 从存储恢复所有平台账号
    ///
    /// 单个平台读取失败只记录警告，不影响其他平台
    pub fn restore(store: Arc<dyn AccountStore>) -> Self {
        let session = Self::new(store);
        {
            let mut accounts = session.accounts.write();
            for platform in Platform::ALL {
                match session.store.load(platform) {
                    Ok(Some(account)) => {
                        info!("已恢复 {} 账号: {}", platform, account.id);
                        accounts.insert(platform, account);
                    }
                    Ok(None) => {}
                    Err(e) => warn!("恢复 {} 账号失败: {:#}", platform, e),
                }
            }
        }
        session
    }

    /// 当前账号快照
    pub fn account(&self, platform: Platform) -> Option<Account> {
        self.accounts.read().get(&platform).cloned()
    }

    pub fn is_connected(&self, platform: Platform) -> bool {
        self.accounts.read().contains_key(&platform)
    }

    /// 所有已连接账号
    pub fn accounts(&self) -> Vec<Account> {
        Platform::ALL
            .iter()
            .filter_map(|p| self.account(*p))
            .collect()
    }

    /// 连接账号（替换同平台旧账号）
    pub fn connect(&self, account: Account) -> Result<()> {
        self.store.save(&account)?;
        info!("已连接 {} 账号: {}", account.platform(), account.id);
        self.accounts.write().insert(account.platform(), account);
        Ok(())
    }

    /// 断开账号
    pub fn disconnect(&self, platform: Platform) -> Result<Option<Account>> {
        self.store.clear(platform)?;
        let removed = self.accounts.write().remove(&platform);
        if removed.is_some() {
            info!("已断开 {} 账号", platform);
        }
        Ok(removed)
    }

    /// 合并刷新结果并持久化
    ///
    /// `account_id` 用于确认账号在刷新期间没有被替换；
    /// 被替换或已断开时丢弃结果并返回 None
    pub fn apply_refresh(
        &self,
        platform: Platform,
        account_id: &str,
        tokens: &RefreshedTokens,
    ) -> Result<Option<Account>> {
        let updated = {
            let mut accounts = self.accounts.write();
            let Some(account) = accounts.get_mut(&platform) else {
                warn!("{} 账号已断开，丢弃刷新结果", platform);
                return Ok(None);
            };
            if account.id != account_id {
                warn!(
                    "{} 账号已更换 ({} -> {})，丢弃刷新结果",
                    platform, account_id, account.id
                );
                return Ok(None);
            }
            account.apply_refresh(tokens);
            account.clone()
        };

        self.store.save(&updated)?;
        Ok(Some(updated))
    }
}
