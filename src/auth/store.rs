//! 账号持久化
//!
//! 令牌生命周期管理只依赖 [`AccountStore`] trait，存储介质可替换：
//! - [`JsonFileAccountStore`]：所有平台账号保存在同一个 JSON 文件
//! - [`MemoryAccountStore`]：仅存于内存，用于测试和临时会话

use super::types::{Account, Platform};
use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// 账号持久化接口
pub trait AccountStore: Send + Sync {
    /// 读取平台账号，不存在时返回 None
    fn load(&self, platform: Platform) -> Result<Option<Account>>;

    /// 保存账号（覆盖同平台旧记录）
    fn save(&self, account: &Account) -> Result<()>;

    /// 清除平台账号
    fn clear(&self, platform: Platform) -> Result<()>;
}

type AccountMap = HashMap<Platform, Account>;

/// JSON 文件账号存储
///
/// 文件内容为 `{ "youtube": {...}, "tiktok": {...} }`
pub struct JsonFileAccountStore {
    path: PathBuf,
    // 串行化读改写
    lock: Mutex<()>,
}

impl JsonFileAccountStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<AccountMap> {
        if !self.path.exists() {
            return Ok(AccountMap::new());
        }

        let file = File::open(&self.path)
            .with_context(|| format!("打开账号文件失败: {:?}", self.path))?;
        let accounts: AccountMap = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("解析账号文件失败: {:?}", self.path))?;

        Ok(accounts)
    }

    fn write_all(&self, accounts: &AccountMap) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("创建账号目录失败: {:?}", parent))?;
            }
        }

        // 先写临时文件再重命名，避免写入中断留下损坏的文件
        let temp_path = self.path.with_extension("json.tmp");
        let file = File::create(&temp_path)
            .with_context(|| format!("创建临时文件失败: {:?}", temp_path))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, accounts).context("序列化账号失败")?;
        writer.flush()?;
        drop(writer);

        fs::rename(&temp_path, &self.path)
            .with_context(|| format!("写入账号文件失败: {:?}", self.path))?;

        Ok(())
    }
}

impl AccountStore for JsonFileAccountStore {
    fn load(&self, platform: Platform) -> Result<Option<Account>> {
        let _guard = self.lock.lock();
        let mut accounts = self.read_all()?;
        let account = accounts.remove(&platform);

        if let Some(account) = &account {
            if account.platform() != platform {
                warn!(
                    "账号文件中 {} 条目的资料平台不匹配，已忽略: {}",
                    platform,
                    account.platform()
                );
                return Ok(None);
            }
        }

        Ok(account)
    }

    fn save(&self, account: &Account) -> Result<()> {
        let _guard = self.lock.lock();
        let mut accounts = self.read_all()?;
        accounts.insert(account.platform(), account.clone());
        self.write_all(&accounts)?;

        debug!("已保存 {} 账号: {}", account.platform(), account.id);
        Ok(())
    }

    fn clear(&self, platform: Platform) -> Result<()> {
        let _guard = self.lock.lock();
        let mut accounts = self.read_all()?;
        if accounts.remove(&platform).is_some() {
            self.write_all(&accounts)?;
            debug!("已清除 {} 账号", platform);
        }
        Ok(())
    }
}

/// 内存账号存储
#[derive(Default)]
pub struct MemoryAccountStore {
    accounts: Mutex<AccountMap>,
    saves: Mutex<usize>,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 预置账号
    pub fn with_account(account: Account) -> Self {
        let store = Self::default();
        store.accounts.lock().insert(account.platform(), account);
        store
    }

    /// 累计 `save` 调用次数
    pub fn save_count(&self) -> usize {
        *self.saves.lock()
    }

    pub fn get(&self, platform: Platform) -> Option<Account> {
        self.accounts.lock().get(&platform).cloned()
    }
}

impl AccountStore for MemoryAccountStore {
    fn load(&self, platform: Platform) -> Result<Option<Account>> {
        Ok(self.get(platform))
    }

    fn save(&self, account: &Account) -> Result<()> {
        self.accounts
            .lock()
            .insert(account.platform(), account.clone());
        *self.saves.lock() += 1;
        Ok(())
    }

    fn clear(&self, platform: Platform) -> Result<()> {
        self.accounts.lock().remove(&platform);
        Ok(())
    }
}
