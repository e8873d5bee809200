//! 引擎配置模型

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{MesError, Result};

/// 批次挑選策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LotSelectionPolicy {
    /// 先進先出：依批次日期由舊到新
    #[default]
    Fifo,
    /// 先到期先出：依有效期限由近到遠，無期限者排最後
    Fefo,
}

/// 同日批次的次要排序鍵
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LotTieBreak {
    /// 依批次首次入庫順序
    #[default]
    InsertionOrder,
    /// 依批號字典順序
    LotNumber,
}

/// 超耗處理策略（實際耗用超過已預留數量時）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ExcessConsumptionPolicy {
    /// 只在結果中回報，不留記錄
    #[default]
    Discard,
    /// 另寫一筆不良/損耗記錄（不產生庫存異動）
    RecordDefect,
}

/// 引擎配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// 批次挑選策略
    pub lot_selection: LotSelectionPolicy,

    /// 同日批次排序
    pub lot_tie_break: LotTieBreak,

    /// 是否略過已過期批次
    pub exclude_expired_lots: bool,

    /// 超耗處理策略
    pub excess_consumption: ExcessConsumptionPolicy,

    /// 物料鎖等待上限（毫秒），逾時視為並發衝突
    pub lock_timeout_ms: u64,

    /// 節點與作業都未指定效率時的預設值
    pub default_efficiency: Decimal,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lot_selection: LotSelectionPolicy::Fifo,
            lot_tie_break: LotTieBreak::InsertionOrder,
            exclude_expired_lots: false,
            excess_consumption: ExcessConsumptionPolicy::Discard,
            lock_timeout_ms: 5_000,
            default_efficiency: Decimal::ONE,
        }
    }
}

impl EngineConfig {
    /// 從 JSON 載入配置，未提供的欄位使用預設值
    pub fn from_json(raw: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(raw).map_err(|e| MesError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// 檢查配置是否合理
    pub fn validate(&self) -> Result<()> {
        if self.default_efficiency <= Decimal::ZERO {
            return Err(MesError::Config(format!(
                "預設效率必須大於 0（目前為 {}）",
                self.default_efficiency
            )));
        }
        if self.lock_timeout_ms == 0 {
            return Err(MesError::Config("鎖等待上限不可為 0".to_string()));
        }
        Ok(())
    }

    /// 建構器模式：設置批次挑選策略
    pub fn with_lot_selection(mut self, policy: LotSelectionPolicy) -> Self {
        self.lot_selection = policy;
        self
    }

    /// 建構器模式：設置同日批次排序
    pub fn with_lot_tie_break(mut self, tie_break: LotTieBreak) -> Self {
        self.lot_tie_break = tie_break;
        self
    }

    /// 建構器模式：設置是否略過過期批次
    pub fn with_exclude_expired_lots(mut self, exclude: bool) -> Self {
        self.exclude_expired_lots = exclude;
        self
    }

    /// 建構器模式：設置超耗處理策略
    pub fn with_excess_consumption(mut self, policy: ExcessConsumptionPolicy) -> Self {
        self.excess_consumption = policy;
        self
    }

    /// 建構器模式：設置鎖等待上限
    pub fn with_lock_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.lock_timeout_ms = timeout_ms;
        self
    }

    /// 建構器模式：設置預設效率
    pub fn with_default_efficiency(mut self, efficiency: Decimal) -> Self {
        self.default_efficiency = efficiency;
        self
    }

    /// 鎖等待上限
    pub fn lock_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.lock_timeout_ms)
    }
}
