//! # MES Reservation
//!
//! 物料預留引擎（計劃 → 預留 → 耗用/釋放）與批次先進先出扣量

pub mod book;
pub mod defect;
pub mod engine;
pub mod lot_planner;

// Re-export 主要類型
pub use book::ReservationBook;
pub use defect::{DefectLog, DefectRecord};
pub use engine::MaterialReservationEngine;
pub use lot_planner::{LotAllocation, LotConsumptionPlanner, LotPreview};

use mes_core::StockMovement;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// 缺料警告（部分預留屬預期結果，不是錯誤）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShortageWarning {
    pub material_code: String,
    pub requested: Decimal,
    pub reserved: Decimal,
    pub shortage: Decimal,
}

impl ShortageWarning {
    /// 依請求與實際預留量建立警告
    pub fn new(material_code: impl Into<String>, requested: Decimal, reserved: Decimal) -> Self {
        Self {
            material_code: material_code.into(),
            requested,
            reserved,
            shortage: requested - reserved,
        }
    }

    /// 寫入異動列與預留列的警告文字
    pub fn message(&self) -> String {
        format!(
            "Partial reservation: requested {}, reserved {} (shortage {})",
            self.requested.normalize(),
            self.reserved.normalize(),
            self.shortage.normalize()
        )
    }
}

/// 預留結果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReserveOutcome {
    /// 實際預留量
    pub actual_reserved_qty: Decimal,

    /// 是否部分預留
    pub partial_reservation: bool,

    /// 警告文字
    pub warning: Option<String>,

    /// 缺料明細
    pub shortage: Option<ShortageWarning>,

    /// 本次寫入的異動
    pub movements: Vec<StockMovement>,
}

/// 耗用結果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumeOutcome {
    /// 以預留量封頂後的耗用量
    pub capped_consumed_qty: Decimal,

    /// 是否被封頂
    pub was_capped: bool,

    /// 退回可用庫存的剩餘量
    pub leftover_qty: Decimal,

    /// 超出預留的耗用（不入帳）
    pub excess_qty: Decimal,

    /// 退回異動
    pub movements: Vec<StockMovement>,
}

/// 單一物料的釋放明細
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleasedMaterial {
    pub material_code: String,
    pub returned_qty: Decimal,
}

/// 釋放結果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseOutcome {
    /// 任務ID
    pub assignment_id: String,

    /// 退回庫存的物料
    pub released: Vec<ReleasedMaterial>,

    /// 尚未預留、直接取消的物料
    pub cancelled_pending: Vec<String>,

    /// 退回異動
    pub movements: Vec<StockMovement>,
}

impl ReleaseOutcome {
    /// 退回總量
    pub fn total_returned(&self) -> Decimal {
        self.released.iter().map(|r| r.returned_qty).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shortage_message() {
        let warning = ShortageWarning::new("STEEL-01", Decimal::from(150), Decimal::from(100));

        assert_eq!(warning.shortage, Decimal::from(50));
        assert_eq!(
            warning.message(),
            "Partial reservation: requested 150, reserved 100 (shortage 50)"
        );
    }

    #[test]
    fn test_shortage_message_trims_scale() {
        let warning = ShortageWarning::new("RESIN-01", Decimal::new(12_500, 2), Decimal::new(10_000, 2));

        assert_eq!(
            warning.message(),
            "Partial reservation: requested 125, reserved 100 (shortage 25)"
        );
    }
}
