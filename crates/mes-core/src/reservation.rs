//! 物料預留模型（每個任務 × 物料一列）

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{MesError, Result};

/// 預留狀態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationStatus {
    /// 已計劃（尚未動用庫存）
    Pending,
    /// 已預留（庫存已鎖定）
    Reserved,
    /// 已耗用
    Consumed,
    /// 已釋放（任務取消）
    Released,
}

impl ReservationStatus {
    /// 是否允許轉換到目標狀態
    pub fn can_transition_to(self, next: ReservationStatus) -> bool {
        use ReservationStatus::*;
        matches!(
            (self, next),
            (Pending, Reserved) | (Pending, Released) | (Reserved, Consumed) | (Reserved, Released)
        )
    }

    /// 是否為終態
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Consumed | Self::Released)
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::Reserved => "reserved",
            Self::Consumed => "consumed",
            Self::Released => "released",
        };
        f.write_str(label)
    }
}

/// 預留鍵（任務, 物料）
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReservationKey {
    pub assignment_id: String,
    pub material_code: String,
}

impl ReservationKey {
    pub fn new(assignment_id: impl Into<String>, material_code: impl Into<String>) -> Self {
        Self {
            assignment_id: assignment_id.into(),
            material_code: material_code.into(),
        }
    }
}

/// 單一批次的扣量（預留時從哪個批次取了多少）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotDraw {
    /// 批號；`None` 表示取自未標示批次的庫存
    pub lot_number: Option<String>,

    /// 批次日期
    pub lot_date: Option<NaiveDate>,

    /// 扣量
    pub quantity: Decimal,
}

/// 物料預留
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaterialReservation {
    /// 任務ID
    pub assignment_id: String,

    /// 物料代碼
    pub material_code: String,

    /// 所屬計劃
    pub plan_id: Option<String>,

    /// 所屬計劃節點
    pub node_id: Option<String>,

    /// 計劃用量（BOM 展開）
    pub pre_production_qty: Decimal,

    /// 實際預留量（開工時）
    pub actual_reserved_qty: Option<Decimal>,

    /// 實際耗用量（完工時）
    pub consumed_qty: Option<Decimal>,

    /// 狀態
    pub reservation_status: ReservationStatus,

    /// 主要批號（追溯用）
    pub lot_number: Option<String>,

    /// 各批次扣量，依扣取順序
    pub lot_draws: Vec<LotDraw>,

    /// 是否為部分預留
    pub partial_reservation: bool,

    /// 短缺警告
    pub warning: Option<String>,

    /// 建立時間
    pub created_at: DateTime<Utc>,

    /// 更新時間
    pub updated_at: DateTime<Utc>,
}

impl MaterialReservation {
    /// 創建新的計劃中預留
    pub fn pending(
        assignment_id: impl Into<String>,
        material_code: impl Into<String>,
        pre_production_qty: Decimal,
    ) -> Result<Self> {
        let assignment_id = assignment_id.into();
        let material_code = material_code.into();
        if pre_production_qty <= Decimal::ZERO {
            return Err(MesError::InvalidQuantity(format!(
                "任務 {} 物料 {} 的計劃用量必須大於 0（目前為 {}）",
                assignment_id, material_code, pre_production_qty
            )));
        }

        let now = Utc::now();
        Ok(Self {
            assignment_id,
            material_code,
            plan_id: None,
            node_id: None,
            pre_production_qty,
            actual_reserved_qty: None,
            consumed_qty: None,
            reservation_status: ReservationStatus::Pending,
            lot_number: None,
            lot_draws: Vec::new(),
            partial_reservation: false,
            warning: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// 建構器模式：設置來源計劃節點
    pub fn with_plan_node(mut self, plan_id: impl Into<String>, node_id: impl Into<String>) -> Self {
        self.plan_id = Some(plan_id.into());
        self.node_id = Some(node_id.into());
        self
    }

    /// 預留鍵
    pub fn key(&self) -> ReservationKey {
        ReservationKey::new(self.assignment_id.clone(), self.material_code.clone())
    }

    /// 已預留但尚未決算的數量
    pub fn outstanding_qty(&self) -> Decimal {
        match self.reservation_status {
            ReservationStatus::Reserved => self.actual_reserved_qty.unwrap_or(Decimal::ZERO),
            _ => Decimal::ZERO,
        }
    }

    fn transition(&mut self, next: ReservationStatus) -> Result<()> {
        if !self.reservation_status.can_transition_to(next) {
            return Err(MesError::InvalidTransition {
                from: self.reservation_status,
                to: next,
            });
        }
        self.reservation_status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// 轉為已預留
    pub fn mark_reserved(
        &mut self,
        actual_reserved_qty: Decimal,
        lot_draws: Vec<LotDraw>,
        warning: Option<String>,
    ) -> Result<()> {
        if actual_reserved_qty > self.pre_production_qty {
            return Err(MesError::InvariantViolation(format!(
                "任務 {} 物料 {} 預留量 {} 超過計劃用量 {}",
                self.assignment_id, self.material_code, actual_reserved_qty, self.pre_production_qty
            )));
        }
        let drawn: Decimal = lot_draws.iter().map(|draw| draw.quantity).sum();
        if drawn != actual_reserved_qty {
            return Err(MesError::InvariantViolation(format!(
                "批次扣量合計 {} 與預留量 {} 不符",
                drawn, actual_reserved_qty
            )));
        }

        self.transition(ReservationStatus::Reserved)?;
        self.actual_reserved_qty = Some(actual_reserved_qty);
        self.lot_number = lot_draws.iter().find_map(|draw| draw.lot_number.clone());
        self.lot_draws = lot_draws;
        self.partial_reservation = actual_reserved_qty < self.pre_production_qty;
        self.warning = warning;
        self.check_invariants()
    }

    /// 轉為已耗用
    pub fn mark_consumed(&mut self, consumed_qty: Decimal) -> Result<()> {
        let reserved = self.actual_reserved_qty.unwrap_or(Decimal::ZERO);
        if consumed_qty > reserved {
            return Err(MesError::InvariantViolation(format!(
                "任務 {} 物料 {} 耗用量 {} 超過預留量 {}",
                self.assignment_id, self.material_code, consumed_qty, reserved
            )));
        }
        self.transition(ReservationStatus::Consumed)?;
        self.consumed_qty = Some(consumed_qty);
        self.check_invariants()
    }

    /// 轉為已釋放
    pub fn mark_released(&mut self) -> Result<()> {
        self.transition(ReservationStatus::Released)
    }

    /// 檢查 0 ≤ consumed ≤ actual_reserved ≤ pre_production
    pub fn check_invariants(&self) -> Result<()> {
        let violation = |detail: String| {
            Err(MesError::InvariantViolation(format!(
                "任務 {} 物料 {}: {}",
                self.assignment_id, self.material_code, detail
            )))
        };

        if self.pre_production_qty <= Decimal::ZERO {
            return violation(format!("計劃用量必須大於 0（{}）", self.pre_production_qty));
        }
        if let Some(reserved) = self.actual_reserved_qty {
            if reserved < Decimal::ZERO || reserved > self.pre_production_qty {
                return violation(format!(
                    "預留量 {} 不在 0..={} 之間",
                    reserved, self.pre_production_qty
                ));
            }
        }
        if let Some(consumed) = self.consumed_qty {
            let reserved = self.actual_reserved_qty.unwrap_or(Decimal::ZERO);
            if consumed < Decimal::ZERO || consumed > reserved {
                return violation(format!("耗用量 {} 不在 0..={} 之間", consumed, reserved));
            }
        }
        match self.reservation_status {
            ReservationStatus::Reserved if self.actual_reserved_qty.is_none() => {
                violation("已預留狀態缺少預留量".to_string())
            }
            ReservationStatus::Consumed if self.consumed_qty.is_none() => {
                violation("已耗用狀態缺少耗用量".to_string())
            }
            _ => Ok(()),
        }
    }
}
