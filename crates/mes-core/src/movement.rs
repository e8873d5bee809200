//! 庫存異動模型

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{MesError, Result};

/// 異動方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MovementKind {
    /// 入庫
    In,
    /// 出庫
    Out,
}

/// 異動原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MovementReason {
    /// 收貨入庫
    Receipt,
    /// 任務開工預留
    Reservation,
    /// 完工後退回未耗用數量
    ConsumptionReturn,
    /// 任務取消釋放
    Release,
    /// 依批次直接領用
    LotIssue,
    /// 盤點/更正
    Adjustment,
}

/// 批次資訊
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotTag {
    /// 批號
    pub lot_number: String,

    /// 批次日期（FIFO 排序依據）
    pub lot_date: NaiveDate,

    /// 供應商批號
    pub supplier_lot_code: Option<String>,

    /// 製造日期
    pub manufacturing_date: Option<NaiveDate>,

    /// 有效期限
    pub expiry_date: Option<NaiveDate>,
}

impl LotTag {
    /// 創建新的批次資訊
    pub fn new(lot_number: impl Into<String>, lot_date: NaiveDate) -> Self {
        Self {
            lot_number: lot_number.into(),
            lot_date,
            supplier_lot_code: None,
            manufacturing_date: None,
            expiry_date: None,
        }
    }

    /// 建構器模式：設置供應商批號
    pub fn with_supplier_lot_code(mut self, code: impl Into<String>) -> Self {
        self.supplier_lot_code = Some(code.into());
        self
    }

    /// 建構器模式：設置製造日期
    pub fn with_manufacturing_date(mut self, date: NaiveDate) -> Self {
        self.manufacturing_date = Some(date);
        self
    }

    /// 建構器模式：設置有效期限
    pub fn with_expiry_date(mut self, date: NaiveDate) -> Self {
        self.expiry_date = Some(date);
        self
    }
}

/// 庫存異動（只追加，不修改；更正以新增一筆表示）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockMovement {
    /// 異動ID
    pub id: Uuid,

    /// 帳本序號（寫入順序）
    pub sequence: u64,

    /// 物料代碼
    pub material_code: String,

    /// 異動方向
    pub kind: MovementKind,

    /// 異動原因
    pub reason: MovementReason,

    /// 異動數量
    pub quantity: Decimal,

    /// 異動前可用庫存
    pub stock_before: Decimal,

    /// 異動後可用庫存
    pub stock_after: Decimal,

    /// 批次資訊
    pub lot: Option<LotTag>,

    /// 觸發此異動的任務
    pub assignment_id: Option<String>,

    /// 原始請求數量（預留時）
    pub requested_quantity: Option<Decimal>,

    /// 是否為部分預留
    pub partial_reservation: bool,

    /// 人類可讀的警告
    pub warning: Option<String>,

    /// 建立時間
    pub created_at: DateTime<Utc>,
}

impl StockMovement {
    /// 創建新的庫存異動（序號與前後庫存由帳本於寫入時填入）
    pub fn new(
        material_code: String,
        kind: MovementKind,
        reason: MovementReason,
        quantity: Decimal,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            sequence: 0,
            material_code,
            kind,
            reason,
            quantity,
            stock_before: Decimal::ZERO,
            stock_after: Decimal::ZERO,
            lot: None,
            assignment_id: None,
            requested_quantity: None,
            partial_reservation: false,
            warning: None,
            created_at: Utc::now(),
        }
    }

    /// 建構器模式：設置批次
    pub fn with_lot(mut self, lot: LotTag) -> Self {
        self.lot = Some(lot);
        self
    }

    /// 建構器模式：設置任務
    pub fn with_assignment(mut self, assignment_id: impl Into<String>) -> Self {
        self.assignment_id = Some(assignment_id.into());
        self
    }

    /// 建構器模式：設置請求數量
    pub fn with_requested_quantity(mut self, requested: Decimal) -> Self {
        self.requested_quantity = Some(requested);
        self
    }

    /// 建構器模式：標記部分預留
    pub fn with_partial_warning(mut self, warning: impl Into<String>) -> Self {
        self.partial_reservation = true;
        self.warning = Some(warning.into());
        self
    }

    /// 批號（若有）
    pub fn lot_number(&self) -> Option<&str> {
        self.lot.as_ref().map(|lot| lot.lot_number.as_str())
    }

    /// 帶正負號的數量（入庫為正，出庫為負）
    pub fn signed_quantity(&self) -> Decimal {
        match self.kind {
            MovementKind::In => self.quantity,
            MovementKind::Out => -self.quantity,
        }
    }

    /// 檢查列層級約束
    pub fn check(&self) -> Result<()> {
        if self.quantity < Decimal::ZERO {
            return Err(MesError::InvalidQuantity(format!(
                "異動數量不可為負: {}",
                self.quantity
            )));
        }

        if self.partial_reservation {
            let requested = self.requested_quantity.ok_or_else(|| {
                MesError::InvariantViolation("部分預留必須記錄請求數量".to_string())
            })?;
            if self.quantity >= requested {
                return Err(MesError::InvariantViolation(format!(
                    "部分預留數量 {} 必須小於請求數量 {}",
                    self.quantity, requested
                )));
            }
            if self.warning.as_deref().map_or(true, str::is_empty) {
                return Err(MesError::InvariantViolation(
                    "部分預留必須附帶警告訊息".to_string(),
                ));
            }
        }

        Ok(())
    }
}
