//! 批次扣量規劃
//!
//! 預覽（唯讀）與提交（寫入）分開；提交時會在物料鎖內重新計算預覽，結果不同即視為
//! 預覽過期並回傳並發衝突，由呼叫端以最新資料重試。

use chrono::{NaiveDate, Utc};
use mes_core::{EngineConfig, Lot, MesError, MovementKind, MovementReason, Result, StockMovement};
use mes_ledger::{LotIndex, StockEffect, StockLedger};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// 單一批次的扣量
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotAllocation {
    pub lot_number: String,
    pub lot_date: NaiveDate,
    pub expiry_date: Option<NaiveDate>,

    /// 本批扣量
    pub consume_qty: Decimal,

    /// 扣量前的批次結餘
    pub available_qty: Decimal,
}

/// 扣量預覽
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotPreview {
    /// 物料代碼
    pub material_code: String,

    /// 需求量
    pub required_qty: Decimal,

    /// 依挑選順序的扣量
    pub lots_to_consume: Vec<LotAllocation>,

    /// 可挑選批次的結餘合計
    pub total_available: Decimal,

    /// 批次是否足以滿足需求
    pub sufficient: bool,

    /// 預覽基準日（判斷過期）
    pub as_of: NaiveDate,
}

impl LotPreview {
    /// 已分配量
    pub fn allocated_qty(&self) -> Decimal {
        self.lots_to_consume.iter().map(|lot| lot.consume_qty).sum()
    }

    /// 短缺量
    pub fn shortage_qty(&self) -> Decimal {
        (self.required_qty - self.allocated_qty()).max(Decimal::ZERO)
    }

    /// 扣量內容是否相同（忽略基準日）
    pub fn same_allocation(&self, other: &LotPreview) -> bool {
        self.material_code == other.material_code
            && self.required_qty == other.required_qty
            && self.lots_to_consume == other.lots_to_consume
    }
}

/// 依排序後批次貪婪分配（最舊優先）
pub fn allocate(
    material_code: &str,
    lots: &[Lot],
    required_qty: Decimal,
    as_of: NaiveDate,
) -> LotPreview {
    let total_available: Decimal = lots.iter().map(Lot::balance).sum();
    let mut remaining = required_qty.max(Decimal::ZERO);
    let mut lots_to_consume = Vec::new();

    for lot in lots {
        if remaining <= Decimal::ZERO {
            break;
        }
        let balance = lot.balance();
        if balance <= Decimal::ZERO {
            continue;
        }
        let consume_qty = remaining.min(balance);
        remaining -= consume_qty;
        lots_to_consume.push(LotAllocation {
            lot_number: lot.lot_number.clone(),
            lot_date: lot.lot_date,
            expiry_date: lot.expiry_date,
            consume_qty,
            available_qty: balance,
        });
    }

    LotPreview {
        material_code: material_code.to_string(),
        required_qty,
        lots_to_consume,
        total_available,
        sufficient: remaining <= Decimal::ZERO,
        as_of,
    }
}

/// 批次扣量規劃器
pub struct LotConsumptionPlanner {
    ledger: Arc<StockLedger>,
    config: EngineConfig,
}

impl LotConsumptionPlanner {
    /// 創建規劃器
    pub fn new(ledger: Arc<StockLedger>, config: EngineConfig) -> Self {
        Self { ledger, config }
    }

    /// 依配置排序可挑選批次
    pub fn selectable_lots(&self, lots: Vec<Lot>, as_of: NaiveDate) -> Vec<Lot> {
        LotIndex::selectable(lots, &self.config, as_of)
    }

    /// 預覽（以今日為基準日）
    pub fn preview(&self, material_code: &str, required_qty: Decimal) -> Result<LotPreview> {
        self.preview_as_of(material_code, required_qty, Utc::now().date_naive())
    }

    /// 預覽（指定基準日）
    pub fn preview_as_of(
        &self,
        material_code: &str,
        required_qty: Decimal,
        as_of: NaiveDate,
    ) -> Result<LotPreview> {
        if required_qty < Decimal::ZERO {
            return Err(MesError::InvalidQuantity(format!(
                "需求量不可為負: {}",
                required_qty
            )));
        }

        let lots = self.selectable_lots(self.ledger.lots(material_code), as_of);
        let preview = allocate(material_code, &lots, required_qty, as_of);

        tracing::debug!(
            "物料 {} 預覽: 需求 {}, 可用批次 {} 個共 {}, 足夠: {}",
            material_code,
            required_qty,
            lots.len(),
            preview.total_available,
            preview.sufficient
        );
        Ok(preview)
    }

    /// 提交預覽：每個分配批次寫入一筆出庫異動
    pub fn commit(&self, preview: &LotPreview, assignment_id: &str) -> Result<Vec<StockMovement>> {
        let material_code = preview.material_code.as_str();

        let movements = self.ledger.transaction(material_code, |tx| {
            let lots = self.selectable_lots(tx.lots(), preview.as_of);
            let fresh = allocate(material_code, &lots, preview.required_qty, preview.as_of);
            if !fresh.same_allocation(preview) {
                return Err(MesError::conflict(material_code, "批次預覽已過期"));
            }

            let mut movements = Vec::with_capacity(fresh.lots_to_consume.len());
            for allocation in &fresh.lots_to_consume {
                let tag = lots
                    .iter()
                    .find(|lot| lot.lot_number == allocation.lot_number)
                    .map(Lot::tag)
                    .ok_or_else(|| {
                        MesError::InvariantViolation(format!(
                            "批次 {} 不在可挑選清單",
                            allocation.lot_number
                        ))
                    })?;
                let movement = StockMovement::new(
                    material_code.to_string(),
                    MovementKind::Out,
                    MovementReason::LotIssue,
                    allocation.consume_qty,
                )
                .with_lot(tag)
                .with_assignment(assignment_id)
                .with_requested_quantity(preview.required_qty);
                movements.push(tx.post(movement, StockEffect::Issue)?);
            }
            Ok(movements)
        })?;

        tracing::info!(
            "任務 {} 物料 {} 批次出庫 {} 筆",
            assignment_id,
            material_code,
            movements.len()
        );
        Ok(movements)
    }
}
