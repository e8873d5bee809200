//! 批次索引：由帶批號的庫存異動推導批次與結餘

use chrono::NaiveDate;
use mes_core::{
    EngineConfig, Lot, LotSelectionPolicy, LotSummary, LotTieBreak, MovementKind, StockMovement,
};
use rust_decimal::Decimal;
use std::cmp::Ordering;
use std::collections::HashMap;

/// 批次索引
pub struct LotIndex;

impl LotIndex {
    /// 依異動建立批次清單（依首筆入庫順序）
    pub fn build(movements: &[StockMovement]) -> Vec<Lot> {
        let mut lots: Vec<Lot> = Vec::new();
        let mut positions: HashMap<&str, usize> = HashMap::new();

        for movement in movements {
            let Some(tag) = movement.lot.as_ref() else {
                continue;
            };

            let position = *positions.entry(tag.lot_number.as_str()).or_insert_with(|| {
                lots.push(Lot {
                    material_code: movement.material_code.clone(),
                    lot_number: tag.lot_number.clone(),
                    lot_date: tag.lot_date,
                    expiry_date: tag.expiry_date,
                    supplier_lot_code: tag.supplier_lot_code.clone(),
                    manufacturing_date: tag.manufacturing_date,
                    total_in: Decimal::ZERO,
                    total_out: Decimal::ZERO,
                    first_sequence: movement.sequence,
                });
                lots.len() - 1
            });

            let lot = &mut lots[position];
            match movement.kind {
                MovementKind::In => lot.total_in += movement.quantity,
                MovementKind::Out => lot.total_out += movement.quantity,
            }
        }

        lots
    }

    /// 可供挑選的批次：有結餘、（依配置）未過期，並依挑選策略排序
    pub fn selectable(lots: Vec<Lot>, config: &EngineConfig, as_of: NaiveDate) -> Vec<Lot> {
        let mut selectable: Vec<Lot> = lots
            .into_iter()
            .filter(Lot::is_active)
            .filter(|lot| !(config.exclude_expired_lots && lot.is_expired(as_of)))
            .collect();
        selectable.sort_by(|a, b| Self::compare(a, b, config));
        selectable
    }

    /// 挑選順序比較
    pub fn compare(a: &Lot, b: &Lot, config: &EngineConfig) -> Ordering {
        let primary = match config.lot_selection {
            LotSelectionPolicy::Fifo => a.lot_date.cmp(&b.lot_date),
            LotSelectionPolicy::Fefo => {
                // 無有效期限者排最後
                let by_expiry = match (a.expiry_date, b.expiry_date) {
                    (Some(x), Some(y)) => x.cmp(&y),
                    (Some(_), None) => Ordering::Less,
                    (None, Some(_)) => Ordering::Greater,
                    (None, None) => Ordering::Equal,
                };
                by_expiry.then(a.lot_date.cmp(&b.lot_date))
            }
        };

        primary.then_with(|| match config.lot_tie_break {
            LotTieBreak::InsertionOrder => a.first_sequence.cmp(&b.first_sequence),
            LotTieBreak::LotNumber => a.lot_number.cmp(&b.lot_number),
        })
    }
}

/// 重新計算物料的批次摘要
pub fn recompute_summary(movements: &[StockMovement]) -> LotSummary {
    let lots = LotIndex::build(movements);
    LotSummary::from_lots(&lots)
}
