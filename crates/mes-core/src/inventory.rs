//! 物料庫存彙總模型

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::lot::LotSummary;
use crate::{MesError, Result};

/// 物料庫存彙總列（每種物料一列，預留/耗用時以此列加鎖）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialStock {
    /// 物料代碼
    pub material_code: String,

    /// 可用庫存
    pub available_qty: Decimal,

    /// 在製預留（已鎖定、尚未耗用）
    pub wip_reserved_qty: Decimal,

    /// 批次摘要
    pub lot_summary: LotSummary,
}

impl MaterialStock {
    /// 創建空的庫存彙總
    pub fn new(material_code: String) -> Self {
        Self {
            material_code,
            available_qty: Decimal::ZERO,
            wip_reserved_qty: Decimal::ZERO,
            lot_summary: LotSummary::default(),
        }
    }

    /// 帳面總量（可用 + 在製預留）
    pub fn on_hand_qty(&self) -> Decimal {
        self.available_qty + self.wip_reserved_qty
    }

    /// 入庫
    pub fn receive(&mut self, quantity: Decimal) {
        self.available_qty += quantity;
    }

    /// 出庫（不經預留，例如盤虧或直接領用）
    pub fn issue(&mut self, quantity: Decimal) -> Result<()> {
        if quantity > self.available_qty {
            return Err(MesError::InvalidQuantity(format!(
                "庫存不足：需要 {}, 可用 {}",
                quantity, self.available_qty
            )));
        }
        self.available_qty -= quantity;
        Ok(())
    }

    /// 預留：可用轉入在製
    pub fn reserve(&mut self, quantity: Decimal) -> Result<()> {
        if quantity > self.available_qty {
            return Err(MesError::InvariantViolation(format!(
                "預留數量超過可用庫存：預留 {}, 可用 {}",
                quantity, self.available_qty
            )));
        }
        self.available_qty -= quantity;
        self.wip_reserved_qty += quantity;
        Ok(())
    }

    /// 在製減少；`returned` 部分退回可用庫存，其餘視為已耗用
    pub fn settle_wip(&mut self, wip_qty: Decimal, returned: Decimal) -> Result<()> {
        if wip_qty > self.wip_reserved_qty {
            return Err(MesError::InvariantViolation(format!(
                "釋放數量超過在製預留：釋放 {}, 在製 {}",
                wip_qty, self.wip_reserved_qty
            )));
        }
        if returned > wip_qty {
            return Err(MesError::InvariantViolation(format!(
                "退回數量 {} 超過在製釋放數量 {}",
                returned, wip_qty
            )));
        }
        self.wip_reserved_qty -= wip_qty;
        self.available_qty += returned;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_stock() {
        let stock = MaterialStock::new("STEEL-01".to_string());

        assert_eq!(stock.material_code, "STEEL-01");
        assert_eq!(stock.available_qty, Decimal::ZERO);
        assert_eq!(stock.on_hand_qty(), Decimal::ZERO);
    }

    #[test]
    fn test_reserve_and_settle() {
        let mut stock = MaterialStock::new("STEEL-01".to_string());
        stock.receive(Decimal::from(150));

        // 預留
        assert!(stock.reserve(Decimal::from(100)).is_ok());
        assert_eq!(stock.available_qty, Decimal::from(50));
        assert_eq!(stock.wip_reserved_qty, Decimal::from(100));
        assert_eq!(stock.on_hand_qty(), Decimal::from(150));

        // 超量預留應該失敗
        assert!(stock.reserve(Decimal::from(60)).is_err());

        // 完工：耗用 80，退回 20
        assert!(stock.settle_wip(Decimal::from(100), Decimal::from(20)).is_ok());
        assert_eq!(stock.wip_reserved_qty, Decimal::ZERO);
        assert_eq!(stock.available_qty, Decimal::from(70));
    }

    #[test]
    fn test_settle_more_than_wip_fails() {
        let mut stock = MaterialStock::new("STEEL-01".to_string());
        stock.receive(Decimal::from(10));
        stock.reserve(Decimal::from(10)).unwrap();

        assert!(stock.settle_wip(Decimal::from(11), Decimal::ZERO).is_err());
        assert!(stock.settle_wip(Decimal::from(5), Decimal::from(6)).is_err());
    }

    #[test]
    fn test_issue() {
        let mut stock = MaterialStock::new("STEEL-01".to_string());
        stock.receive(Decimal::from(10));

        assert!(stock.issue(Decimal::from(11)).is_err());
        assert!(stock.issue(Decimal::from(4)).is_ok());
        assert_eq!(stock.available_qty, Decimal::from(6));
    }
}
