//! 批次模型（由入庫異動推導，不單獨儲存）

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::movement::LotTag;

/// 批次
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lot {
    /// 物料代碼
    pub material_code: String,

    /// 批號
    pub lot_number: String,

    /// 批次日期（取首筆入庫）
    pub lot_date: NaiveDate,

    /// 有效期限
    pub expiry_date: Option<NaiveDate>,

    /// 供應商批號
    pub supplier_lot_code: Option<String>,

    /// 製造日期
    pub manufacturing_date: Option<NaiveDate>,

    /// 累計入庫
    pub total_in: Decimal,

    /// 累計出庫
    pub total_out: Decimal,

    /// 首筆入庫的帳本序號
    pub first_sequence: u64,
}

impl Lot {
    /// 批次結餘
    pub fn balance(&self) -> Decimal {
        self.total_in - self.total_out
    }

    /// 結餘大於 0 才算有效批次
    pub fn is_active(&self) -> bool {
        self.balance() > Decimal::ZERO
    }

    /// 在指定日期是否已過期
    pub fn is_expired(&self, as_of: NaiveDate) -> bool {
        self.expiry_date.is_some_and(|expiry| expiry < as_of)
    }

    /// 出庫時附帶的批次標籤
    pub fn tag(&self) -> LotTag {
        LotTag {
            lot_number: self.lot_number.clone(),
            lot_date: self.lot_date,
            supplier_lot_code: self.supplier_lot_code.clone(),
            manufacturing_date: self.manufacturing_date,
            expiry_date: self.expiry_date,
        }
    }
}

/// 物料的批次摘要（反正規化欄位）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotSummary {
    /// 有效批次數
    pub active_lot_count: usize,

    /// 最舊有效批次日期
    pub oldest_lot_date: Option<NaiveDate>,

    /// 最近到期日
    pub nearest_expiry_date: Option<NaiveDate>,
}

impl LotSummary {
    /// 依有效批次重新計算摘要
    pub fn from_lots<'a>(lots: impl IntoIterator<Item = &'a Lot>) -> Self {
        let mut summary = Self::default();
        for lot in lots.into_iter().filter(|lot| lot.is_active()) {
            summary.active_lot_count += 1;
            summary.oldest_lot_date = Some(match summary.oldest_lot_date {
                Some(date) => date.min(lot.lot_date),
                None => lot.lot_date,
            });
            if let Some(expiry) = lot.expiry_date {
                summary.nearest_expiry_date = Some(match summary.nearest_expiry_date {
                    Some(date) => date.min(expiry),
                    None => expiry,
                });
            }
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lot(number: &str, date: (i32, u32, u32), total_in: i64, total_out: i64) -> Lot {
        Lot {
            material_code: "RESIN-01".to_string(),
            lot_number: number.to_string(),
            lot_date: NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap(),
            expiry_date: None,
            supplier_lot_code: None,
            manufacturing_date: None,
            total_in: Decimal::from(total_in),
            total_out: Decimal::from(total_out),
            first_sequence: 0,
        }
    }

    #[test]
    fn test_lot_balance_and_activity() {
        let open = lot("L-1", (2025, 11, 1), 100, 40);
        assert_eq!(open.balance(), Decimal::from(60));
        assert!(open.is_active());

        let exhausted = lot("L-2", (2025, 11, 2), 100, 100);
        assert!(!exhausted.is_active());
    }

    #[test]
    fn test_expiry() {
        let mut perishable = lot("L-1", (2025, 11, 1), 10, 0);
        perishable.expiry_date = NaiveDate::from_ymd_opt(2025, 12, 1);

        assert!(!perishable.is_expired(NaiveDate::from_ymd_opt(2025, 12, 1).unwrap()));
        assert!(perishable.is_expired(NaiveDate::from_ymd_opt(2025, 12, 2).unwrap()));
    }

    #[test]
    fn test_summary_ignores_exhausted_lots() {
        let mut newer = lot("L-2", (2025, 11, 15), 200, 0);
        newer.expiry_date = NaiveDate::from_ymd_opt(2026, 3, 1);
        let mut older_exhausted = lot("L-0", (2025, 10, 1), 50, 50);
        older_exhausted.expiry_date = NaiveDate::from_ymd_opt(2025, 12, 1);
        let older = lot("L-1", (2025, 11, 1), 100, 0);

        let summary = LotSummary::from_lots(&[newer, older_exhausted, older]);

        assert_eq!(summary.active_lot_count, 2);
        assert_eq!(summary.oldest_lot_date, NaiveDate::from_ymd_opt(2025, 11, 1));
        assert_eq!(summary.nearest_expiry_date, NaiveDate::from_ymd_opt(2026, 3, 1));
    }
}
