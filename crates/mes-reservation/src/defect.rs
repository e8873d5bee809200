//! 超耗記錄（超出預留的耗用只記在這裡，不進庫存帳）

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// 超耗記錄
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefectRecord {
    pub assignment_id: String,
    pub material_code: String,

    /// 回報的理論耗用量
    pub reported_qty: Decimal,

    /// 超出預留的數量
    pub excess_qty: Decimal,

    pub recorded_at: DateTime<Utc>,
}

/// 超耗記錄簿
#[derive(Debug, Default)]
pub struct DefectLog {
    records: Mutex<Vec<DefectRecord>>,
}

impl DefectLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一筆
    pub fn record(&self, assignment_id: &str, material_code: &str, reported: Decimal, excess: Decimal) {
        tracing::warn!(
            "任務 {} 物料 {} 超耗 {}（回報 {}）",
            assignment_id,
            material_code,
            excess,
            reported
        );
        self.records.lock().push(DefectRecord {
            assignment_id: assignment_id.to_string(),
            material_code: material_code.to_string(),
            reported_qty: reported,
            excess_qty: excess,
            recorded_at: Utc::now(),
        });
    }

    pub fn records(&self) -> Vec<DefectRecord> {
        self.records.lock().clone()
    }

    /// 某物料的超耗合計
    pub fn excess_total(&self, material_code: &str) -> Decimal {
        self.records
            .lock()
            .iter()
            .filter(|record| record.material_code == material_code)
            .map(|record| record.excess_qty)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_total() {
        let log = DefectLog::new();
        log.record("P/CUT", "STEEL-01", Decimal::from(120), Decimal::from(20));
        log.record("P/WELD", "STEEL-01", Decimal::from(15), Decimal::from(5));
        log.record("P/WELD", "WIRE-02", Decimal::from(9), Decimal::from(1));

        assert_eq!(log.records().len(), 3);
        assert_eq!(log.excess_total("STEEL-01"), Decimal::from(25));
    }
}
