//! 預留表：每個 (任務, 物料) 一列
//!
//! 寫入前先在副本上完成狀態轉換與不變量檢查，成功後才整列寫回，因此呼叫端的交易
//! 失敗時不會留下半更新的列。

use mes_core::{MaterialReservation, MesError, ReservationKey, Result};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// 預留表
#[derive(Debug, Default)]
pub struct ReservationBook {
    rows: Mutex<BTreeMap<ReservationKey, MaterialReservation>>,
}

impl ReservationBook {
    /// 創建空的預留表
    pub fn new() -> Self {
        Self::default()
    }

    /// 整批新增（任一列重複則全部不寫入）
    pub fn insert_all(&self, reservations: Vec<MaterialReservation>) -> Result<()> {
        let mut rows = self.rows.lock();

        let mut seen = std::collections::BTreeSet::new();
        for reservation in &reservations {
            let key = reservation.key();
            if rows.contains_key(&key) || !seen.insert(key.clone()) {
                return Err(MesError::DuplicateReservation {
                    assignment_id: key.assignment_id,
                    material_code: key.material_code,
                });
            }
        }

        for reservation in reservations {
            rows.insert(reservation.key(), reservation);
        }
        Ok(())
    }

    /// 取得一列
    pub fn get(&self, key: &ReservationKey) -> Option<MaterialReservation> {
        self.rows.lock().get(key).cloned()
    }

    /// 取得一列，不存在時回傳錯誤
    pub fn require(&self, key: &ReservationKey) -> Result<MaterialReservation> {
        self.get(key).ok_or_else(|| MesError::ReservationNotFound {
            assignment_id: key.assignment_id.clone(),
            material_code: key.material_code.clone(),
        })
    }

    /// 寫回已檢查過的列
    pub fn store(&self, reservation: MaterialReservation) {
        self.rows.lock().insert(reservation.key(), reservation);
    }

    /// 整批寫回
    pub fn store_all(&self, reservations: Vec<MaterialReservation>) {
        let mut rows = self.rows.lock();
        for reservation in reservations {
            rows.insert(reservation.key(), reservation);
        }
    }

    /// 任務的所有列（依物料代碼）
    pub fn by_assignment(&self, assignment_id: &str) -> Vec<MaterialReservation> {
        self.rows
            .lock()
            .values()
            .filter(|row| row.assignment_id == assignment_id)
            .cloned()
            .collect()
    }

    /// 物料的所有列
    pub fn by_material(&self, material_code: &str) -> Vec<MaterialReservation> {
        self.rows
            .lock()
            .values()
            .filter(|row| row.material_code == material_code)
            .cloned()
            .collect()
    }

    /// 物料目前的在製預留合計
    pub fn outstanding_total(&self, material_code: &str) -> Decimal {
        self.rows
            .lock()
            .values()
            .filter(|row| row.material_code == material_code)
            .map(MaterialReservation::outstanding_qty)
            .sum()
    }

    /// 所有列
    pub fn all(&self) -> Vec<MaterialReservation> {
        self.rows.lock().values().cloned().collect()
    }

    /// 列數
    pub fn len(&self) -> usize {
        self.rows.lock().len()
    }

    /// 是否為空
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(assignment: &str, material: &str, qty: i64) -> MaterialReservation {
        MaterialReservation::pending(assignment, material, Decimal::from(qty)).unwrap()
    }

    #[test]
    fn test_insert_all_is_atomic() {
        let book = ReservationBook::new();
        book.insert_all(vec![row("P/CUT", "STEEL-01", 10)]).unwrap();

        let result = book.insert_all(vec![
            row("P/WELD", "WIRE-02", 5),
            row("P/CUT", "STEEL-01", 10),
        ]);

        assert!(matches!(result, Err(MesError::DuplicateReservation { .. })));
        assert_eq!(book.len(), 1);
    }

    #[test]
    fn test_duplicate_inside_one_batch() {
        let book = ReservationBook::new();

        let result = book.insert_all(vec![row("P/CUT", "STEEL-01", 10), row("P/CUT", "STEEL-01", 3)]);

        assert!(result.is_err());
        assert!(book.is_empty());
    }

    #[test]
    fn test_queries() {
        let book = ReservationBook::new();
        book.insert_all(vec![
            row("P/CUT", "STEEL-01", 10),
            row("P/CUT", "BOLT-M8", 40),
            row("P/WELD", "STEEL-01", 2),
        ])
        .unwrap();

        let cut: Vec<_> = book
            .by_assignment("P/CUT")
            .into_iter()
            .map(|r| r.material_code)
            .collect();
        assert_eq!(cut, vec!["BOLT-M8", "STEEL-01"]);
        assert_eq!(book.by_material("STEEL-01").len(), 2);
        assert_eq!(book.outstanding_total("STEEL-01"), Decimal::ZERO);

        let missing = ReservationKey::new("P/PAINT", "STEEL-01");
        assert!(matches!(
            book.require(&missing),
            Err(MesError::ReservationNotFound { .. })
        ));
    }
}
