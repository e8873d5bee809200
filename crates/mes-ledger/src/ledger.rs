//! 庫存帳本
//!
//! 每種物料一個帳戶（彙總列 + 異動列），異動只追加不修改。所有寫入都經由
//! [`StockLedger::transaction`] / [`StockLedger::transaction_many`]：先依物料代碼排序
//! 取得物料鎖，閉包回傳錯誤時整筆回滾，成功時才重算批次摘要。

use dashmap::DashMap;
use mes_core::{
    EngineConfig, Lot, LotTag, MaterialStock, MesError, MovementKind, MovementReason, Result,
    StockMovement,
};
use parking_lot::{Mutex, MutexGuard};
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::dirty_tracking::DirtyTracker;
use crate::lot_index::{recompute_summary, LotIndex};

/// 異動對庫存彙總的影響
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockEffect {
    /// 入庫：可用增加
    Receive,
    /// 直接出庫：可用減少
    Issue,
    /// 預留：可用轉入在製
    Reserve,
    /// 自在製退回可用
    ReturnFromWip,
}

impl StockEffect {
    fn expected_kind(self) -> MovementKind {
        match self {
            Self::Receive | Self::ReturnFromWip => MovementKind::In,
            Self::Issue | Self::Reserve => MovementKind::Out,
        }
    }
}

/// 物料帳戶
#[derive(Debug)]
struct MaterialAccount {
    stock: MaterialStock,
    movements: Vec<StockMovement>,
}

impl MaterialAccount {
    fn new(material_code: &str) -> Self {
        Self {
            stock: MaterialStock::new(material_code.to_string()),
            movements: Vec::new(),
        }
    }
}

/// 庫存帳本
pub struct StockLedger {
    accounts: DashMap<String, Arc<Mutex<MaterialAccount>>>,
    sequence: AtomicU64,
    lock_timeout: Duration,
}

impl StockLedger {
    /// 創建新的帳本
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            accounts: DashMap::new(),
            sequence: AtomicU64::new(0),
            lock_timeout: config.lock_timeout(),
        }
    }

    fn handle(&self, material_code: &str) -> Option<Arc<Mutex<MaterialAccount>>> {
        self.accounts
            .get(material_code)
            .map(|entry| Arc::clone(entry.value()))
    }

    fn account(&self, material_code: &str) -> Arc<Mutex<MaterialAccount>> {
        let entry = self
            .accounts
            .entry(material_code.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(MaterialAccount::new(material_code))));
        Arc::clone(entry.value())
    }

    /// 單一物料交易
    pub fn transaction<T, F>(&self, material_code: &str, f: F) -> Result<T>
    where
        F: FnOnce(&mut MaterialTx<'_>) -> Result<T>,
    {
        self.transaction_many(&[material_code], |tx| {
            let mut material = tx.material(material_code)?;
            f(&mut material)
        })
    }

    /// 多物料交易：依代碼排序加鎖，避免死結
    pub fn transaction_many<T, F>(&self, material_codes: &[&str], f: F) -> Result<T>
    where
        F: FnOnce(&mut LedgerTx<'_>) -> Result<T>,
    {
        let mut codes: Vec<&str> = material_codes.to_vec();
        codes.sort_unstable();
        codes.dedup();

        let handles: Vec<Arc<Mutex<MaterialAccount>>> =
            codes.iter().map(|code| self.account(code)).collect();

        let mut entries = Vec::with_capacity(handles.len());
        for (code, handle) in codes.iter().zip(&handles) {
            let guard = handle.try_lock_for(self.lock_timeout).ok_or_else(|| {
                tracing::warn!("物料 {} 等待鎖逾時 ({:?})", code, self.lock_timeout);
                MesError::conflict(code, "等待物料鎖逾時")
            })?;
            entries.push(TxEntry {
                saved_stock: guard.stock.clone(),
                saved_len: guard.movements.len(),
                guard,
            });
        }

        let mut tx = LedgerTx {
            entries,
            sequence: &self.sequence,
            dirty: DirtyTracker::new(),
        };

        match f(&mut tx) {
            Ok(value) => {
                tx.commit();
                Ok(value)
            }
            Err(err) => {
                tracing::debug!("交易回滾: {}", err);
                tx.rollback();
                Err(err)
            }
        }
    }

    /// 收貨入庫
    pub fn receive(
        &self,
        material_code: &str,
        quantity: Decimal,
        lot: Option<LotTag>,
    ) -> Result<StockMovement> {
        if quantity <= Decimal::ZERO {
            return Err(MesError::InvalidQuantity(format!(
                "入庫數量必須大於 0（目前為 {}）",
                quantity
            )));
        }

        let movement = self.transaction(material_code, |tx| {
            let mut movement = StockMovement::new(
                material_code.to_string(),
                MovementKind::In,
                MovementReason::Receipt,
                quantity,
            );
            if let Some(lot) = lot {
                movement = movement.with_lot(lot);
            }
            tx.post(movement, StockEffect::Receive)
        })?;

        tracing::info!(
            "物料 {} 入庫 {}（批號 {:?}），可用 {}",
            material_code,
            quantity,
            movement.lot_number(),
            movement.stock_after
        );
        Ok(movement)
    }

    /// 盤點/更正（以新增異動表示，不修改既有列）
    pub fn adjust(
        &self,
        material_code: &str,
        kind: MovementKind,
        quantity: Decimal,
        lot: Option<LotTag>,
    ) -> Result<StockMovement> {
        if quantity <= Decimal::ZERO {
            return Err(MesError::InvalidQuantity(format!(
                "更正數量必須大於 0（目前為 {}）",
                quantity
            )));
        }

        self.transaction(material_code, |tx| {
            let mut movement = StockMovement::new(
                material_code.to_string(),
                kind,
                MovementReason::Adjustment,
                quantity,
            );
            if let Some(lot) = lot {
                movement = movement.with_lot(lot);
            }
            let effect = match kind {
                MovementKind::In => StockEffect::Receive,
                MovementKind::Out => StockEffect::Issue,
            };
            tx.post(movement, effect)
        })
    }

    /// 物料庫存彙總（未登錄的物料視為零庫存）
    pub fn stock(&self, material_code: &str) -> MaterialStock {
        self.handle(material_code)
            .map(|handle| handle.lock().stock.clone())
            .unwrap_or_else(|| MaterialStock::new(material_code.to_string()))
    }

    /// 可用庫存
    pub fn available(&self, material_code: &str) -> Decimal {
        self.stock(material_code).available_qty
    }

    /// 物料的所有異動（依寫入順序）
    pub fn movements(&self, material_code: &str) -> Vec<StockMovement> {
        self.handle(material_code)
            .map(|handle| handle.lock().movements.clone())
            .unwrap_or_default()
    }

    /// 物料的所有批次（含已用盡者）
    pub fn lots(&self, material_code: &str) -> Vec<Lot> {
        self.handle(material_code)
            .map(|handle| LotIndex::build(&handle.lock().movements))
            .unwrap_or_default()
    }

    /// 某任務造成的所有異動
    pub fn movements_for_assignment(&self, assignment_id: &str) -> Vec<StockMovement> {
        let handles: Vec<_> = self
            .accounts
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut movements: Vec<StockMovement> = handles
            .iter()
            .flat_map(|handle| {
                handle
                    .lock()
                    .movements
                    .iter()
                    .filter(|m| m.assignment_id.as_deref() == Some(assignment_id))
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect();
        movements.sort_by_key(|m| m.sequence);
        movements
    }

    /// 追溯：哪些任務從此批次出庫
    pub fn lot_consumers(&self, material_code: &str, lot_number: &str) -> Vec<String> {
        let mut consumers: Vec<String> = Vec::new();
        for movement in self.movements(material_code) {
            if movement.kind != MovementKind::Out || movement.lot_number() != Some(lot_number) {
                continue;
            }
            if let Some(assignment_id) = movement.assignment_id {
                if !consumers.contains(&assignment_id) {
                    consumers.push(assignment_id);
                }
            }
        }
        consumers
    }

    /// 已登錄的物料代碼
    pub fn material_codes(&self) -> Vec<String> {
        let mut codes: Vec<String> = self.accounts.iter().map(|e| e.key().clone()).collect();
        codes.sort();
        codes
    }
}

impl Default for StockLedger {
    fn default() -> Self {
        Self::new(&EngineConfig::default())
    }
}

struct TxEntry<'a> {
    guard: MutexGuard<'a, MaterialAccount>,
    saved_stock: MaterialStock,
    saved_len: usize,
}

/// 帳本交易（持有所涉物料的鎖）
pub struct LedgerTx<'a> {
    entries: Vec<TxEntry<'a>>,
    sequence: &'a AtomicU64,
    dirty: DirtyTracker,
}

impl<'a> LedgerTx<'a> {
    /// 取得交易內某物料的操作介面
    pub fn material(&mut self, material_code: &str) -> Result<MaterialTx<'_>> {
        let entry = self
            .entries
            .iter_mut()
            .find(|entry| entry.guard.stock.material_code == material_code)
            .ok_or_else(|| {
                MesError::InvariantViolation(format!("物料 {} 未在此交易中加鎖", material_code))
            })?;

        Ok(MaterialTx {
            account: &mut *entry.guard,
            sequence: self.sequence,
            dirty: &mut self.dirty,
        })
    }

    /// 交易內的物料代碼
    pub fn material_codes(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|entry| entry.guard.stock.material_code.clone())
            .collect()
    }

    fn commit(mut self) {
        for entry in &mut self.entries {
            let material_code = entry.guard.stock.material_code.clone();
            if self.dirty.is_dirty(&material_code) {
                let summary = recompute_summary(&entry.guard.movements);
                tracing::debug!(
                    "物料 {} 批次摘要重算: 有效批次 {}, 最舊 {:?}, 最近到期 {:?}",
                    material_code,
                    summary.active_lot_count,
                    summary.oldest_lot_date,
                    summary.nearest_expiry_date
                );
                entry.guard.stock.lot_summary = summary;
            }
        }
        self.dirty.take();
    }

    fn rollback(mut self) {
        for entry in &mut self.entries {
            let saved_len = entry.saved_len;
            entry.guard.movements.truncate(saved_len);
            entry.guard.stock = entry.saved_stock.clone();
        }
    }
}

/// 交易內單一物料的操作介面
pub struct MaterialTx<'t> {
    account: &'t mut MaterialAccount,
    sequence: &'t AtomicU64,
    dirty: &'t mut DirtyTracker,
}

impl<'t> MaterialTx<'t> {
    /// 物料代碼
    pub fn material_code(&self) -> &str {
        &self.account.stock.material_code
    }

    /// 目前的庫存彙總（含本交易已寫入的變動）
    pub fn stock(&self) -> &MaterialStock {
        &self.account.stock
    }

    /// 目前可用庫存
    pub fn available(&self) -> Decimal {
        self.account.stock.available_qty
    }

    /// 目前的所有批次
    pub fn lots(&self) -> Vec<Lot> {
        LotIndex::build(&self.account.movements)
    }

    /// 不屬於任何批次的可用庫存
    pub fn unlotted(&self) -> Decimal {
        let lot_total: Decimal = self.lots().iter().map(|lot| lot.balance()).sum();
        (self.account.stock.available_qty - lot_total).max(Decimal::ZERO)
    }

    /// 依批號查找批次
    pub fn lot(&self, lot_number: &str) -> Option<Lot> {
        self.lots()
            .into_iter()
            .find(|lot| lot.lot_number == lot_number)
    }

    /// 寫入一筆異動並套用其庫存影響
    pub fn post(&mut self, mut movement: StockMovement, effect: StockEffect) -> Result<StockMovement> {
        if movement.material_code != self.account.stock.material_code {
            return Err(MesError::InvariantViolation(format!(
                "異動物料 {} 與交易物料 {} 不符",
                movement.material_code, self.account.stock.material_code
            )));
        }
        if movement.kind != effect.expected_kind() {
            return Err(MesError::InvariantViolation(format!(
                "異動方向 {:?} 與庫存影響 {:?} 不符",
                movement.kind, effect
            )));
        }
        movement.check()?;

        match (movement.kind, movement.lot.as_ref()) {
            (MovementKind::Out, Some(tag)) => {
                let balance = self
                    .lot(&tag.lot_number)
                    .map(|lot| lot.balance())
                    .unwrap_or(Decimal::ZERO);
                if movement.quantity > balance {
                    return Err(MesError::InvariantViolation(format!(
                        "批次 {} 出庫 {} 超過結餘 {}",
                        tag.lot_number, movement.quantity, balance
                    )));
                }
            }
            (MovementKind::Out, None) => {
                // 無批號出庫只能動用批次以外的庫存
                let unlotted = self.unlotted();
                if movement.quantity > unlotted {
                    return Err(MesError::InvalidQuantity(format!(
                        "無批號出庫 {} 超過非批次庫存 {}（可用 {}）",
                        movement.quantity,
                        unlotted,
                        self.account.stock.available_qty
                    )));
                }
            }
            (MovementKind::In, _) => {}
        }

        let stock = &mut self.account.stock;
        let stock_before = stock.available_qty;
        match effect {
            StockEffect::Receive => stock.receive(movement.quantity),
            StockEffect::Issue => stock.issue(movement.quantity)?,
            StockEffect::Reserve => stock.reserve(movement.quantity)?,
            StockEffect::ReturnFromWip => stock.settle_wip(movement.quantity, movement.quantity)?,
        }

        movement.sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        movement.stock_before = stock_before;
        movement.stock_after = stock.available_qty;

        if movement.lot.is_some() {
            self.dirty.mark_dirty(&movement.material_code);
        }

        tracing::debug!(
            "異動 #{} {} {:?} {} (批號 {:?}): {} → {}",
            movement.sequence,
            movement.material_code,
            movement.kind,
            movement.quantity,
            movement.lot_number(),
            movement.stock_before,
            movement.stock_after
        );

        self.account.movements.push(movement.clone());
        Ok(movement)
    }

    /// 在製耗用（不產生異動，數量已於預留時出庫）
    pub fn consume_wip(&mut self, quantity: Decimal) -> Result<()> {
        self.account.stock.settle_wip(quantity, Decimal::ZERO)
    }
}
