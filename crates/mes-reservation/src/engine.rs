//! 物料預留引擎
//!
//! 生命週期：計劃（pending）→ 預留（reserved）→ 耗用（consumed）或釋放（released）。
//! 所有庫存讀寫都在 [`StockLedger`] 的物料鎖內完成；預留表在物料鎖之後才加鎖，
//! 且只在交易閉包的最後一步寫回。

use chrono::{NaiveDate, Utc};
use mes_core::{
    EngineConfig, ExcessConsumptionPolicy, LotDraw, LotTag, MaterialReservation, MesError,
    MovementKind, MovementReason, ProductionPlan, ReservationKey, ReservationStatus, Result,
    StockMovement,
};
use mes_ledger::{MaterialTx, StockEffect, StockLedger};
use mes_plan::EntityRelationStore;
use rust_decimal::Decimal;
use std::sync::Arc;

use crate::lot_planner::{allocate, LotConsumptionPlanner, LotPreview};
use crate::{
    ConsumeOutcome, DefectLog, DefectRecord, ReleaseOutcome, ReleasedMaterial, ReservationBook,
    ReserveOutcome, ShortageWarning,
};

/// 物料預留引擎
pub struct MaterialReservationEngine {
    ledger: Arc<StockLedger>,
    planner: LotConsumptionPlanner,
    book: ReservationBook,
    defects: DefectLog,
    config: EngineConfig,
}

impl MaterialReservationEngine {
    /// 創建預留引擎
    pub fn new(ledger: Arc<StockLedger>, config: EngineConfig) -> Self {
        Self {
            planner: LotConsumptionPlanner::new(Arc::clone(&ledger), config.clone()),
            ledger,
            book: ReservationBook::new(),
            defects: DefectLog::new(),
            config,
        }
    }

    /// 庫存帳本
    pub fn ledger(&self) -> &StockLedger {
        &self.ledger
    }

    /// 批次扣量規劃器
    pub fn planner(&self) -> &LotConsumptionPlanner {
        &self.planner
    }

    /// 引擎配置
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// 依 BOM 展開建立計劃中預留（不動庫存）
    pub fn pre_calculate(
        &self,
        plan: &ProductionPlan,
        relations: &EntityRelationStore,
    ) -> Result<Vec<MaterialReservation>> {
        tracing::info!("開始 BOM 展開：計劃 {}，節點 {} 個", plan.id, plan.nodes.len());

        let mut reservations = Vec::new();
        for node in &plan.nodes {
            for line in relations.bom_lines(&node.id) {
                let quantity = match (line.metadata.unit_ratio, line.metadata.quantity) {
                    (Some(unit_ratio), _) => node
                        .output_quantity
                        .checked_mul(unit_ratio)
                        .ok_or_else(|| {
                            MesError::InvalidQuantity(format!(
                                "節點 {} 物料 {} 計劃用量溢位：產出 {} × 單位用量 {}",
                                node.id, line.target_id, node.output_quantity, unit_ratio
                            ))
                        })?,
                    (None, Some(quantity)) => quantity,
                    (None, None) => {
                        return Err(MesError::InvalidRelation(format!(
                            "節點 {} 物料 {} 的 BOM 行缺少用量",
                            node.id, line.target_id
                        )))
                    }
                };

                tracing::debug!(
                    "節點 {} 物料 {}: 產出 {} → 計劃用量 {}",
                    node.id,
                    line.target_id,
                    node.output_quantity,
                    quantity
                );

                let reservation =
                    MaterialReservation::pending(plan.assignment_id(&node.id), &line.target_id, quantity)?
                        .with_plan_node(&plan.id, &node.id);
                reservations.push(reservation);
            }
        }

        self.book.insert_all(reservations.clone())?;

        tracing::info!("計劃 {} 建立 {} 筆計劃中預留", plan.id, reservations.len());
        Ok(reservations)
    }

    /// 預留：在物料鎖內取 min(計劃用量, 可用庫存)
    pub fn reserve(&self, assignment_id: &str, material_code: &str) -> Result<ReserveOutcome> {
        self.reserve_inner(
            ReservationKey::new(assignment_id, material_code),
            None,
            Utc::now().date_naive(),
        )
    }

    /// 預留並指定基準日（判斷過期批次）
    pub fn reserve_as_of(
        &self,
        assignment_id: &str,
        material_code: &str,
        as_of: NaiveDate,
    ) -> Result<ReserveOutcome> {
        self.reserve_inner(ReservationKey::new(assignment_id, material_code), None, as_of)
    }

    /// 以操作員確認過的預覽預留
    ///
    /// 預覽的需求量須等於計劃用量；預覽過期時回傳並發衝突。
    pub fn reserve_with_preview(
        &self,
        assignment_id: &str,
        preview: &LotPreview,
    ) -> Result<ReserveOutcome> {
        self.reserve_inner(
            ReservationKey::new(assignment_id, preview.material_code.as_str()),
            Some(preview),
            preview.as_of,
        )
    }

    fn reserve_inner(
        &self,
        key: ReservationKey,
        seed: Option<&LotPreview>,
        as_of: NaiveDate,
    ) -> Result<ReserveOutcome> {
        let material_code = key.material_code.as_str();
        let assignment_id = key.assignment_id.as_str();

        let outcome = self.ledger.transaction(material_code, |tx| {
            let mut row = self.book.require(&key)?;
            if row.reservation_status != ReservationStatus::Pending {
                return Err(MesError::InvalidTransition {
                    from: row.reservation_status,
                    to: ReservationStatus::Reserved,
                });
            }
            let requested = row.pre_production_qty;
            let available = tx.available();

            let lots = self.planner.selectable_lots(tx.lots(), as_of);
            let unlotted = tx.unlotted();

            let allocation = match seed {
                Some(preview) => {
                    // 預覽必須針對整筆計劃用量，否則差額會被誤記為缺料
                    if preview.required_qty != requested {
                        return Err(MesError::InvariantViolation(format!(
                            "任務 {} 物料 {} 預覽需求 {} 與計劃用量 {} 不符",
                            assignment_id, material_code, preview.required_qty, requested
                        )));
                    }
                    let fresh = allocate(material_code, &lots, preview.required_qty, as_of);
                    if !fresh.same_allocation(preview) {
                        return Err(MesError::conflict(material_code, "批次預覽已過期"));
                    }
                    fresh
                }
                None => allocate(material_code, &lots, requested.min(available), as_of),
            };

            let lot_part = allocation.allocated_qty();
            let unlotted_part = (requested - lot_part)
                .min(unlotted)
                .min(available - lot_part)
                .max(Decimal::ZERO);
            let actual = lot_part + unlotted_part;

            let shortage = (actual < requested)
                .then(|| ShortageWarning::new(material_code, requested, actual));
            let warning = shortage.as_ref().map(ShortageWarning::message);

            let reservation_row = |quantity: Decimal| {
                let movement = StockMovement::new(
                    material_code.to_string(),
                    MovementKind::Out,
                    MovementReason::Reservation,
                    quantity,
                )
                .with_assignment(assignment_id)
                .with_requested_quantity(requested);
                match &warning {
                    Some(text) => movement.with_partial_warning(text.clone()),
                    None => movement,
                }
            };

            let mut movements = Vec::new();
            let mut draws = Vec::new();
            for lot_allocation in &allocation.lots_to_consume {
                let tag = lots
                    .iter()
                    .find(|lot| lot.lot_number == lot_allocation.lot_number)
                    .map(|lot| lot.tag())
                    .ok_or_else(|| {
                        MesError::InvariantViolation(format!(
                            "批次 {} 不在可挑選清單",
                            lot_allocation.lot_number
                        ))
                    })?;
                movements.push(tx.post(
                    reservation_row(lot_allocation.consume_qty).with_lot(tag),
                    StockEffect::Reserve,
                )?);
                draws.push(LotDraw {
                    lot_number: Some(lot_allocation.lot_number.clone()),
                    lot_date: Some(lot_allocation.lot_date),
                    quantity: lot_allocation.consume_qty,
                });
            }
            if unlotted_part > Decimal::ZERO {
                movements.push(tx.post(reservation_row(unlotted_part), StockEffect::Reserve)?);
                draws.push(LotDraw {
                    lot_number: None,
                    lot_date: None,
                    quantity: unlotted_part,
                });
            }
            if movements.is_empty() {
                // 零預留仍留一列，讓缺料警告落在帳上
                movements.push(tx.post(reservation_row(Decimal::ZERO), StockEffect::Reserve)?);
            }

            row.mark_reserved(actual, draws, warning.clone())?;
            self.book.store(row);

            Ok(ReserveOutcome {
                actual_reserved_qty: actual,
                partial_reservation: shortage.is_some(),
                warning,
                shortage,
                movements,
            })
        })?;

        match &outcome.warning {
            Some(warning) => tracing::warn!("任務 {} 物料 {}: {}", assignment_id, material_code, warning),
            None => tracing::info!(
                "任務 {} 物料 {} 預留 {}",
                assignment_id,
                material_code,
                outcome.actual_reserved_qty
            ),
        }
        Ok(outcome)
    }

    /// 耗用：以預留量封頂，剩餘退回可用庫存
    pub fn consume(
        &self,
        assignment_id: &str,
        material_code: &str,
        theoretical_consumed_qty: Decimal,
    ) -> Result<ConsumeOutcome> {
        if theoretical_consumed_qty < Decimal::ZERO {
            return Err(MesError::InvalidQuantity(format!(
                "耗用量不可為負: {}",
                theoretical_consumed_qty
            )));
        }
        let key = ReservationKey::new(assignment_id, material_code);

        let outcome = self.ledger.transaction(material_code, |tx| {
            let mut row = self.book.require(&key)?;
            if row.reservation_status != ReservationStatus::Reserved {
                return Err(MesError::InvalidTransition {
                    from: row.reservation_status,
                    to: ReservationStatus::Consumed,
                });
            }

            let reserved = row.actual_reserved_qty.unwrap_or(Decimal::ZERO);
            let capped = theoretical_consumed_qty.min(reserved);
            let excess = theoretical_consumed_qty - capped;
            let leftover = reserved - capped;

            let movements = return_draws(
                tx,
                &row,
                leftover,
                MovementReason::ConsumptionReturn,
            )?;
            tx.consume_wip(capped)?;

            row.mark_consumed(capped)?;
            self.book.store(row);

            if excess > Decimal::ZERO
                && self.config.excess_consumption == ExcessConsumptionPolicy::RecordDefect
            {
                self.defects
                    .record(assignment_id, material_code, theoretical_consumed_qty, excess);
            }

            Ok(ConsumeOutcome {
                capped_consumed_qty: capped,
                was_capped: excess > Decimal::ZERO,
                leftover_qty: leftover,
                excess_qty: excess,
                movements,
            })
        })?;

        if outcome.was_capped {
            tracing::warn!(
                "任務 {} 物料 {} 耗用 {} 超過預留，封頂為 {}",
                assignment_id,
                material_code,
                theoretical_consumed_qty,
                outcome.capped_consumed_qty
            );
        }
        tracing::info!(
            "任務 {} 物料 {} 耗用 {}，退回 {}",
            assignment_id,
            material_code,
            outcome.capped_consumed_qty,
            outcome.leftover_qty
        );
        Ok(outcome)
    }

    /// 釋放任務的所有預留（任務取消）
    pub fn release(&self, assignment_id: &str) -> Result<ReleaseOutcome> {
        let rows = self.book.by_assignment(assignment_id);
        if rows.is_empty() {
            return Err(MesError::AssignmentNotFound(assignment_id.to_string()));
        }
        let codes: Vec<&str> = rows.iter().map(|row| row.material_code.as_str()).collect();

        let outcome = self.ledger.transaction_many(&codes, |tx| {
            let mut outcome = ReleaseOutcome {
                assignment_id: assignment_id.to_string(),
                released: Vec::new(),
                cancelled_pending: Vec::new(),
                movements: Vec::new(),
            };
            let mut staged = Vec::new();

            // 在鎖內重新讀取，以最新狀態為準
            for row in &rows {
                let mut current = self.book.require(&row.key())?;
                match current.reservation_status {
                    ReservationStatus::Reserved => {
                        let returned = current.actual_reserved_qty.unwrap_or(Decimal::ZERO);
                        let mut material = tx.material(&current.material_code)?;
                        let movements =
                            return_draws(&mut material, &current, returned, MovementReason::Release)?;
                        current.mark_released()?;
                        outcome.released.push(ReleasedMaterial {
                            material_code: current.material_code.clone(),
                            returned_qty: returned,
                        });
                        outcome.movements.extend(movements);
                        staged.push(current);
                    }
                    ReservationStatus::Pending => {
                        current.mark_released()?;
                        outcome.cancelled_pending.push(current.material_code.clone());
                        staged.push(current);
                    }
                    ReservationStatus::Consumed | ReservationStatus::Released => {}
                }
            }

            self.book.store_all(staged);
            Ok(outcome)
        })?;

        tracing::info!(
            "任務 {} 釋放 {} 種物料，共退回 {}",
            assignment_id,
            outcome.released.len(),
            outcome.total_returned()
        );
        Ok(outcome)
    }

    /// 任務的所有預留
    pub fn reservations_for(&self, assignment_id: &str) -> Vec<MaterialReservation> {
        self.book.by_assignment(assignment_id)
    }

    /// 單一預留
    pub fn reservation(&self, assignment_id: &str, material_code: &str) -> Option<MaterialReservation> {
        self.book.get(&ReservationKey::new(assignment_id, material_code))
    }

    /// 所有預留
    pub fn reservations(&self) -> Vec<MaterialReservation> {
        self.book.all()
    }

    /// 物料目前的在製預留合計（依預留表）
    pub fn wip_total(&self, material_code: &str) -> Decimal {
        self.book.outstanding_total(material_code)
    }

    /// 超耗記錄
    pub fn defects(&self) -> Vec<DefectRecord> {
        self.defects.records()
    }
}

/// 將在製數量依扣量的反序退回原批次
fn return_draws(
    tx: &mut MaterialTx<'_>,
    row: &MaterialReservation,
    quantity: Decimal,
    reason: MovementReason,
) -> Result<Vec<StockMovement>> {
    let mut remaining = quantity;
    let mut movements = Vec::new();

    for draw in row.lot_draws.iter().rev() {
        if remaining <= Decimal::ZERO {
            break;
        }
        let returned = remaining.min(draw.quantity);
        if returned <= Decimal::ZERO {
            continue;
        }
        remaining -= returned;

        let mut movement = StockMovement::new(
            row.material_code.clone(),
            MovementKind::In,
            reason,
            returned,
        )
        .with_assignment(row.assignment_id.clone());
        if let Some(lot_number) = &draw.lot_number {
            let tag = match tx.lot(lot_number) {
                Some(lot) => lot.tag(),
                None => LotTag::new(
                    lot_number.clone(),
                    draw.lot_date.unwrap_or_else(|| row.created_at.date_naive()),
                ),
            };
            movement = movement.with_lot(tag);
        }
        movements.push(tx.post(movement, StockEffect::ReturnFromWip)?);
    }

    if remaining > Decimal::ZERO {
        return Err(MesError::InvariantViolation(format!(
            "任務 {} 物料 {} 退回 {} 超過扣量紀錄",
            row.assignment_id, row.material_code, quantity
        )));
    }
    Ok(movements)
}
