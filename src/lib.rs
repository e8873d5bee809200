//! # MES
//!
//! 製造執行引擎：生產計劃圖、實體關聯、庫存帳本、批次扣量與物料預留。
//!
//! [`ProductionEngine`] 串起四個工作流程：
//! - 計劃下達：驗證 + 補齊工時 + BOM 展開
//! - 任務開工：批次預覽 + 預留
//! - 任務完工：耗用（封頂）
//! - 任務取消：釋放

pub use mes_core;
pub use mes_ledger;
pub use mes_plan;
pub use mes_reservation;

pub use mes_core::{
    EngineConfig, EnrichedNode, MaterialReservation, MesError, Operation, ProductionPlan,
    ProductionPlanNode, ReservationStatus, Result,
};
pub use mes_ledger::StockLedger;
pub use mes_plan::{EntityRelationStore, PlanContext, ProductionPlanGraph};
pub use mes_reservation::{
    ConsumeOutcome, LotPreview, MaterialReservationEngine, ReleaseOutcome, ReserveOutcome,
};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;

/// 計劃下達結果
#[derive(Debug, Clone)]
pub struct LaunchedPlan {
    /// 計劃ID
    pub plan_id: String,

    /// 補齊後的節點（維持輸入順序）
    pub nodes: Vec<EnrichedNode>,

    /// 建立的計劃中預留
    pub reservations: Vec<MaterialReservation>,
}

/// 製造執行引擎
pub struct ProductionEngine {
    config: EngineConfig,
    operations: HashMap<String, Operation>,
    relations: EntityRelationStore,
    reservations: MaterialReservationEngine,
}

impl ProductionEngine {
    /// 創建引擎（配置不合法時回傳錯誤）
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let ledger = Arc::new(StockLedger::new(&config));
        Ok(Self {
            reservations: MaterialReservationEngine::new(ledger, config.clone()),
            operations: HashMap::new(),
            relations: EntityRelationStore::new(),
            config,
        })
    }

    /// 建構器模式：登錄作業主檔
    pub fn with_operation(mut self, operation: Operation) -> Self {
        self.register_operation(operation);
        self
    }

    /// 登錄作業主檔
    pub fn register_operation(&mut self, operation: Operation) {
        self.operations.insert(operation.id.clone(), operation);
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn ledger(&self) -> &StockLedger {
        self.reservations.ledger()
    }

    pub fn relations(&self) -> &EntityRelationStore {
        &self.relations
    }

    pub fn reservations(&self) -> &MaterialReservationEngine {
        &self.reservations
    }

    /// 計劃下達：補上關聯中的前置節點，驗證、補齊，再展開 BOM
    ///
    /// 驗證失敗時不會寫入任何預留。
    pub fn launch_plan(&self, mut plan: ProductionPlan, start_at: DateTime<Utc>) -> Result<LaunchedPlan> {
        tracing::info!("下達計劃 {}：{} 個節點", plan.id, plan.nodes.len());

        ProductionPlanGraph::hydrate_predecessors(&mut plan.nodes, &self.relations);

        let report = ProductionPlanGraph::validate(&plan.nodes);
        if !report.valid {
            for error in &report.errors {
                tracing::warn!("計劃 {}: {}", plan.id, error);
            }
            return Err(MesError::Validation(report.errors));
        }

        let ctx = PlanContext::new(&self.operations, start_at)
            .with_relations(&self.relations)
            .with_default_efficiency(self.config.default_efficiency);
        let nodes = ProductionPlanGraph::enrich(&plan.nodes, &ctx)?;
        let reservations = self.reservations.pre_calculate(&plan, &self.relations)?;

        Ok(LaunchedPlan {
            plan_id: plan.id,
            nodes,
            reservations,
        })
    }

    /// 開工前預覽：每個計劃中物料的批次扣量
    pub fn preview_task_start(&self, assignment_id: &str) -> Result<Vec<LotPreview>> {
        let rows = self.pending_rows(assignment_id)?;
        rows.iter()
            .map(|row| {
                self.reservations
                    .planner()
                    .preview(&row.material_code, row.pre_production_qty)
            })
            .collect()
    }

    /// 開工：逐物料預留；有確認過的預覽時依預覽扣批次
    ///
    /// 每種物料各自一筆交易。中途失敗時已預留的物料維持原狀，呼叫端可以
    /// [`cancel_task`](Self::cancel_task) 全數釋放。
    pub fn start_task(
        &self,
        assignment_id: &str,
        confirmed: &[LotPreview],
    ) -> Result<Vec<ReserveOutcome>> {
        let rows = self.pending_rows(assignment_id)?;

        let mut outcomes = Vec::with_capacity(rows.len());
        for row in rows {
            let preview = confirmed
                .iter()
                .find(|preview| preview.material_code == row.material_code);
            let outcome = match preview {
                Some(preview) => self.reservations.reserve_with_preview(assignment_id, preview),
                None => self.reservations.reserve(assignment_id, &row.material_code),
            }
            .map_err(|err| {
                tracing::warn!("任務 {} 物料 {} 預留失敗: {}", assignment_id, row.material_code, err);
                err
            })?;
            outcomes.push(outcome);
        }

        let partial = outcomes.iter().filter(|o| o.partial_reservation).count();
        tracing::info!(
            "任務 {} 開工：預留 {} 種物料，其中 {} 種部分預留",
            assignment_id,
            outcomes.len(),
            partial
        );
        Ok(outcomes)
    }

    /// 完工：依回報的理論耗用量決算；未回報的物料視為全數耗用
    pub fn complete_task(
        &self,
        assignment_id: &str,
        reported: &HashMap<String, Decimal>,
    ) -> Result<Vec<ConsumeOutcome>> {
        let rows: Vec<MaterialReservation> = self
            .reservations
            .reservations_for(assignment_id)
            .into_iter()
            .filter(|row| row.reservation_status == ReservationStatus::Reserved)
            .collect();
        if rows.is_empty() {
            return Err(MesError::AssignmentNotFound(assignment_id.to_string()));
        }

        let mut outcomes = Vec::with_capacity(rows.len());
        for row in rows {
            let theoretical = reported
                .get(&row.material_code)
                .copied()
                .unwrap_or_else(|| row.actual_reserved_qty.unwrap_or(Decimal::ZERO));
            outcomes.push(
                self.reservations
                    .consume(assignment_id, &row.material_code, theoretical)?,
            );
        }

        tracing::info!("任務 {} 完工：決算 {} 種物料", assignment_id, outcomes.len());
        Ok(outcomes)
    }

    /// 取消任務：釋放所有預留
    pub fn cancel_task(&self, assignment_id: &str) -> Result<ReleaseOutcome> {
        self.reservations.release(assignment_id)
    }

    fn pending_rows(&self, assignment_id: &str) -> Result<Vec<MaterialReservation>> {
        let rows = self.reservations.reservations_for(assignment_id);
        if rows.is_empty() {
            return Err(MesError::AssignmentNotFound(assignment_id.to_string()));
        }
        Ok(rows
            .into_iter()
            .filter(|row| row.reservation_status == ReservationStatus::Pending)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use mes_core::{RelationMetadata, RelationType, SourceType};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 11, 3, 8, 0, 0).unwrap()
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = EngineConfig::default().with_default_efficiency(Decimal::ZERO);
        assert!(ProductionEngine::new(config).is_err());
    }

    #[test]
    fn test_invalid_plan_creates_no_reservations() {
        let engine = ProductionEngine::new(EngineConfig::default()).unwrap();
        engine
            .relations()
            .put(
                SourceType::Node,
                "A",
                RelationType::Material,
                "STEEL-01",
                RelationMetadata::bom_ratio(Decimal::ONE),
            )
            .unwrap();
        let plan = ProductionPlan::new(
            "PLAN-BAD",
            vec![
                ProductionPlanNode::new("A", "A", Decimal::from(5)).with_predecessors(["B"]),
                ProductionPlanNode::new("B", "B", Decimal::from(5)).with_predecessors(["A"]),
            ],
        );

        assert!(matches!(
            engine.launch_plan(plan, start()),
            Err(MesError::Validation(_))
        ));
        assert!(engine.reservations().reservations().is_empty());
    }

    #[test]
    fn test_unknown_task() {
        let engine = ProductionEngine::new(EngineConfig::default()).unwrap();

        assert!(matches!(
            engine.start_task("PLAN-X/NONE", &[]),
            Err(MesError::AssignmentNotFound(_))
        ));
        assert!(matches!(
            engine.complete_task("PLAN-X/NONE", &HashMap::new()),
            Err(MesError::AssignmentNotFound(_))
        ));
    }
}
