//! # MES Core
//!
//! 物料預留與生產計劃的核心資料模型與類型定義

pub mod config;
pub mod inventory;
pub mod lot;
pub mod movement;
pub mod plan;
pub mod relation;
pub mod reservation;

// Re-export 主要類型
pub use config::{EngineConfig, ExcessConsumptionPolicy, LotSelectionPolicy, LotTieBreak};
pub use inventory::MaterialStock;
pub use lot::{Lot, LotSummary};
pub use movement::{LotTag, MovementKind, MovementReason, StockMovement};
pub use plan::{EnrichedNode, Operation, ProductionPlan, ProductionPlanNode, ValidationReport};
pub use relation::{EntityRelation, RelationKind, RelationMetadata, RelationType, SourceType};
pub use reservation::{LotDraw, MaterialReservation, ReservationKey, ReservationStatus};

use rust_decimal::Decimal;

/// 生產計劃圖的結構錯誤
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanValidationError {
    #[error("第 {index} 個節點缺少識別碼")]
    EmptyNodeId { index: usize },

    #[error("節點 ID 重複: {node_id}")]
    DuplicateNodeId { node_id: String },

    #[error("節點 {node_id} 的標準工時必須大於 0（目前為 {nominal_time}）")]
    NonPositiveNominalTime { node_id: String, nominal_time: Decimal },

    #[error("節點 {node_id} 的效率必須大於 0（目前為 {efficiency}）")]
    NonPositiveEfficiency { node_id: String, efficiency: Decimal },

    #[error("節點 {node_id} 的前置節點不存在: {predecessor_id}")]
    MissingPredecessor {
        node_id: String,
        predecessor_id: String,
    },

    #[error("偵測到循環相依: {}", .path.join(" → "))]
    CycleDetected { path: Vec<String> },
}

/// MES 錯誤類型
#[derive(Debug, thiserror::Error)]
pub enum MesError {
    #[error("計劃驗證失敗: {}", format_validation(.0))]
    Validation(Vec<PlanValidationError>),

    #[error("違反不變量: {0}")]
    InvariantViolation(String),

    #[error("物料 {material_code} 並發衝突: {reason}")]
    ConcurrencyConflict {
        material_code: String,
        reason: String,
    },

    #[error("無效的狀態轉換: {from} → {to}")]
    InvalidTransition {
        from: ReservationStatus,
        to: ReservationStatus,
    },

    #[error("預留記錄已存在: 任務 {assignment_id}, 物料 {material_code}")]
    DuplicateReservation {
        assignment_id: String,
        material_code: String,
    },

    #[error("找不到預留記錄: 任務 {assignment_id}, 物料 {material_code}")]
    ReservationNotFound {
        assignment_id: String,
        material_code: String,
    },

    #[error("任務沒有任何預留記錄: {0}")]
    AssignmentNotFound(String),

    #[error("找不到作業: {0}")]
    OperationNotFound(String),

    #[error("關聯已存在: {0}")]
    RelationConflict(String),

    #[error("無效的關聯: {0}")]
    InvalidRelation(String),

    #[error("無效的數量: {0}")]
    InvalidQuantity(String),

    #[error("配置錯誤: {0}")]
    Config(String),
}

fn format_validation(errors: &[PlanValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl MesError {
    /// 建立並發衝突錯誤
    pub fn conflict(material_code: &str, reason: impl Into<String>) -> Self {
        Self::ConcurrencyConflict {
            material_code: material_code.to_string(),
            reason: reason.into(),
        }
    }

    /// 是否應由呼叫端以最新資料重試
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. })
    }
}

pub type Result<T> = std::result::Result<T, MesError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_lists_every_problem() {
        let err = MesError::Validation(vec![
            PlanValidationError::EmptyNodeId { index: 0 },
            PlanValidationError::CycleDetected {
                path: vec!["A".to_string(), "B".to_string(), "A".to_string()],
            },
        ]);

        let message = err.to_string();
        assert!(message.contains("第 0 個節點"));
        assert!(message.contains("A → B → A"));
    }

    #[test]
    fn test_only_conflicts_are_retryable() {
        assert!(MesError::conflict("STEEL-01", "鎖等待逾時").is_retryable());
        assert!(!MesError::InvariantViolation("x".to_string()).is_retryable());
    }
}
