//! # MES Plan
//!
//! 生產計劃圖（驗證、工時補齊）與實體關聯表

pub mod graph;
pub mod relation_store;
pub mod validators;

// Re-export 主要類型
pub use graph::{PlanContext, ProductionPlanGraph};
pub use relation_store::EntityRelationStore;
