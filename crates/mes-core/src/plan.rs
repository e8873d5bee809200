//! 生產計劃模型

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::PlanValidationError;

/// 作業（工序主檔）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    /// 作業ID
    pub id: String,

    /// 作業名稱
    pub name: String,

    /// 作業預設效率（1.0 = 100%）
    pub default_efficiency: Option<Decimal>,
}

impl Operation {
    /// 創建新的作業
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            default_efficiency: None,
        }
    }

    /// 建構器模式：設置預設效率
    pub fn with_default_efficiency(mut self, efficiency: Decimal) -> Self {
        self.default_efficiency = Some(efficiency);
        self
    }
}

/// 生產計劃節點
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductionPlanNode {
    /// 節點ID
    pub id: String,

    /// 節點名稱
    pub name: String,

    /// 作業參照
    pub operation_id: Option<String>,

    /// 標準工時（分鐘，100% 效率）
    pub nominal_time: Decimal,

    /// 節點層級效率（覆寫作業預設值）
    pub efficiency: Option<Decimal>,

    /// 需產出數量（BOM 展開基數）
    pub output_quantity: Decimal,

    /// 前置節點
    pub predecessors: Vec<String>,
}

impl ProductionPlanNode {
    /// 創建新的計劃節點
    pub fn new(id: impl Into<String>, name: impl Into<String>, nominal_time: Decimal) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            operation_id: None,
            nominal_time,
            efficiency: None,
            output_quantity: Decimal::ONE,
            predecessors: Vec::new(),
        }
    }

    /// 建構器模式：設置作業
    pub fn with_operation(mut self, operation_id: impl Into<String>) -> Self {
        self.operation_id = Some(operation_id.into());
        self
    }

    /// 建構器模式：設置效率
    pub fn with_efficiency(mut self, efficiency: Decimal) -> Self {
        self.efficiency = Some(efficiency);
        self
    }

    /// 建構器模式：設置產出數量
    pub fn with_output_quantity(mut self, quantity: Decimal) -> Self {
        self.output_quantity = quantity;
        self
    }

    /// 建構器模式：設置前置節點
    pub fn with_predecessors<I, S>(mut self, predecessors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.predecessors = predecessors.into_iter().map(Into::into).collect();
        self
    }

    /// 添加前置節點（重複者忽略）
    pub fn add_predecessor(&mut self, predecessor_id: impl Into<String>) {
        let predecessor_id = predecessor_id.into();
        if !self.predecessors.contains(&predecessor_id) {
            self.predecessors.push(predecessor_id);
        }
    }
}

/// 生產計劃
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductionPlan {
    /// 計劃ID
    pub id: String,

    /// 節點
    pub nodes: Vec<ProductionPlanNode>,
}

impl ProductionPlan {
    /// 創建新的計劃
    pub fn new(id: impl Into<String>, nodes: Vec<ProductionPlanNode>) -> Self {
        Self {
            id: id.into(),
            nodes,
        }
    }

    /// 節點對應的任務ID
    pub fn assignment_id(&self, node_id: &str) -> String {
        format!("{}/{}", self.id, node_id)
    }

    /// 依ID查找節點
    pub fn node(&self, node_id: &str) -> Option<&ProductionPlanNode> {
        self.nodes.iter().find(|node| node.id == node_id)
    }
}

/// 計劃驗證結果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<PlanValidationError>,
}

impl ValidationReport {
    /// 由錯誤清單建立結果
    pub fn from_errors(errors: Vec<PlanValidationError>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }
}

/// 補齊工時與資源後的節點
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedNode {
    /// 原始節點
    pub node: ProductionPlanNode,

    /// 實際採用的效率
    pub efficiency: Decimal,

    /// 有效工時（分鐘）
    pub effective_time: i64,

    /// 預估開始
    pub estimated_start: DateTime<Utc>,

    /// 預估結束
    pub estimated_end: DateTime<Utc>,

    /// 可用工作站（依優先序，其後為子工作站）
    pub eligible_stations: Vec<String>,
}

/// 有效工時 = round(標準工時 / 效率)，四捨五入（.5 進位）
///
/// 效率不為正或結果溢位時回傳 `None`。
pub fn effective_time(nominal_time: Decimal, efficiency: Decimal) -> Option<i64> {
    if efficiency <= Decimal::ZERO {
        return None;
    }
    nominal_time
        .checked_div(efficiency)?
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::str::FromStr;

    fn dec(raw: &str) -> Decimal {
        Decimal::from_str(raw).unwrap()
    }

    #[rstest]
    #[case("60", "1", Some(60))]
    #[case("60", "0.8", Some(75))]
    #[case("100", "1.2", Some(83))]
    #[case("5", "2", Some(3))] // 2.5 → 3
    #[case("7", "2", Some(4))] // 3.5 → 4
    #[case("10", "0", None)]
    #[case("10", "-1", None)]
    fn test_effective_time(
        #[case] nominal: &str,
        #[case] efficiency: &str,
        #[case] expected: Option<i64>,
    ) {
        assert_eq!(effective_time(dec(nominal), dec(efficiency)), expected);
    }

    #[test]
    fn test_node_builder() {
        let mut node = ProductionPlanNode::new("CUT", "裁切", Decimal::from(30))
            .with_operation("OP-CUT")
            .with_efficiency(dec("0.9"))
            .with_output_quantity(Decimal::from(20))
            .with_predecessors(["PREP"]);

        node.add_predecessor("PREP");
        node.add_predecessor("INSPECT");

        assert_eq!(node.operation_id.as_deref(), Some("OP-CUT"));
        assert_eq!(node.output_quantity, Decimal::from(20));
        assert_eq!(node.predecessors, vec!["PREP".to_string(), "INSPECT".to_string()]);
    }

    #[test]
    fn test_plan_assignment_id() {
        let plan = ProductionPlan::new(
            "PLAN-7",
            vec![ProductionPlanNode::new("WELD", "焊接", Decimal::from(45))],
        );

        assert_eq!(plan.assignment_id("WELD"), "PLAN-7/WELD");
        assert!(plan.node("WELD").is_some());
        assert!(plan.node("PAINT").is_none());
    }
}
