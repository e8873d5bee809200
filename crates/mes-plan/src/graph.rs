//! 生產計劃圖
//!
//! 節點以前置關係構成有向圖。驗證會收集所有問題後一次回報；補齊會在驗證通過後
//! 計算每個節點的有效工時、預估起訖時間與可用工作站。

use chrono::{DateTime, Duration, Utc};
use mes_core::plan::effective_time;
use mes_core::{
    EnrichedNode, MesError, Operation, PlanValidationError, ProductionPlanNode, Result,
    ValidationReport,
};
use rayon::prelude::*;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet, VecDeque};

use crate::relation_store::EntityRelationStore;

/// 補齊所需的外部資料
#[derive(Debug, Clone, Copy)]
pub struct PlanContext<'a> {
    /// 作業主檔
    pub operations: &'a HashMap<String, Operation>,

    /// 計劃開始時間
    pub start_at: DateTime<Utc>,

    /// 關聯表（提供可用工作站）
    pub relations: Option<&'a EntityRelationStore>,

    /// 節點與作業皆未指定時的效率
    pub default_efficiency: Decimal,
}

impl<'a> PlanContext<'a> {
    /// 創建補齊上下文
    pub fn new(operations: &'a HashMap<String, Operation>, start_at: DateTime<Utc>) -> Self {
        Self {
            operations,
            start_at,
            relations: None,
            default_efficiency: Decimal::ONE,
        }
    }

    /// 建構器模式：設置關聯表
    pub fn with_relations(mut self, relations: &'a EntityRelationStore) -> Self {
        self.relations = Some(relations);
        self
    }

    /// 建構器模式：設置預設效率
    pub fn with_default_efficiency(mut self, efficiency: Decimal) -> Self {
        self.default_efficiency = efficiency;
        self
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    White,
    Grey,
    Black,
}

/// 生產計劃圖
pub struct ProductionPlanGraph;

impl ProductionPlanGraph {
    /// 驗證節點集合，回傳所有問題
    pub fn validate(nodes: &[ProductionPlanNode]) -> ValidationReport {
        let mut errors = Vec::new();
        let mut index: HashMap<&str, usize> = HashMap::new();

        for (position, node) in nodes.iter().enumerate() {
            if node.id.trim().is_empty() {
                errors.push(PlanValidationError::EmptyNodeId { index: position });
                continue;
            }
            if index.insert(node.id.as_str(), position).is_some() {
                errors.push(PlanValidationError::DuplicateNodeId {
                    node_id: node.id.clone(),
                });
            }
        }

        for node in nodes {
            if node.nominal_time <= Decimal::ZERO {
                errors.push(PlanValidationError::NonPositiveNominalTime {
                    node_id: node.id.clone(),
                    nominal_time: node.nominal_time,
                });
            }
            if let Some(efficiency) = node.efficiency {
                if efficiency <= Decimal::ZERO {
                    errors.push(PlanValidationError::NonPositiveEfficiency {
                        node_id: node.id.clone(),
                        efficiency,
                    });
                }
            }
            for predecessor in &node.predecessors {
                if !index.contains_key(predecessor.as_str()) {
                    errors.push(PlanValidationError::MissingPredecessor {
                        node_id: node.id.clone(),
                        predecessor_id: predecessor.clone(),
                    });
                }
            }
        }

        errors.extend(Self::detect_cycles(nodes, &index));

        if !errors.is_empty() {
            tracing::warn!("計劃驗證失敗，共 {} 個問題", errors.len());
        }
        ValidationReport::from_errors(errors)
    }

    /// 以灰/黑標記的深度優先搜尋找出循環
    fn detect_cycles(
        nodes: &[ProductionPlanNode],
        index: &HashMap<&str, usize>,
    ) -> Vec<PlanValidationError> {
        let mut marks = vec![Mark::White; nodes.len()];
        let mut cycles = Vec::new();

        for root in 0..nodes.len() {
            if marks[root] != Mark::White || nodes[root].id.trim().is_empty() {
                continue;
            }

            // (節點, 下一個要走訪的前置節點位置)
            let mut stack: Vec<(usize, usize)> = vec![(root, 0)];
            marks[root] = Mark::Grey;

            while let Some(top) = stack.last_mut() {
                let (current, cursor) = *top;
                let predecessors = &nodes[current].predecessors;
                if cursor >= predecessors.len() {
                    marks[current] = Mark::Black;
                    stack.pop();
                    continue;
                }

                top.1 += 1;
                let predecessor = predecessors[cursor].as_str();

                let Some(&next) = index.get(predecessor) else {
                    continue;
                };
                match marks[next] {
                    Mark::White => {
                        marks[next] = Mark::Grey;
                        stack.push((next, 0));
                    }
                    Mark::Grey => {
                        let start = stack
                            .iter()
                            .position(|(position, _)| *position == next)
                            .unwrap_or(0);
                        let mut path: Vec<String> = stack[start..]
                            .iter()
                            .map(|(position, _)| nodes[*position].id.clone())
                            .collect();
                        path.push(nodes[next].id.clone());
                        cycles.push(PlanValidationError::CycleDetected { path });
                    }
                    Mark::Black => {}
                }
            }
        }

        cycles
    }

    /// 拓撲排序（前置節點在前，同層依輸入順序）
    pub fn topological_order(nodes: &[ProductionPlanNode]) -> Result<Vec<&ProductionPlanNode>> {
        let report = Self::validate(nodes);
        if !report.valid {
            return Err(MesError::Validation(report.errors));
        }

        Ok(Self::order_indices(nodes)
            .into_iter()
            .map(|position| &nodes[position])
            .collect())
    }

    /// 已驗證節點的拓撲順序（索引）
    fn order_indices(nodes: &[ProductionPlanNode]) -> Vec<usize> {
        let index: HashMap<&str, usize> = nodes
            .iter()
            .enumerate()
            .map(|(position, node)| (node.id.as_str(), position))
            .collect();

        let mut pending = vec![0usize; nodes.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
        for (position, node) in nodes.iter().enumerate() {
            let unique: HashSet<&str> = node.predecessors.iter().map(String::as_str).collect();
            for predecessor in unique {
                if let Some(&source) = index.get(predecessor) {
                    pending[position] += 1;
                    dependents[source].push(position);
                }
            }
        }

        let mut ready: VecDeque<usize> = (0..nodes.len())
            .filter(|position| pending[*position] == 0)
            .collect();
        let mut order = Vec::with_capacity(nodes.len());

        while let Some(position) = ready.pop_front() {
            order.push(position);
            for &dependent in &dependents[position] {
                pending[dependent] -= 1;
                if pending[dependent] == 0 {
                    ready.push_back(dependent);
                }
            }
        }

        order
    }

    /// 解析節點效率：節點 → 作業預設 → 上下文預設
    pub fn resolve_efficiency(node: &ProductionPlanNode, ctx: &PlanContext<'_>) -> Result<Decimal> {
        let operation = match &node.operation_id {
            Some(operation_id) => Some(
                ctx.operations
                    .get(operation_id)
                    .ok_or_else(|| MesError::OperationNotFound(operation_id.clone()))?,
            ),
            None => None,
        };

        Ok(node
            .efficiency
            .or_else(|| operation.and_then(|op| op.default_efficiency))
            .unwrap_or(ctx.default_efficiency))
    }

    /// 補齊節點：效率、有效工時、預估起訖、可用工作站
    pub fn enrich(nodes: &[ProductionPlanNode], ctx: &PlanContext<'_>) -> Result<Vec<EnrichedNode>> {
        let report = Self::validate(nodes);
        if !report.valid {
            return Err(MesError::Validation(report.errors));
        }

        let durations: Vec<(Decimal, i64)> = nodes
            .par_iter()
            .map(|node| {
                let efficiency = Self::resolve_efficiency(node, ctx)?;
                let minutes = effective_time(node.nominal_time, efficiency).ok_or_else(|| {
                    MesError::Validation(vec![PlanValidationError::NonPositiveEfficiency {
                        node_id: node.id.clone(),
                        efficiency,
                    }])
                })?;
                Ok((efficiency, minutes))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut ends: HashMap<&str, DateTime<Utc>> = HashMap::with_capacity(nodes.len());
        let mut enriched: Vec<Option<EnrichedNode>> = vec![None; nodes.len()];

        for position in Self::order_indices(nodes) {
            let node = &nodes[position];
            let (efficiency, minutes) = durations[position];

            let estimated_start = node
                .predecessors
                .iter()
                .filter_map(|predecessor| ends.get(predecessor.as_str()).copied())
                .fold(ctx.start_at, std::cmp::max);
            let estimated_end = Duration::try_minutes(minutes)
                .and_then(|span| estimated_start.checked_add_signed(span))
                .ok_or_else(|| {
                    MesError::InvalidQuantity(format!(
                        "節點 {} 的工時超出可表示範圍: {} 分鐘",
                        node.id, minutes
                    ))
                })?;
            ends.insert(node.id.as_str(), estimated_end);

            let eligible_stations = ctx
                .relations
                .map(|relations| relations.eligible_stations(&node.id))
                .unwrap_or_default();

            tracing::debug!(
                "節點 {}: 效率 {}, 有效工時 {} 分鐘, {} → {}",
                node.id,
                efficiency,
                minutes,
                estimated_start,
                estimated_end
            );

            enriched[position] = Some(EnrichedNode {
                node: node.clone(),
                efficiency,
                effective_time: minutes,
                estimated_start,
                estimated_end,
                eligible_stations,
            });
        }

        tracing::info!("計劃補齊完成: {} 個節點", nodes.len());
        Ok(enriched.into_iter().flatten().collect())
    }

    /// 由節點 → 前置節點關聯補上前置關係
    pub fn hydrate_predecessors(nodes: &mut [ProductionPlanNode], relations: &EntityRelationStore) {
        for node in nodes.iter_mut() {
            for predecessor in relations.predecessors_of(&node.id) {
                node.add_predecessor(predecessor);
            }
        }
    }
}
