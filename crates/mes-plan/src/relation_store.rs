//! 實體關聯表
//!
//! 以 (source_type, source_id, relation_type, target_id) 為唯一鍵；重複新增一律回傳
//! `RelationConflict`，不會靜默合併。

use chrono::Utc;
use mes_core::{
    EntityRelation, MesError, RelationKind, RelationMetadata, RelationType, Result, SourceType,
};
use parking_lot::RwLock;
use std::collections::HashSet;

use crate::validators;

type RelationTuple = (SourceType, String, RelationType, String);

#[derive(Debug, Default)]
struct RelationTable {
    rows: Vec<EntityRelation>,
    keys: HashSet<RelationTuple>,
    next_id: u64,
}

/// 實體關聯表
#[derive(Debug, Default)]
pub struct EntityRelationStore {
    table: RwLock<RelationTable>,
}

impl EntityRelationStore {
    /// 創建空的關聯表
    pub fn new() -> Self {
        Self::default()
    }

    /// 新增關聯
    pub fn put(
        &self,
        source_type: SourceType,
        source_id: &str,
        relation_type: RelationType,
        target_id: &str,
        metadata: RelationMetadata,
    ) -> Result<EntityRelation> {
        let kind = RelationKind::resolve(source_type, relation_type).ok_or_else(|| {
            MesError::InvalidRelation(format!(
                "不支援的關聯組合: {} → {}",
                source_type, relation_type
            ))
        })?;
        if source_id.trim().is_empty() || target_id.trim().is_empty() {
            return Err(MesError::InvalidRelation("來源與目標 ID 不可為空".to_string()));
        }
        validators::validate(kind, &metadata)?;

        let tuple = (
            source_type,
            source_id.to_string(),
            relation_type,
            target_id.to_string(),
        );

        let mut table = self.table.write();
        if table.keys.contains(&tuple) {
            tracing::warn!(
                "關聯重複: {}:{} -{}-> {}",
                source_type,
                source_id,
                relation_type,
                target_id
            );
            return Err(MesError::RelationConflict(format!(
                "{}:{} -{}-> {}",
                source_type, source_id, relation_type, target_id
            )));
        }

        table.next_id += 1;
        let relation = EntityRelation {
            id: table.next_id,
            source_type,
            source_id: source_id.to_string(),
            relation_type,
            target_id: target_id.to_string(),
            metadata,
            created_at: Utc::now(),
        };
        table.keys.insert(tuple);
        table.rows.push(relation.clone());

        tracing::debug!(
            "新增關聯 #{}: {}:{} -{}-> {}",
            relation.id,
            source_type,
            source_id,
            relation_type,
            target_id
        );
        Ok(relation)
    }

    /// 以字串類型新增關聯（外部系統傳入的原始值）
    pub fn put_raw(
        &self,
        source_type: &str,
        source_id: &str,
        relation_type: &str,
        target_id: &str,
        metadata: RelationMetadata,
    ) -> Result<EntityRelation> {
        self.put(
            source_type.parse()?,
            source_id,
            relation_type.parse()?,
            target_id,
            metadata,
        )
    }

    /// 查詢關聯：有優先序者依優先序（小者優先），其餘依插入順序
    pub fn query(
        &self,
        source_type: SourceType,
        source_id: &str,
        relation_type: RelationType,
    ) -> Vec<EntityRelation> {
        let mut rows: Vec<EntityRelation> = self
            .table
            .read()
            .rows
            .iter()
            .filter(|row| {
                row.source_type == source_type
                    && row.relation_type == relation_type
                    && row.source_id == source_id
            })
            .cloned()
            .collect();
        rows.sort_by_key(|row| (row.metadata.priority.is_none(), row.metadata.priority));
        rows
    }

    /// 反查：哪些來源指向此目標
    pub fn query_by_target(
        &self,
        source_type: SourceType,
        relation_type: RelationType,
        target_id: &str,
    ) -> Vec<EntityRelation> {
        self.table
            .read()
            .rows
            .iter()
            .filter(|row| {
                row.source_type == source_type
                    && row.relation_type == relation_type
                    && row.target_id == target_id
            })
            .cloned()
            .collect()
    }

    /// 目標 ID 清單（依查詢順序）
    pub fn targets(
        &self,
        source_type: SourceType,
        source_id: &str,
        relation_type: RelationType,
    ) -> Vec<String> {
        self.query(source_type, source_id, relation_type)
            .into_iter()
            .map(|row| row.target_id)
            .collect()
    }

    /// 刪除關聯，回傳是否存在
    pub fn remove(
        &self,
        source_type: SourceType,
        source_id: &str,
        relation_type: RelationType,
        target_id: &str,
    ) -> bool {
        let tuple = (
            source_type,
            source_id.to_string(),
            relation_type,
            target_id.to_string(),
        );
        let mut table = self.table.write();
        if !table.keys.remove(&tuple) {
            return false;
        }
        table.rows.retain(|row| {
            !(row.source_type == source_type
                && row.relation_type == relation_type
                && row.source_id == source_id
                && row.target_id == target_id)
        });
        true
    }

    /// 節點的 BOM 行
    pub fn bom_lines(&self, node_id: &str) -> Vec<EntityRelation> {
        self.query(SourceType::Node, node_id, RelationType::Material)
    }

    /// 節點的前置節點
    pub fn predecessors_of(&self, node_id: &str) -> Vec<String> {
        self.targets(SourceType::Node, node_id, RelationType::Predecessor)
    }

    /// 節點可用工作站：依優先序的工作站，其後為子工作站
    pub fn eligible_stations(&self, node_id: &str) -> Vec<String> {
        let mut stations = self.targets(SourceType::Node, node_id, RelationType::Station);
        for substation in self.targets(SourceType::Node, node_id, RelationType::Substation) {
            if !stations.contains(&substation) {
                stations.push(substation);
            }
        }
        stations
    }

    /// 人員是否可於該工作站執行該作業
    pub fn worker_can_run(&self, worker_id: &str, station_id: &str, operation_id: &str) -> bool {
        let table = self.table.read();
        let has = |source_type, source_id: &str, relation_type, target_id: &str| {
            table.keys.contains(&(
                source_type,
                source_id.to_string(),
                relation_type,
                target_id.to_string(),
            ))
        };
        has(SourceType::Worker, worker_id, RelationType::Station, station_id)
            && has(SourceType::Worker, worker_id, RelationType::Operation, operation_id)
            && has(SourceType::Station, station_id, RelationType::Operation, operation_id)
    }

    /// 關聯筆數
    pub fn len(&self) -> usize {
        self.table.read().rows.len()
    }

    /// 是否為空
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn test_duplicate_tuple_is_conflict() {
        let store = EntityRelationStore::new();
        store
            .put(
                SourceType::Worker,
                "W-01",
                RelationType::Station,
                "ST-LASER",
                RelationMetadata::default(),
            )
            .unwrap();

        let duplicate = store.put(
            SourceType::Worker,
            "W-01",
            RelationType::Station,
            "ST-LASER",
            RelationMetadata::default(),
        );

        assert!(matches!(duplicate, Err(MesError::RelationConflict(_))));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_rejects_unknown_and_illegal_types() {
        let store = EntityRelationStore::new();

        assert!(store
            .put_raw("robot", "R-1", "station", "ST-1", RelationMetadata::default())
            .is_err());
        assert!(store
            .put_raw("worker", "W-1", "tooling", "ST-1", RelationMetadata::default())
            .is_err());
        assert!(matches!(
            store.put(
                SourceType::Worker,
                "W-1",
                RelationType::Material,
                "STEEL-01",
                RelationMetadata::bom_ratio(Decimal::ONE),
            ),
            Err(MesError::InvalidRelation(_))
        ));
        assert!(store
            .put(
                SourceType::Node,
                "",
                RelationType::Station,
                "ST-1",
                RelationMetadata::default(),
            )
            .is_err());
        assert!(store.is_empty());
    }

    #[test]
    fn test_rejects_non_positive_metadata() {
        let store = EntityRelationStore::new();

        assert!(store
            .put(
                SourceType::Node,
                "CUT",
                RelationType::Station,
                "ST-1",
                RelationMetadata::priority(0),
            )
            .is_err());
        assert!(store
            .put(
                SourceType::Node,
                "CUT",
                RelationType::Material,
                "STEEL-01",
                RelationMetadata::bom_ratio(Decimal::from(-2)),
            )
            .is_err());
    }

    #[test]
    fn test_query_orders_by_priority_then_insertion() {
        let store = EntityRelationStore::new();
        store
            .put(SourceType::Node, "CUT", RelationType::Station, "ST-C", RelationMetadata::default())
            .unwrap();
        store
            .put(SourceType::Node, "CUT", RelationType::Station, "ST-B", RelationMetadata::priority(2))
            .unwrap();
        store
            .put(SourceType::Node, "CUT", RelationType::Station, "ST-A", RelationMetadata::priority(1))
            .unwrap();
        store
            .put(SourceType::Node, "CUT", RelationType::Station, "ST-D", RelationMetadata::default())
            .unwrap();
        store
            .put(SourceType::Node, "CUT", RelationType::Substation, "ST-B", RelationMetadata::default())
            .unwrap();
        store
            .put(SourceType::Node, "CUT", RelationType::Substation, "SUB-1", RelationMetadata::default())
            .unwrap();

        assert_eq!(
            store.targets(SourceType::Node, "CUT", RelationType::Station),
            vec!["ST-A", "ST-B", "ST-C", "ST-D"]
        );
        assert_eq!(
            store.eligible_stations("CUT"),
            vec!["ST-A", "ST-B", "ST-C", "ST-D", "SUB-1"]
        );
    }

    #[test]
    fn test_query_without_priority_keeps_insertion_order() {
        let store = EntityRelationStore::new();
        for operation in ["OP-3", "OP-1", "OP-2"] {
            store
                .put(
                    SourceType::Worker,
                    "W-01",
                    RelationType::Operation,
                    operation,
                    RelationMetadata::default(),
                )
                .unwrap();
        }

        assert_eq!(
            store.targets(SourceType::Worker, "W-01", RelationType::Operation),
            vec!["OP-3", "OP-1", "OP-2"]
        );
    }

    #[test]
    fn test_remove_and_reinsert() {
        let store = EntityRelationStore::new();
        store
            .put(SourceType::Node, "WELD", RelationType::Predecessor, "CUT", RelationMetadata::default())
            .unwrap();
        assert_eq!(store.predecessors_of("WELD"), vec!["CUT"]);

        assert!(store.remove(SourceType::Node, "WELD", RelationType::Predecessor, "CUT"));
        assert!(!store.remove(SourceType::Node, "WELD", RelationType::Predecessor, "CUT"));
        assert!(store.predecessors_of("WELD").is_empty());

        assert!(store
            .put(SourceType::Node, "WELD", RelationType::Predecessor, "CUT", RelationMetadata::default())
            .is_ok());
    }

    #[test]
    fn test_reverse_lookup_and_worker_eligibility() {
        let store = EntityRelationStore::new();
        let plain = RelationMetadata::default;
        store.put(SourceType::Worker, "W-01", RelationType::Station, "ST-1", plain()).unwrap();
        store.put(SourceType::Worker, "W-01", RelationType::Operation, "OP-WELD", plain()).unwrap();
        store.put(SourceType::Worker, "W-02", RelationType::Operation, "OP-WELD", plain()).unwrap();
        store.put(SourceType::Station, "ST-1", RelationType::Operation, "OP-WELD", plain()).unwrap();

        let welders: Vec<_> = store
            .query_by_target(SourceType::Worker, RelationType::Operation, "OP-WELD")
            .into_iter()
            .map(|row| row.source_id)
            .collect();
        assert_eq!(welders, vec!["W-01", "W-02"]);

        assert!(store.worker_can_run("W-01", "ST-1", "OP-WELD"));
        assert!(!store.worker_can_run("W-02", "ST-1", "OP-WELD"));
    }

    #[test]
    fn test_bom_lines() {
        let store = EntityRelationStore::new();
        store
            .put(
                SourceType::Node,
                "MOLD",
                RelationType::Material,
                "RESIN-01",
                RelationMetadata::bom_ratio(Decimal::new(25, 1)),
            )
            .unwrap();
        store
            .put(
                SourceType::Node,
                "MOLD",
                RelationType::Material,
                "PIGMENT-RED",
                RelationMetadata::bom_quantity(Decimal::from(3)).derived(),
            )
            .unwrap();

        let lines = store.bom_lines("MOLD");
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].metadata.unit_ratio, Some(Decimal::new(25, 1)));
        assert!(lines[1].metadata.is_derived);
    }
}
