//! 各關聯種類的附帶資料驗證表

use mes_core::{MesError, RelationKind, RelationMetadata, Result};
use rust_decimal::Decimal;

/// 附帶資料驗證函式
pub type MetadataValidator = fn(&RelationMetadata) -> std::result::Result<(), String>;

/// 關聯種類 → 驗證函式
static VALIDATORS: [(RelationKind, MetadataValidator); 7] = [
    (RelationKind::WorkerStation, no_metadata),
    (RelationKind::WorkerOperation, no_metadata),
    (RelationKind::StationOperation, no_metadata),
    (RelationKind::NodeStation, station_priority),
    (RelationKind::NodeSubstation, no_metadata),
    (RelationKind::NodePredecessor, no_metadata),
    (RelationKind::NodeMaterial, bom_line),
];

/// 取得關聯種類的驗證函式
pub fn validator_for(kind: RelationKind) -> MetadataValidator {
    VALIDATORS
        .iter()
        .find(|(candidate, _)| *candidate == kind)
        .map(|(_, validator)| *validator)
        .unwrap_or(no_metadata)
}

/// 驗證附帶資料
pub fn validate(kind: RelationKind, metadata: &RelationMetadata) -> Result<()> {
    validator_for(kind)(metadata)
        .map_err(|reason| MesError::InvalidRelation(format!("{:?}: {}", kind, reason)))
}

fn positive(label: &str, value: Option<Decimal>) -> std::result::Result<(), String> {
    match value {
        Some(v) if v <= Decimal::ZERO => Err(format!("{} 必須大於 0（目前為 {}）", label, v)),
        _ => Ok(()),
    }
}

fn no_bom_fields(metadata: &RelationMetadata) -> std::result::Result<(), String> {
    if metadata.quantity.is_some() || metadata.unit_ratio.is_some() || metadata.is_derived {
        return Err("用量欄位只適用於節點 → 物料".to_string());
    }
    Ok(())
}

fn no_metadata(metadata: &RelationMetadata) -> std::result::Result<(), String> {
    if metadata.priority.is_some() {
        return Err("優先序只適用於節點 → 工作站".to_string());
    }
    no_bom_fields(metadata)
}

fn station_priority(metadata: &RelationMetadata) -> std::result::Result<(), String> {
    if let Some(priority) = metadata.priority {
        if priority <= 0 {
            return Err(format!("優先序必須大於 0（目前為 {}）", priority));
        }
    }
    no_bom_fields(metadata)
}

fn bom_line(metadata: &RelationMetadata) -> std::result::Result<(), String> {
    if metadata.priority.is_some() {
        return Err("優先序只適用於節點 → 工作站".to_string());
    }
    if metadata.quantity.is_none() && metadata.unit_ratio.is_none() {
        return Err("BOM 行必須提供 quantity 或 unit_ratio".to_string());
    }
    positive("quantity", metadata.quantity)?;
    positive("unit_ratio", metadata.unit_ratio)
}
