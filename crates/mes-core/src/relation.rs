//! 實體關聯模型（以單一多型關聯表取代多張多對多中介表）

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::MesError;

/// 關聯來源類型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Worker,
    Station,
    Node,
}

impl SourceType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Worker => "worker",
            Self::Station => "station",
            Self::Node => "node",
        }
    }
}

impl FromStr for SourceType {
    type Err = MesError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "worker" => Ok(Self::Worker),
            "station" => Ok(Self::Station),
            "node" => Ok(Self::Node),
            other => Err(MesError::InvalidRelation(format!("未知的來源類型: {other}"))),
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 關聯類型（鑑別欄位）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    Station,
    Operation,
    Substation,
    Material,
    Predecessor,
}

impl RelationType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Station => "station",
            Self::Operation => "operation",
            Self::Substation => "substation",
            Self::Material => "material",
            Self::Predecessor => "predecessor",
        }
    }
}

impl FromStr for RelationType {
    type Err = MesError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "station" => Ok(Self::Station),
            "operation" => Ok(Self::Operation),
            "substation" => Ok(Self::Substation),
            "material" => Ok(Self::Material),
            "predecessor" => Ok(Self::Predecessor),
            other => Err(MesError::InvalidRelation(format!("未知的關聯類型: {other}"))),
        }
    }
}

impl fmt::Display for RelationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 具體關聯種類（來源類型 × 關聯類型的合法組合）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelationKind {
    /// 人員 → 可操作工作站
    WorkerStation,
    /// 人員 → 可執行作業
    WorkerOperation,
    /// 工作站 → 可執行作業
    StationOperation,
    /// 節點 → 工作站（含優先序的備援鏈）
    NodeStation,
    /// 節點 → 子工作站
    NodeSubstation,
    /// 節點 → 前置節點
    NodePredecessor,
    /// 節點 → 物料（BOM 行）
    NodeMaterial,
}

impl RelationKind {
    pub const ALL: [RelationKind; 7] = [
        Self::WorkerStation,
        Self::WorkerOperation,
        Self::StationOperation,
        Self::NodeStation,
        Self::NodeSubstation,
        Self::NodePredecessor,
        Self::NodeMaterial,
    ];

    /// 由來源類型與關聯類型解析；不合法的組合回傳 `None`
    pub fn resolve(source_type: SourceType, relation_type: RelationType) -> Option<Self> {
        use RelationType as R;
        use SourceType as S;
        match (source_type, relation_type) {
            (S::Worker, R::Station) => Some(Self::WorkerStation),
            (S::Worker, R::Operation) => Some(Self::WorkerOperation),
            (S::Station, R::Operation) => Some(Self::StationOperation),
            (S::Node, R::Station) => Some(Self::NodeStation),
            (S::Node, R::Substation) => Some(Self::NodeSubstation),
            (S::Node, R::Predecessor) => Some(Self::NodePredecessor),
            (S::Node, R::Material) => Some(Self::NodeMaterial),
            _ => None,
        }
    }

    /// 對應的來源類型與關聯類型
    pub fn parts(self) -> (SourceType, RelationType) {
        use RelationType as R;
        use SourceType as S;
        match self {
            Self::WorkerStation => (S::Worker, R::Station),
            Self::WorkerOperation => (S::Worker, R::Operation),
            Self::StationOperation => (S::Station, R::Operation),
            Self::NodeStation => (S::Node, R::Station),
            Self::NodeSubstation => (S::Node, R::Substation),
            Self::NodePredecessor => (S::Node, R::Predecessor),
            Self::NodeMaterial => (S::Node, R::Material),
        }
    }
}

/// 關聯附帶資料（依關聯種類各自有意義）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelationMetadata {
    /// 優先序（節點 → 工作站，數字小者優先）
    pub priority: Option<i32>,

    /// BOM 用量
    pub quantity: Option<Decimal>,

    /// 單位換算比（每單位產出所需物料）
    pub unit_ratio: Option<Decimal>,

    /// 是否為推導出的 BOM 行
    pub is_derived: bool,
}

impl RelationMetadata {
    /// 工作站優先序
    pub fn priority(priority: i32) -> Self {
        Self {
            priority: Some(priority),
            ..Self::default()
        }
    }

    /// BOM 行：每單位產出的用量比
    pub fn bom_ratio(unit_ratio: Decimal) -> Self {
        Self {
            unit_ratio: Some(unit_ratio),
            ..Self::default()
        }
    }

    /// BOM 行：固定用量
    pub fn bom_quantity(quantity: Decimal) -> Self {
        Self {
            quantity: Some(quantity),
            ..Self::default()
        }
    }

    /// 建構器模式：標記為推導
    pub fn derived(mut self) -> Self {
        self.is_derived = true;
        self
    }
}

/// 實體關聯
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityRelation {
    /// 插入序號
    pub id: u64,

    /// 來源類型
    pub source_type: SourceType,

    /// 來源ID
    pub source_id: String,

    /// 關聯類型
    pub relation_type: RelationType,

    /// 目標ID
    pub target_id: String,

    /// 附帶資料
    pub metadata: RelationMetadata,

    /// 建立時間
    pub created_at: DateTime<Utc>,
}

impl EntityRelation {
    /// 關聯種類
    pub fn kind(&self) -> Option<RelationKind> {
        RelationKind::resolve(self.source_type, self.relation_type)
    }
}
