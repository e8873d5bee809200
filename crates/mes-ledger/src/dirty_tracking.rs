//! 交易內的髒標記追蹤（哪些物料寫入了帶批號的異動）

use std::collections::BTreeSet;

/// 髒標記追蹤器
#[derive(Debug, Default)]
pub struct DirtyTracker {
    dirty_materials: BTreeSet<String>,
}

impl DirtyTracker {
    /// 創建新的追蹤器
    pub fn new() -> Self {
        Self::default()
    }

    /// 標記物料的批次摘要需要重算
    pub fn mark_dirty(&mut self, material_code: &str) {
        if !self.dirty_materials.contains(material_code) {
            self.dirty_materials.insert(material_code.to_string());
        }
    }

    /// 檢查物料是否為髒
    pub fn is_dirty(&self, material_code: &str) -> bool {
        self.dirty_materials.contains(material_code)
    }

    /// 是否沒有任何髒標記
    pub fn is_empty(&self) -> bool {
        self.dirty_materials.is_empty()
    }

    /// 取出並清除所有髒物料
    pub fn take(&mut self) -> Vec<String> {
        std::mem::take(&mut self.dirty_materials).into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_and_take() {
        let mut tracker = DirtyTracker::new();
        assert!(tracker.is_empty());

        tracker.mark_dirty("RESIN-01");
        tracker.mark_dirty("RESIN-01");
        tracker.mark_dirty("BOLT-M8");

        assert!(tracker.is_dirty("RESIN-01"));
        assert!(!tracker.is_dirty("STEEL-01"));
        assert_eq!(tracker.take(), vec!["BOLT-M8".to_string(), "RESIN-01".to_string()]);
        assert!(tracker.is_empty());
    }
}
