//! # MES Ledger
//!
//! 庫存帳本、批次索引與物料鎖

pub mod dirty_tracking;
pub mod ledger;
pub mod lot_index;

// Re-export 主要類型
pub use dirty_tracking::DirtyTracker;
pub use ledger::{LedgerTx, MaterialTx, StockEffect, StockLedger};
pub use lot_index::{recompute_summary, LotIndex};
