//! # 任務生命週期範例
//!
//! 展示完整流程：
//! - 建立作業、工作站與 BOM 關聯
//! - 下達計劃（驗證 + 補齊工時 + BOM 展開）
//! - 開工前批次預覽與預留（含缺料）
//! - 完工耗用與取消釋放

use anyhow::Context;
use chrono::{NaiveDate, TimeZone, Utc};
use mes::mes_core::{LotTag, RelationMetadata, RelationType, SourceType};
use mes::*;
use rust_decimal::Decimal;
use std::collections::HashMap;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    println!("===== 托架生產：任務生命週期 =====\n");

    // 步驟 1: 建立引擎與主檔
    println!("[1] 建立作業與關聯");
    let engine = ProductionEngine::new(EngineConfig::default())?
        .with_operation(Operation::new("OP-CUT", "雷射裁切"))
        .with_operation(Operation::new("OP-WELD", "焊接").with_default_efficiency(Decimal::new(8, 1)));
    seed_relations(engine.relations())?;
    println!("    關聯筆數: {}\n", engine.relations().len());

    // 步驟 2: 入庫
    println!("[2] 物料入庫");
    let ledger = engine.ledger();
    ledger.receive("STEEL-01", Decimal::from(100), Some(lot("S-1101", 2025, 11, 1)?))?;
    ledger.receive("STEEL-01", Decimal::from(200), Some(lot("S-1115", 2025, 11, 15)?))?;
    ledger.receive("WIRE-02", Decimal::from(10), None)?;
    for code in ledger.material_codes() {
        let stock = ledger.stock(&code);
        println!(
            "    {}: 可用 {}, 有效批次 {}, 最舊批次 {:?}",
            code, stock.available_qty, stock.lot_summary.active_lot_count, stock.lot_summary.oldest_lot_date
        );
    }
    println!();

    // 步驟 3: 下達計劃
    println!("[3] 下達計劃");
    let plan = ProductionPlan::new(
        "PLAN-BRKT",
        vec![
            ProductionPlanNode::new("CUT", "裁切", Decimal::from(30))
                .with_operation("OP-CUT")
                .with_output_quantity(Decimal::from(80)),
            ProductionPlanNode::new("WELD", "焊接", Decimal::from(60))
                .with_operation("OP-WELD")
                .with_output_quantity(Decimal::from(80)),
        ],
    );
    let start_at = Utc
        .with_ymd_and_hms(2025, 11, 17, 8, 0, 0)
        .single()
        .context("無效的開始時間")?;
    let launched = engine.launch_plan(plan, start_at)?;
    for node in &launched.nodes {
        println!(
            "    {} 效率 {} 工時 {} 分 {} → {} 工作站 {:?}",
            node.node.id,
            node.efficiency,
            node.effective_time,
            node.estimated_start.format("%H:%M"),
            node.estimated_end.format("%H:%M"),
            node.eligible_stations
        );
    }
    for reservation in &launched.reservations {
        println!(
            "    計劃用量 {} / {}: {}",
            reservation.assignment_id, reservation.material_code, reservation.pre_production_qty
        );
    }
    println!();

    // 步驟 4: 裁切開工（預覽 → 確認 → 預留）
    println!("[4] 裁切開工");
    let previews = engine.preview_task_start("PLAN-BRKT/CUT")?;
    for preview in &previews {
        for allocation in &preview.lots_to_consume {
            println!(
                "    預覽 {} 批次 {} ({}): 扣 {} / 結餘 {}",
                preview.material_code,
                allocation.lot_number,
                allocation.lot_date,
                allocation.consume_qty,
                allocation.available_qty
            );
        }
    }
    for outcome in engine.start_task("PLAN-BRKT/CUT", &previews)? {
        println!("    已預留 {}", outcome.actual_reserved_qty);
    }
    println!();

    // 步驟 5: 焊接開工（焊線不足）
    println!("[5] 焊接開工");
    for outcome in engine.start_task("PLAN-BRKT/WELD", &[])? {
        println!(
            "    已預留 {} 部分預留: {} {}",
            outcome.actual_reserved_qty,
            outcome.partial_reservation,
            outcome.warning.unwrap_or_default()
        );
    }
    println!();

    // 步驟 6: 裁切完工，焊接取消
    println!("[6] 裁切完工、焊接取消");
    let reported = HashMap::from([("STEEL-01".to_string(), Decimal::from(150))]);
    for outcome in engine.complete_task("PLAN-BRKT/CUT", &reported)? {
        println!(
            "    耗用 {} (封頂: {}), 退回 {}",
            outcome.capped_consumed_qty, outcome.was_capped, outcome.leftover_qty
        );
    }
    let released = engine.cancel_task("PLAN-BRKT/WELD")?;
    println!("    焊接釋放共 {}", released.total_returned());
    println!();

    // 步驟 7: 追溯
    println!("[7] 追溯");
    println!(
        "    批次 S-1101 的使用任務: {:?}",
        ledger.lot_consumers("STEEL-01", "S-1101")
    );
    for movement in ledger.movements_for_assignment("PLAN-BRKT/CUT") {
        println!(
            "    #{} {:?} {:?} {} 批號 {:?}",
            movement.sequence,
            movement.kind,
            movement.reason,
            movement.quantity,
            movement.lot_number()
        );
    }

    Ok(())
}

fn lot(number: &str, year: i32, month: u32, day: u32) -> anyhow::Result<LotTag> {
    let lot_date = NaiveDate::from_ymd_opt(year, month, day).context("無效的批次日期")?;
    Ok(LotTag::new(number, lot_date))
}

fn seed_relations(relations: &EntityRelationStore) -> anyhow::Result<()> {
    relations.put(SourceType::Node, "WELD", RelationType::Predecessor, "CUT", RelationMetadata::default())?;
    relations.put(SourceType::Node, "CUT", RelationType::Station, "ST-LASER-1", RelationMetadata::priority(1))?;
    relations.put(SourceType::Node, "WELD", RelationType::Station, "ST-WELD-2", RelationMetadata::priority(2))?;
    relations.put(SourceType::Node, "WELD", RelationType::Station, "ST-WELD-1", RelationMetadata::priority(1))?;
    relations.put(SourceType::Node, "WELD", RelationType::Substation, "ST-JIG-A", RelationMetadata::default())?;
    relations.put(
        SourceType::Node,
        "CUT",
        RelationType::Material,
        "STEEL-01",
        RelationMetadata::bom_ratio(Decimal::new(25, 1)),
    )?;
    relations.put(
        SourceType::Node,
        "WELD",
        RelationType::Material,
        "WIRE-02",
        RelationMetadata::bom_ratio(Decimal::new(5, 1)),
    )?;
    relations.put(SourceType::Worker, "W-CHEN", RelationType::Station, "ST-WELD-1", RelationMetadata::default())?;
    relations.put(SourceType::Worker, "W-CHEN", RelationType::Operation, "OP-WELD", RelationMetadata::default())?;
    relations.put(SourceType::Station, "ST-WELD-1", RelationType::Operation, "OP-WELD", RelationMetadata::default())?;
    Ok(())
}
