//! 集成測試

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use mes::mes_core::{LotTag, MovementKind, RelationMetadata, RelationType, SourceType};
use mes::*;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 11, 3, 8, 0, 0).unwrap()
}

fn dec(value: i64) -> Decimal {
    Decimal::from(value)
}

/// 裁切 → 焊接 → 塗裝，焊接需要鋼材與焊線
fn bracket_engine() -> ProductionEngine {
    let engine = ProductionEngine::new(EngineConfig::default())
        .unwrap()
        .with_operation(Operation::new("OP-CUT", "裁切"))
        .with_operation(
            Operation::new("OP-WELD", "焊接").with_default_efficiency(Decimal::new(8, 1)),
        )
        .with_operation(Operation::new("OP-PAINT", "塗裝"));

    let relations = engine.relations();
    relations
        .put(SourceType::Node, "WELD", RelationType::Predecessor, "CUT", RelationMetadata::default())
        .unwrap();
    relations
        .put(SourceType::Node, "WELD", RelationType::Station, "ST-WELD-2", RelationMetadata::priority(2))
        .unwrap();
    relations
        .put(SourceType::Node, "WELD", RelationType::Station, "ST-WELD-1", RelationMetadata::priority(1))
        .unwrap();
    relations
        .put(
            SourceType::Node,
            "CUT",
            RelationType::Material,
            "STEEL-01",
            RelationMetadata::bom_ratio(dec(3)),
        )
        .unwrap();
    relations
        .put(
            SourceType::Node,
            "WELD",
            RelationType::Material,
            "WIRE-02",
            RelationMetadata::bom_ratio(Decimal::new(5, 1)),
        )
        .unwrap();
    engine
}

fn bracket_plan() -> ProductionPlan {
    ProductionPlan::new(
        "PLAN-BRKT",
        vec![
            ProductionPlanNode::new("CUT", "裁切", dec(30))
                .with_operation("OP-CUT")
                .with_output_quantity(dec(50)),
            ProductionPlanNode::new("WELD", "焊接", dec(60))
                .with_operation("OP-WELD")
                .with_output_quantity(dec(50)),
            ProductionPlanNode::new("PAINT", "塗裝", dec(20))
                .with_operation("OP-PAINT")
                .with_predecessors(["WELD"]),
        ],
    )
}

#[test]
fn test_launch_plan_enriches_and_precalculates() {
    let engine = bracket_engine();

    let launched = engine.launch_plan(bracket_plan(), start()).unwrap();

    assert_eq!(launched.plan_id, "PLAN-BRKT");
    let weld = &launched.nodes[1];
    assert_eq!(weld.node.predecessors, vec!["CUT".to_string()]);
    assert_eq!(weld.efficiency, Decimal::new(8, 1));
    assert_eq!(weld.effective_time, 75);
    assert_eq!(weld.estimated_start, start() + Duration::minutes(30));
    assert_eq!(weld.eligible_stations, vec!["ST-WELD-1", "ST-WELD-2"]);

    let paint = &launched.nodes[2];
    assert_eq!(paint.estimated_start, start() + Duration::minutes(105));
    assert_eq!(paint.estimated_end, start() + Duration::minutes(125));

    assert_eq!(launched.reservations.len(), 2);
    let steel = engine
        .reservations()
        .reservation("PLAN-BRKT/CUT", "STEEL-01")
        .unwrap();
    assert_eq!(steel.pre_production_qty, dec(150));
    assert_eq!(steel.reservation_status, ReservationStatus::Pending);
    let wire = engine
        .reservations()
        .reservation("PLAN-BRKT/WELD", "WIRE-02")
        .unwrap();
    assert_eq!(wire.pre_production_qty, dec(25));
}

#[test]
fn test_full_lifecycle_with_lots() {
    let engine = bracket_engine();
    engine.launch_plan(bracket_plan(), start()).unwrap();

    let ledger = engine.ledger();
    ledger
        .receive("STEEL-01", dec(200), Some(LotTag::new("S-1115", date(2025, 11, 15))))
        .unwrap();
    ledger
        .receive("STEEL-01", dec(100), Some(LotTag::new("S-1101", date(2025, 11, 1))))
        .unwrap();

    // 開工前預覽並確認
    let previews = engine.preview_task_start("PLAN-BRKT/CUT").unwrap();
    assert_eq!(previews.len(), 1);
    assert!(previews[0].sufficient);
    assert_eq!(previews[0].lots_to_consume[0].lot_number, "S-1101");

    let reserved = engine.start_task("PLAN-BRKT/CUT", &previews).unwrap();
    assert_eq!(reserved[0].actual_reserved_qty, dec(150));
    assert!(!reserved[0].partial_reservation);

    let stock = ledger.stock("STEEL-01");
    assert_eq!(stock.available_qty, dec(150));
    assert_eq!(stock.wip_reserved_qty, dec(150));
    assert_eq!(stock.lot_summary.active_lot_count, 1);

    // 完工：實際用了 140
    let reported = HashMap::from([("STEEL-01".to_string(), dec(140))]);
    let consumed = engine.complete_task("PLAN-BRKT/CUT", &reported).unwrap();
    assert_eq!(consumed[0].capped_consumed_qty, dec(140));
    assert_eq!(consumed[0].leftover_qty, dec(10));

    let stock = ledger.stock("STEEL-01");
    assert_eq!(stock.available_qty, dec(160));
    assert_eq!(stock.wip_reserved_qty, Decimal::ZERO);
    assert_eq!(stock.on_hand_qty(), dec(160));

    // 追溯
    assert_eq!(
        ledger.lot_consumers("STEEL-01", "S-1101"),
        vec!["PLAN-BRKT/CUT".to_string()]
    );
    let trail = ledger.movements_for_assignment("PLAN-BRKT/CUT");
    assert_eq!(trail.len(), 3);
    assert_eq!(trail[2].kind, MovementKind::In);
    assert_eq!(trail[2].lot_number(), Some("S-1115"));
}

#[test]
fn test_shortage_then_cancel() {
    let engine = bracket_engine();
    engine.launch_plan(bracket_plan(), start()).unwrap();
    engine.ledger().receive("WIRE-02", dec(10), None).unwrap();

    let reserved = engine.start_task("PLAN-BRKT/WELD", &[]).unwrap();

    assert!(reserved[0].partial_reservation);
    assert_eq!(
        reserved[0].warning.as_deref(),
        Some("Partial reservation: requested 25, reserved 10 (shortage 15)")
    );
    assert_eq!(engine.ledger().available("WIRE-02"), Decimal::ZERO);

    let released = engine.cancel_task("PLAN-BRKT/WELD").unwrap();

    assert_eq!(released.total_returned(), dec(10));
    assert_eq!(engine.ledger().available("WIRE-02"), dec(10));
    assert_eq!(
        engine
            .reservations()
            .reservation("PLAN-BRKT/WELD", "WIRE-02")
            .unwrap()
            .reservation_status,
        ReservationStatus::Released
    );
}

#[test]
fn test_cyclic_plan_rejected_before_any_write() {
    let engine = bracket_engine();
    engine
        .relations()
        .put(SourceType::Node, "CUT", RelationType::Predecessor, "PAINT", RelationMetadata::default())
        .unwrap();

    let err = engine.launch_plan(bracket_plan(), start()).unwrap_err();

    match err {
        MesError::Validation(errors) => assert!(errors
            .iter()
            .any(|e| matches!(e, mes::mes_core::PlanValidationError::CycleDetected { .. }))),
        other => panic!("unexpected error: {other}"),
    }
    assert!(engine.reservations().reservations().is_empty());
}

#[test]
fn test_concurrent_reservations_never_over_reserve() {
    const TASKS: usize = 16;

    let engine = ProductionEngine::new(EngineConfig::default()).unwrap();
    let mut nodes = Vec::new();
    for task in 0..TASKS {
        let node_id = format!("N{task:02}");
        engine
            .relations()
            .put(
                SourceType::Node,
                &node_id,
                RelationType::Material,
                "STEEL-01",
                RelationMetadata::bom_quantity(dec(30)),
            )
            .unwrap();
        nodes.push(ProductionPlanNode::new(node_id, "裁切", dec(10)));
    }
    engine
        .launch_plan(ProductionPlan::new("PLAN-RUSH", nodes), start())
        .unwrap();
    engine
        .ledger()
        .receive("STEEL-01", dec(100), Some(LotTag::new("S-1", date(2025, 11, 1))))
        .unwrap();
    engine.ledger().receive("STEEL-01", dec(50), None).unwrap();

    let engine = Arc::new(engine);
    let handles: Vec<_> = (0..TASKS)
        .map(|task| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                engine
                    .reservations()
                    .reserve(&format!("PLAN-RUSH/N{task:02}"), "STEEL-01")
                    .unwrap()
            })
        })
        .collect();

    let total: Decimal = handles
        .into_iter()
        .map(|handle| handle.join().unwrap().actual_reserved_qty)
        .sum();

    assert_eq!(total, dec(150));
    let stock = engine.ledger().stock("STEEL-01");
    assert_eq!(stock.available_qty, Decimal::ZERO);
    assert_eq!(stock.wip_reserved_qty, dec(150));
    assert_eq!(engine.reservations().wip_total("STEEL-01"), dec(150));
    assert_eq!(stock.lot_summary.active_lot_count, 0);
}

#[test]
fn test_concurrent_consume_and_release_keep_counters_consistent() {
    const TASKS: usize = 8;

    let engine = ProductionEngine::new(EngineConfig::default()).unwrap();
    let mut nodes = Vec::new();
    for task in 0..TASKS {
        let node_id = format!("N{task}");
        for (material, qty) in [("STEEL-01", 10), ("BOLT-M8", 4)] {
            engine
                .relations()
                .put(
                    SourceType::Node,
                    &node_id,
                    RelationType::Material,
                    material,
                    RelationMetadata::bom_quantity(dec(qty)),
                )
                .unwrap();
        }
        nodes.push(ProductionPlanNode::new(node_id, "組裝", dec(15)));
    }
    engine
        .launch_plan(ProductionPlan::new("PLAN-MIX", nodes), start())
        .unwrap();
    engine.ledger().receive("STEEL-01", dec(1000), None).unwrap();
    engine.ledger().receive("BOLT-M8", dec(1000), None).unwrap();
    for task in 0..TASKS {
        engine.start_task(&format!("PLAN-MIX/N{task}"), &[]).unwrap();
    }

    let engine = Arc::new(engine);
    let handles: Vec<_> = (0..TASKS)
        .map(|task| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                let assignment = format!("PLAN-MIX/N{task}");
                if task % 2 == 0 {
                    engine.cancel_task(&assignment).map(|_| ())
                } else {
                    let reported = HashMap::from([("STEEL-01".to_string(), dec(6))]);
                    engine.complete_task(&assignment, &reported).map(|_| ())
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap().unwrap();
    }

    // 4 個取消全數退回，4 個完工：鋼材用 6、螺栓全用
    let steel = engine.ledger().stock("STEEL-01");
    assert_eq!(steel.wip_reserved_qty, Decimal::ZERO);
    assert_eq!(steel.available_qty, dec(1000 - 4 * 6));
    let bolts = engine.ledger().stock("BOLT-M8");
    assert_eq!(bolts.wip_reserved_qty, Decimal::ZERO);
    assert_eq!(bolts.available_qty, dec(1000 - 4 * 4));
}

#[test]
fn test_config_from_json() {
    let config = EngineConfig::from_json(
        r#"{"lot_selection": "Fefo", "excess_consumption": "RecordDefect", "lock_timeout_ms": 250}"#,
    )
    .unwrap();

    let engine = ProductionEngine::new(config).unwrap();
    assert_eq!(engine.config().lock_timeout_ms, 250);
}
