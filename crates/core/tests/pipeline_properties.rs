use synced_core::{
    Assembler, CategoryPlanner, CategoryRequest, InjectionEngine, LabelSchema, LeakageConfig,
    RepairPass, Row, RowId, RowSet, RowStatus, Split, TargetDistribution,
};

const SEED: u64 = 20240611;

fn corpus() -> Vec<Row> {
    let pairs = [
        ("The train leaves at 8.", "Der Zug fährt um 8 Uhr ab."),
        ("Do not touch the cable.", "Berühren Sie das Kabel nicht."),
        ("Johnson flew to Paris on Monday.", "Johnson flog am Montag nach Paris."),
        ("Always wear gloves.", "Tragen Sie unbedingt Handschuhe."),
        ("The bridge is closed.", "Die Brücke ist geschlossen."),
        ("Take at least two tablets.", "Nehmen Sie mindestens zwei Tabletten."),
        ("Turn left at the church.", "Biegen Sie an der Kirche links ab."),
        ("There is no risk.", "Es besteht kein Risiko."),
        ("The museum opens at 10.", "Das Museum öffnet um 10 Uhr."),
        ("It is raining.", "Es regnet."),
        ("The meeting is in Berlin.", "Das Treffen ist in Berlin."),
        ("Smoking is not allowed.", "Rauchen ist nicht erlaubt."),
    ];
    pairs
        .iter()
        .enumerate()
        .map(|(i, (src, mt))| {
            let split = if i % 4 == 3 { Split::Eval } else { Split::Train };
            Row::pending(format!("r{:02}", i), *src, *mt).with_split(split)
        })
        .collect()
}

fn run(rows: Vec<Row>, schema: &LabelSchema) -> RowSet {
    let set = RowSet::from_rows(rows).unwrap();
    let requests: Vec<(RowId, CategoryRequest)> = set
        .iter()
        .map(|r| (r.id().clone(), CategoryRequest::Any))
        .collect();
    let plan = CategoryPlanner::new(schema, TargetDistribution::uniform(schema), SEED)
        .plan(&requests)
        .unwrap();
    let engine = InjectionEngine::new(schema);
    let (injected, _) = engine.inject_batch(&set, &plan, SEED).unwrap();
    RepairPass::new(&engine, SEED, 3).repair(&injected).unwrap().rows
}

#[test]
fn injection_is_deterministic_and_order_independent() {
    let schema = LabelSchema::builtin().unwrap();
    let forward = run(corpus(), &schema);
    let mut reversed = corpus();
    reversed.reverse();
    let backward = run(reversed, &schema);

    for row in forward.iter() {
        assert_eq!(Some(row), backward.get(row.id()), "row {} differs", row.id());
    }
}

#[test]
fn every_row_leaves_pending() {
    let schema = LabelSchema::builtin().unwrap();
    let rows = run(corpus(), &schema);
    assert_eq!(rows.len(), corpus().len());
    for row in rows.iter() {
        assert!(matches!(
            row.status,
            RowStatus::Injected | RowStatus::Repaired | RowStatus::Failed
        ));
        if row.status == RowStatus::Failed {
            assert!(row.failure.is_some());
        }
    }
}

#[test]
fn repair_is_idempotent() {
    let schema = LabelSchema::builtin().unwrap();
    let engine = InjectionEngine::new(&schema);
    let once = run(corpus(), &schema);
    let twice = RepairPass::new(&engine, SEED, 3).repair(&once).unwrap();
    assert_eq!(twice.rows.rows(), once.rows());
    assert_eq!(twice.repaired, 0);
}

#[test]
fn labelled_rows_conform_to_schema() {
    let schema = LabelSchema::builtin().unwrap();
    for row in run(corpus(), &schema).iter() {
        if row.status.is_labelled() {
            assert!(schema.validate_row(row).is_ok(), "row {} invalid", row.id());
            let category = schema
                .category_for_multiclass(row.label_multiclass.as_deref().unwrap())
                .unwrap();
            if category.is_error() {
                assert_ne!(row.candidate_translation, row.reference_translation);
            } else {
                assert_eq!(row.candidate_translation, row.reference_translation);
            }
        }
    }
}

#[test]
fn assembled_splits_are_disjoint_and_leak_free() {
    let schema = LabelSchema::builtin().unwrap();
    let rows = run(corpus(), &schema);
    let mut frozen = Row::frozen_eval("E1", "The bridge is closed.", "Die Brücke ist geschlossen.")
        .with_labels("NOT", "NOT", vec![5, 1, 1, 1, 1]);
    frozen.schema_version = Some(schema.version().to_string());

    let assembly = Assembler::new(&schema, LeakageConfig::default())
        .assemble(&rows, &[frozen], &[], schema.version())
        .unwrap();

    let guard = synced_core::LeakageGuard::build(
        &assembly.eval_final,
        Vec::new(),
        LeakageConfig::default(),
    )
    .unwrap();
    for row in &assembly.train_final {
        assert!(guard.check(row).is_none(), "row {} leaks", row.id());
        assert!(assembly.eval_final.iter().all(|e| e.id() != row.id()));
    }

    let placed = assembly.train_final.len()
        + assembly.eval_final.len()
        - assembly.frozen_eval_rows
        + assembly.excluded.len();
    assert_eq!(placed, rows.len());
    assert!(assembly.eval_final.iter().any(|r| r.id().as_str() == "E1"));
    assert!(assembly
        .train_final
        .iter()
        .chain(&assembly.eval_final)
        .all(|r| r.status == RowStatus::Final));
}
