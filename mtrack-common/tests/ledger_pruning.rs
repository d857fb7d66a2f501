//! Property tests for ancestor pruning and removal planning.

use mtrack_common::{
    EndpointId, Kind, LedgerEntry, ModelCommand, ModelPath, plan_removals,
    prune_redundant_ancestors,
};
use proptest::prelude::*;
use std::collections::BTreeSet;

fn entry(endpoint: &str, model: ModelCommand) -> LedgerEntry {
    let command = model.to_string();
    LedgerEntry::new(EndpointId::new(endpoint), model, command).unwrap()
}

fn create(endpoint: &str, path: &str) -> LedgerEntry {
    entry(endpoint, ModelCommand::create(path, "t", &[]))
}

/// Short paths over a tiny alphabet so nesting happens often. `plans/plan`
/// and `snapshots` are in the alphabet so creates can land below the fixed
/// plan and snapshot paths.
fn path_strategy() -> impl Strategy<Value = String> {
    prop::collection::vec(
        prop::sample::select(vec!["a", "b", "plans", "plan", "snapshots"]),
        1..4,
    )
    .prop_map(|segments| format!("/{}", segments.join("/")))
}

/// Every tracked kind, weighted towards creates.
fn model_strategy() -> impl Strategy<Value = ModelCommand> {
    prop_oneof![
        4 => path_strategy().prop_map(|p| ModelCommand::create(p.as_str(), "t", &[])),
        2 => path_strategy().prop_map(|p| ModelCommand::inherit(p.as_str(), "/software/items/s")),
        1 => path_strategy().prop_map(|p| ModelCommand::Export {
            path: ModelPath::new(&p),
            file: "/tmp/export.xml".to_string(),
        }),
        1 => path_strategy().prop_map(|p| ModelCommand::remove(p.as_str())),
        1 => Just(ModelCommand::RunPlan),
        1 => prop::option::of(Just("foo".to_string()))
            .prop_map(|name| ModelCommand::CreateSnapshot { name }),
    ]
}

fn entries_strategy() -> impl Strategy<Value = Vec<LedgerEntry>> {
    prop::collection::vec(
        (prop::sample::select(vec!["ms1", "node1"]), model_strategy()),
        0..12,
    )
    .prop_map(|pairs| pairs.into_iter().map(|(e, m)| entry(e, m)).collect())
}

fn key_set(entries: &[LedgerEntry]) -> BTreeSet<(String, String)> {
    entries
        .iter()
        .map(|e| (e.endpoint.to_string(), e.target_path.to_string()))
        .collect()
}

fn covers(ancestor: &LedgerEntry, entry: &LedgerEntry) -> bool {
    ancestor.is_undoable()
        && ancestor.endpoint == entry.endpoint
        && ancestor.target_path.is_strict_ancestor_of(&entry.target_path)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(300))]

    #[test]
    fn test_pruning_is_order_independent(
        (entries, shuffled) in entries_strategy()
            .prop_flat_map(|v| (Just(v.clone()), Just(v).prop_shuffle()))
    ) {
        let a = key_set(&prune_redundant_ancestors(&entries));
        let b = key_set(&prune_redundant_ancestors(&shuffled));
        prop_assert_eq!(a, b);
    }

    #[test]
    fn test_only_undoable_survivors_shadow_others(entries in entries_strategy()) {
        let survivors = prune_redundant_ancestors(&entries);
        for x in &survivors {
            for y in &survivors {
                prop_assert!(!covers(x, y));
            }
        }
        // every dropped entry sits below a surviving undoable entry
        for dropped in entries.iter().filter(|e| !survivors.contains(e)) {
            prop_assert!(survivors.iter().any(|s| covers(s, dropped)));
        }
    }

    #[test]
    fn test_every_outermost_undoable_path_removed_once(entries in entries_strategy()) {
        let steps = plan_removals(&entries, &[]);
        let removed: Vec<(String, String)> = steps
            .iter()
            .map(|s| (s.endpoint.to_string(), s.command.target_path().to_string()))
            .collect();
        let unique: BTreeSet<_> = removed.iter().cloned().collect();
        prop_assert_eq!(removed.len(), unique.len());

        let outermost: Vec<LedgerEntry> = entries
            .iter()
            .filter(|e| e.is_undoable() && !entries.iter().any(|a| covers(a, e)))
            .cloned()
            .collect();
        prop_assert_eq!(unique, key_set(&outermost));
        prop_assert!(steps
            .iter()
            .all(|s| matches!(s.undoes, Kind::CreateOrLink | Kind::Inherit)));
    }
}

#[test]
fn test_unrelated_entries_are_undone_in_reverse() {
    let entries = vec![create("ms1", "/e1"), create("ms1", "/e2"), create("ms1", "/e3")];
    let steps = plan_removals(&entries, &[]);
    let rendered: Vec<String> = steps.iter().map(|s| s.command.to_string()).collect();
    assert_eq!(
        rendered,
        vec!["litp remove -p /e3", "litp remove -p /e2", "litp remove -p /e1"]
    );
}

#[test]
fn test_create_below_plan_path_survives_plan_run() {
    let entries = vec![
        entry("ms1", ModelCommand::RunPlan),
        create("ms1", "/plans/plan/phase"),
    ];
    let steps = plan_removals(&entries, &[]);
    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0].command, ModelCommand::remove("/plans/plan/phase"));
}
