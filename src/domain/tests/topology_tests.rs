//! Property tests for the pipeline topology and attempt counters.

use crate::domain::types::{Epoch, Stage};
use proptest::prelude::*;

fn arb_stage() -> impl Strategy<Value = Stage> {
    prop::sample::select(Stage::ORDER.to_vec())
}

proptest! {
    #[test]
    fn next_stage_is_the_following_ordinal(stage in arb_stage()) {
        match stage.next() {
            Some(next) => prop_assert_eq!(next.ordinal(), stage.ordinal() + 1),
            None => prop_assert_eq!(stage, Stage::Done),
        }
    }

    #[test]
    fn ordinals_are_unique_and_dense(stage in arb_stage()) {
        prop_assert!(stage.ordinal() < Stage::ORDER.len());
        prop_assert_eq!(Stage::ORDER[stage.ordinal()], stage);
    }

    #[test]
    fn epoch_next_is_strictly_increasing(start in 1u64..=1_000_000) {
        let epoch = Epoch(start);
        prop_assert!(epoch.next() > epoch);
        prop_assert_eq!(epoch.next().0, start + 1);
    }

    #[test]
    fn stage_names_round_trip_through_serde(stage in arb_stage()) {
        let json = serde_json::to_string(&stage).expect("serialize");
        let back: Stage = serde_json::from_str(&json).expect("deserialize");
        prop_assert_eq!(back, stage);
    }
}

#[test]
fn only_patch_shipping_stages_fan_out() {
    let fan_out: Vec<Stage> = Stage::ORDER
        .iter()
        .copied()
        .filter(Stage::is_fan_out)
        .collect();
    assert_eq!(fan_out, vec![Stage::Patches, Stage::Sandbox, Stage::Pr]);
}

#[test]
fn pipeline_ends_at_done() {
    assert_eq!(Stage::ORDER.last(), Some(&Stage::Done));
    assert_eq!(Stage::Done.next(), None);
}
