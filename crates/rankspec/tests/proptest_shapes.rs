//! Property tests for shape minimization and the rank-specialized lowering.

mod unranked_support;

use proptest::prelude::*;
use rankspec::ir::spec::{DType, ElementwiseBinaryOp, Operation};
use rankspec::shape::{broadcast_shapes, minimum_broadcast_shapes, num_elements};
use rankspec::transforms::{plan_rank_specialization, Strategy as Branch};
use unranked_support::{ramp_f32, run, single_op_function, transform, unranked};

fn dim() -> impl Strategy<Value = usize> {
    1usize..=4
}

/// Shapes that broadcast to a common target: each is a suffix of the target with
/// some extents replaced by 1.
fn broadcastable(operands: usize) -> impl Strategy<Value = Vec<Vec<usize>>> {
    prop::collection::vec(dim(), 0..=6).prop_flat_map(move |target| {
        let len = target.len();
        let operand = (0..=len, prop::collection::vec(prop::bool::ANY, len));
        (
            prop::collection::vec(operand, operands),
            Just(target),
        )
            .prop_map(|(picks, target)| {
                picks
                    .into_iter()
                    .map(|(skip, keep)| {
                        target[skip..]
                            .iter()
                            .zip(&keep[skip..])
                            .map(|(&extent, &kept)| if kept { extent } else { 1 })
                            .collect::<Vec<usize>>()
                    })
                    .collect::<Vec<_>>()
            })
    })
}

proptest! {
    #[test]
    fn minimized_shapes_are_reshapes(shapes in broadcastable(3)) {
        let minimized = minimum_broadcast_shapes(&shapes);
        prop_assert_eq!(minimized.len(), shapes.len());
        for (original, reduced) in shapes.iter().zip(&minimized) {
            prop_assert_eq!(num_elements(original), num_elements(reduced));
            prop_assert!(reduced.len() <= original.len().max(1));
            prop_assert!(reduced.first() != Some(&1));
        }
    }

    #[test]
    fn minimized_broadcast_is_a_reshape(shapes in broadcastable(2)) {
        let full = broadcast_shapes(&shapes).expect("generated shapes broadcast");
        let minimized = minimum_broadcast_shapes(&shapes);
        let reduced = broadcast_shapes(&minimized).expect("minimized shapes broadcast");
        prop_assert_eq!(num_elements(&full), num_elements(&reduced));
        prop_assert!(reduced.len() <= full.len());
    }

    #[test]
    fn planner_never_exceeds_generated_rank(shapes in broadcastable(2)) {
        let strategy = plan_rank_specialization(2, 8)
            .select(&shapes)
            .expect("rank 6 fits under a ceiling of 8");
        if let Branch::Specialized { rank } = strategy {
            let minimized = minimum_broadcast_shapes(&shapes);
            let max_rank = minimized.iter().map(Vec::len).max().unwrap_or(0);
            prop_assert_eq!(rank, max_rank.max(1));
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn rewritten_maximum_matches_direct_evaluation(shapes in broadcastable(2)) {
        let original = single_op_function(
            "maximum",
            Operation::BroadcastBinary(ElementwiseBinaryOp::Maximum),
            &[unranked(DType::F32), unranked(DType::F32)],
            unranked(DType::F32),
        );
        let mut rewritten = original.clone();
        transform(&mut rewritten);

        let inputs = [ramp_f32(&shapes[0], 0.0), ramp_f32(&shapes[1], 0.25)];
        let expected = run(&original, &inputs).expect("original");
        match run(&rewritten, &inputs) {
            Ok(actual) => prop_assert_eq!(actual, expected),
            Err(err) => {
                // Reduced ranks above the binary ceiling are rejected at runtime.
                let minimized = minimum_broadcast_shapes(&shapes);
                let max_rank = minimized.iter().map(Vec::len).max().unwrap_or(0);
                prop_assert!(max_rank > 5, "unexpected failure {err} for {shapes:?}");
            }
        }
    }
}
