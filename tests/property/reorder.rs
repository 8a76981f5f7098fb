//! Property-based tests for drag-and-drop reordering.
//!
//! Uses proptest to verify that for any board and any drag gesture:
//! 1. The total number of tasks never changes.
//! 2. The set of task ids never changes.
//! 3. An accepted move lands the task at the clamped destination.
//! 4. A rejected move leaves the board untouched.

use std::collections::BTreeSet;

use proptest::prelude::*;
use todosync::tasks::{DragLocation, DragOutcome, DragResult, TaskAction, TaskBoard, apply_drag};
use todosync_proto::task::{Category, Snapshot, Task, TaskId};

fn arb_category() -> impl Strategy<Value = Category> {
    prop::sample::select(Category::ALL.to_vec())
}

fn arb_snapshot() -> impl Strategy<Value = Snapshot> {
    (0usize..6, 0usize..6, 0usize..6).prop_map(|(a, b, c)| {
        let mut n = 0;
        let mut tasks = |count: usize| {
            (0..count)
                .map(|_| {
                    n += 1;
                    Task {
                        id: TaskId::from(format!("task-{n}")),
                        text: format!("Task {n}"),
                        completed: n % 3 == 0,
                    }
                })
                .collect::<Vec<_>>()
        };
        let non_urgent = tasks(a);
        let school = tasks(b);
        let club = tasks(c);
        Snapshot::new()
            .with_tasks(Category::NonUrgent, non_urgent)
            .with_tasks(Category::School, school)
            .with_tasks(Category::ClubWork, club)
    })
}

fn arb_drag() -> impl Strategy<Value = DragResult> {
    (
        arb_category(),
        0usize..8,
        prop::option::of((arb_category(), 0usize..8)),
    )
        .prop_map(|(category, index, destination)| {
            let source = DragLocation::new(category, index);
            match destination {
                Some((category, index)) => {
                    DragResult::new(source, DragLocation::new(category, index))
                }
                None => DragResult::cancelled(source),
            }
        })
}

fn ids(snapshot: &Snapshot) -> BTreeSet<TaskId> {
    snapshot.iter().map(|(_, task)| task.id.clone()).collect()
}

proptest! {
    #[test]
    fn drag_conserves_tasks(snapshot in arb_snapshot(), drag in arb_drag()) {
        let before = snapshot.clone();
        let mut after = snapshot;
        let result = apply_drag(&mut after, &drag);

        prop_assert_eq!(after.len(), before.len());
        prop_assert_eq!(ids(&after), ids(&before));
        if result.is_err() || result == Ok(DragOutcome::Ignored) {
            prop_assert_eq!(after, before);
        }
    }

    #[test]
    fn accepted_move_lands_at_clamped_destination(snapshot in arb_snapshot(), drag in arb_drag()) {
        let Some(destination) = drag.destination else {
            return Ok(());
        };
        let source = drag.source;
        let Some(moved) = snapshot.tasks(source.category).get(source.index).cloned() else {
            return Ok(());
        };
        let mut after = snapshot.clone();
        apply_drag(&mut after, &drag).unwrap();

        let list = after.tasks(destination.category);
        let expected = destination.index.min(list.len() - 1);
        prop_assert_eq!(&list[expected], &moved);
    }

    #[test]
    fn board_drag_keeps_ids_unique(snapshot in arb_snapshot(), drags in prop::collection::vec(arb_drag(), 0..12)) {
        let mut board = TaskBoard::from_snapshot(snapshot.clone());
        for drag in drags {
            let _ = board.apply(TaskAction::Drag(drag));
        }
        prop_assert_eq!(board.len(), snapshot.len());
        let all: Vec<_> = board.snapshot().iter().map(|(_, t)| t.id.clone()).collect();
        let unique: BTreeSet<_> = all.iter().cloned().collect();
        prop_assert_eq!(all.len(), unique.len());
        prop_assert_eq!(unique, ids(&snapshot));
    }
}
