//! End-to-end tests of the task engine: scheduler, arena sharing, and
//! failure isolation across a batch.

use std::sync::Arc;

use mzflow::collection::{DataCollection, Row};
use mzflow::module::ModuleCall;
use mzflow::project::{OriginalHandling, Project};
use mzflow::provenance::{Lineage, ModuleId, ParameterSnapshot};
use mzflow::scheduler::{SchedulerConfig, TaskScheduler};
use mzflow::storage::ArenaBacking;
use mzflow::task::{TaskOutput, TaskStatus, WorkError, WorkFn};

fn import_raw_file(project: &Arc<Project>, name: &str, scans: usize) -> Arc<DataCollection> {
    let rows = (0..scans)
        .map(|i| Row::inline(i as u64, vec![100.0 + i as f64, 50.0]))
        .collect();
    project.add(DataCollection::new(name, rows, Lineage::empty(), None))
}

fn scaling_work(output_name: String, factor: f64) -> WorkFn {
    Box::new(move |ctx| {
        let input = ctx.input()?;
        ctx.progress.set_total(input.len());
        let mut rows = Vec::with_capacity(input.len());
        for row in ctx.cancel.checked(input.rows(), 16) {
            let row = row?;
            let values = input.row_values(row)?;
            rows.push(Row::inline(row.id, values.iter().map(|v| v * factor).collect()));
            ctx.progress.advance(1);
        }
        Ok(TaskOutput::new(output_name, rows))
    })
}

#[test]
fn normal_completion_publishes_one_collection() {
    let project = Arc::new(Project::new());
    let input = import_raw_file(&project, "run01", 100);

    let call = ModuleCall::new(
        ModuleId::new("scale", "Intensity scaler"),
        ParameterSnapshot::new().with("factor", 3.0),
    );
    let scheduler = TaskScheduler::new(SchedulerConfig { num_workers: 2 }).expect("start");
    let handle = scheduler
        .submit(call.create_task(
            "Scaling run01",
            Some(Arc::clone(&input)),
            Arc::clone(&project),
            OriginalHandling::KeepOriginal,
            scaling_work("run01 scaled".to_string(), 3.0),
        ))
        .expect("submit");

    scheduler.shutdown();

    assert_eq!(handle.status(), TaskStatus::Finished);
    assert_eq!(handle.progress(), 1.0);

    let output = handle.output().expect("published output");
    assert_eq!(output.len(), 100);
    assert_eq!(output.lineage().len(), input.lineage().len() + 1);
    // The predecessor's lineage is untouched.
    assert!(input.lineage().is_empty());
    assert_eq!(project.len(), 2);

    let values = output.row_values(&output.rows()[0]).expect("read row");
    assert_eq!(values, vec![300.0, 150.0]);
}

#[test]
fn cancel_before_start_has_no_side_effects() {
    let project = Arc::new(Project::new());
    let input = import_raw_file(&project, "run01", 10);

    let call = ModuleCall::new(ModuleId::new("scale", "Scaler"), ParameterSnapshot::new());
    let scheduler = TaskScheduler::new(SchedulerConfig { num_workers: 1 }).expect("start");

    // Hold the only worker so the victim stays queued.
    let (gate_tx, gate_rx) = crossbeam_gate();
    let blocker = scheduler
        .submit(call.create_task(
            "Queue blocker",
            None,
            Arc::clone(&project),
            OriginalHandling::KeepOriginal,
            Box::new(move |_| {
                let _ = gate_rx.recv();
                Ok(TaskOutput::new("blocker", Vec::new()))
            }),
        ))
        .expect("submit");

    let victim = scheduler
        .submit(call.create_task(
            "Canceled while queued",
            Some(input),
            Arc::clone(&project),
            OriginalHandling::KeepOriginal,
            Box::new(|_| {
                panic!("work function must not run for a task canceled before start");
            }),
        ))
        .expect("submit");

    victim.cancel();
    gate_tx.send(()).expect("release gate");
    scheduler.shutdown();

    assert_eq!(blocker.status(), TaskStatus::Finished);
    assert_eq!(victim.status(), TaskStatus::Canceled);
    assert!(victim.output().is_none());
    // Input plus the blocker's output; no victim output.
    assert_eq!(project.len(), 2);
}

#[test]
fn sibling_outputs_share_one_arena_until_the_last_dies() {
    let project = Arc::new(Project::new());
    let call = ModuleCall::with_arena(
        ModuleId::new("merge", "Scan merger"),
        ParameterSnapshot::new(),
        ArenaBacking::Memory,
    )
    .expect("allocate arena");

    let arena_backed_work = |name: &str| -> WorkFn {
        let name = name.to_string();
        Box::new(move |ctx: &mzflow::task::TaskContext| {
            let slice = ctx.store_doubles(&[1.0, 2.0, 3.0])?;
            Ok(TaskOutput::new(name, vec![Row::stored(0, slice)]))
        })
    };

    let scheduler = TaskScheduler::new(SchedulerConfig { num_workers: 2 }).expect("start");
    let first = scheduler
        .submit(call.create_task(
            "Merging file A",
            None,
            Arc::clone(&project),
            OriginalHandling::KeepOriginal,
            arena_backed_work("merged A"),
        ))
        .expect("submit");
    let second = scheduler
        .submit(call.create_task(
            "Merging file B",
            None,
            Arc::clone(&project),
            OriginalHandling::KeepOriginal,
            arena_backed_work("merged B"),
        ))
        .expect("submit");
    scheduler.shutdown();

    assert_eq!(first.status(), TaskStatus::Finished);
    assert_eq!(second.status(), TaskStatus::Finished);

    let out_a = first.output().expect("output A");
    let out_b = second.output().expect("output B");
    let arena = call.arena().expect("batch arena");

    // Both outputs resolve rows through the same region.
    assert_eq!(out_a.row_values(&out_a.rows()[0]).expect("read"), vec![1.0, 2.0, 3.0]);
    assert_eq!(out_b.row_values(&out_b.rows()[0]).expect("read"), vec![1.0, 2.0, 3.0]);

    let refs_before = arena.refcount();
    assert!(refs_before >= 3);

    // Destroy the first output collection: refcount drops, region survives.
    project.remove(&out_a);
    drop(out_a);
    drop(first);
    assert!(arena.refcount() < refs_before);
    assert!(!arena.is_released());
    assert_eq!(out_b.row_values(&out_b.rows()[0]).expect("read"), vec![1.0, 2.0, 3.0]);
}

#[test]
fn one_failure_in_a_batch_of_five_is_isolated() {
    let project = Arc::new(Project::new());
    let inputs: Vec<_> = (0..5)
        .map(|i| import_raw_file(&project, &format!("run{i:02}"), 20))
        .collect();

    let call = ModuleCall::new(
        ModuleId::new("align", "Scan aligner"),
        ParameterSnapshot::new().with("tolerance_ppm", 5.0),
    );
    let scheduler = TaskScheduler::new(SchedulerConfig { num_workers: 3 }).expect("start");

    let mut handles = Vec::new();
    for (index, input) in inputs.iter().enumerate() {
        let work: WorkFn = if index == 2 {
            Box::new(|_| Err(WorkError::failed("missing required column")))
        } else {
            scaling_work(format!("run{index:02} aligned"), 1.0)
        };
        handles.push(
            scheduler
                .submit(call.create_task(
                    format!("Aligning scans in run{index:02}"),
                    Some(Arc::clone(input)),
                    Arc::clone(&project),
                    OriginalHandling::KeepOriginal,
                    work,
                ))
                .expect("submit"),
        );
    }
    scheduler.shutdown();

    for (index, handle) in handles.iter().enumerate() {
        if index == 2 {
            assert_eq!(handle.status(), TaskStatus::Error);
            assert_eq!(
                handle.error_message().as_deref(),
                Some("missing required column")
            );
            assert!(handle.output().is_none());
        } else {
            assert_eq!(handle.status(), TaskStatus::Finished);
            assert!(handle.output().is_some());
        }
    }
    // 5 inputs + 4 outputs.
    assert_eq!(project.len(), 9);
}

#[test]
fn remove_original_policy_applies_at_publish() {
    let project = Arc::new(Project::new());
    let input = import_raw_file(&project, "run01", 10);

    let call = ModuleCall::new(ModuleId::new("filter", "Scan filter"), ParameterSnapshot::new());
    let scheduler = TaskScheduler::new(SchedulerConfig { num_workers: 1 }).expect("start");
    let handle = scheduler
        .submit(call.create_task(
            "Filtering run01",
            Some(Arc::clone(&input)),
            Arc::clone(&project),
            OriginalHandling::RemoveOriginal,
            scaling_work("run01".to_string(), 1.0),
        ))
        .expect("submit");
    scheduler.shutdown();

    assert_eq!(handle.status(), TaskStatus::Finished);
    assert_eq!(project.len(), 1);
    let survivor = project.get_by_name("run01").expect("derived collection");
    assert_eq!(survivor.lineage().len(), 1);
    assert_ne!(survivor.id(), input.id());
}

fn crossbeam_gate() -> (
    crossbeam_channel::Sender<()>,
    crossbeam_channel::Receiver<()>,
) {
    crossbeam_channel::bounded(0)
}
