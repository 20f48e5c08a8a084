mod support;

use mesh_sweep::algs::wire::{MAX_TAG, SweepCommTags};
use mesh_sweep::prelude::*;
use mesh_sweep::topology::meshgen::slab_partition;
use support::run_ranks;

const TAG_BASE: u16 = 101;

fn plan_on(comm: &RayonComm, topo: &PartitionTopology, d: Direction) -> SweepPlan {
    SweepPlan::build(topo, d, comm, SweepCommTags::plan_tag(TAG_BASE)).unwrap()
}

#[test]
fn slab_two_partitions_plus_x() {
    let plans = run_ranks(2, |comm| {
        let topo = slab_partition(8, 2, comm.rank(), false).unwrap();
        plan_on(&comm, &topo, Direction::new(1.0, 0.0, 0.0))
    });

    for plan in &plans {
        assert_eq!(plan.order(), &[0, 1, 2, 3]);
        assert!(plan.delayed_edges().is_empty());
        assert!(plan.delayed_location_dependencies().is_empty());
        assert!(plan.delayed_location_successors().is_empty());
        plan.validate_invariants().unwrap();
    }
    // partition 0 is a pure predecessor of partition 1
    assert!(plans[0].location_dependencies().is_empty());
    assert_eq!(plans[0].location_successors(), &[1]);
    assert_eq!(plans[1].location_dependencies(), &[0]);
    assert!(plans[1].location_successors().is_empty());
    assert_eq!(plans[0].global_levels(), &[vec![0], vec![1]]);
}

#[test]
fn slab_two_partitions_minus_x_reverses_roles() {
    let plans = run_ranks(2, |comm| {
        let topo = slab_partition(8, 2, comm.rank(), false).unwrap();
        plan_on(&comm, &topo, Direction::new(-1.0, 0.0, 0.0))
    });
    assert_eq!(plans[0].order(), &[3, 2, 1, 0]);
    assert_eq!(plans[0].location_dependencies(), &[1]);
    assert_eq!(plans[1].location_successors(), &[0]);
    assert_eq!(plans[1].level(), Some(0));
}

#[test]
fn periodic_ring_gets_one_delayed_edge_seen_by_all() {
    let plans = run_ranks(3, |comm| {
        let topo = slab_partition(6, 3, comm.rank(), true).unwrap();
        plan_on(&comm, &topo, Direction::new(1.0, 0.0, 0.0))
    });

    for plan in &plans {
        assert_eq!(plan.delayed_edges(), &[(2, 0)]);
        assert_eq!(plan.global_levels(), &[vec![0], vec![1], vec![2]]);
    }
    // both ends of the delayed edge agree
    assert_eq!(plans[2].delayed_location_successors(), &[0]);
    assert_eq!(plans[2].location_successors(), &[0]);
    assert_eq!(plans[0].delayed_location_dependencies(), &[2]);
    assert!(plans[0].location_dependencies().is_empty());
    // ordinary edges are untouched
    assert_eq!(plans[1].location_dependencies(), &[0]);
    assert!(plans[1].delayed_location_successors().is_empty());
}

#[test]
fn batch_build_matches_per_direction_build() {
    let dirs = [
        Direction::new(1.0, 0.0, 0.0),
        Direction::new(-1.0, 0.0, 0.0),
        Direction::new(0.5, 0.0, 0.0),
    ];
    let results = run_ranks(3, |comm| {
        let topo = slab_partition(9, 3, comm.rank(), true).unwrap();
        let batch = build_plans(&topo, &dirs, &comm, SweepCommTags::plan_tag(TAG_BASE)).unwrap();
        let single: Vec<_> = dirs.iter().map(|&d| plan_on(&comm, &topo, d)).collect();
        (batch, single)
    });
    for (batch, single) in results {
        assert_eq!(batch, single);
    }
}

/// Two slab cells whose shared faces both claim to point downwind.
fn two_cell_local_cycle() -> PartitionTopology {
    let gid = |n| GlobalCellId::new(n).unwrap();
    let cells = vec![
        Cell::new(
            gid(0),
            CellShape::Slab,
            vec![
                Face::new([-1.0, 0.0, 0.0], vec![0], FaceNeighbor::Boundary),
                Face::new([1.0, 0.0, 0.0], vec![1], FaceNeighbor::Local(1)),
            ],
        ),
        Cell::new(
            gid(1),
            CellShape::Slab,
            vec![
                Face::new([1.0, 0.0, 0.0], vec![1], FaceNeighbor::Local(0)),
                Face::new([1.0, 0.0, 0.0], vec![2], FaceNeighbor::Boundary),
            ],
        ),
    ];
    PartitionTopology::new(0, 1, cells).unwrap()
}

#[test]
fn local_cycle_is_a_configuration_error() {
    let topo = two_cell_local_cycle();
    let d = Direction::new(1.0, 0.0, 0.0);
    let err = SweepPlan::build(&topo, d, &NoComm, SweepCommTags::plan_tag(TAG_BASE)).unwrap_err();
    assert_eq!(
        err,
        MeshSweepError::CyclicLocalDependency {
            direction: d,
            partition: 0,
            unresolved: 2
        }
    );
    assert!(err.to_string().contains("partition 0"));
}

#[test]
fn neighbors_disagreeing_on_orientation_are_rejected() {
    let gid = |n| GlobalCellId::new(n).unwrap();
    let errs = run_ranks(2, |comm| {
        let me = comm.rank();
        let other = 1 - me;
        // both partitions claim the shared face is downwind for them
        let cell = Cell::new(
            gid(me as u64),
            CellShape::Slab,
            vec![
                Face::new([-1.0, 0.0, 0.0], vec![10 + me as u64], FaceNeighbor::Boundary),
                Face::new(
                    [1.0, 0.0, 0.0],
                    vec![5],
                    FaceNeighbor::Remote {
                        partition: other,
                        cell: gid(other as u64),
                    },
                ),
            ],
        );
        let topo = PartitionTopology::new(me, 2, vec![cell]).unwrap();
        SweepPlan::build(
            &topo,
            Direction::new(1.0, 0.0, 0.0),
            &comm,
            SweepCommTags::plan_tag(TAG_BASE),
        )
        .unwrap_err()
    });
    for err in errs {
        assert!(matches!(
            err,
            MeshSweepError::InconsistentPartitionTopology { a: 0, b: 1, .. }
        ));
    }
}

#[test]
fn tag_space_is_checked() {
    let last_fitting = ((MAX_TAG - 3) / 3) as usize;
    assert!(SweepCommTags::for_angle_set(0, last_fitting).is_ok());
    assert!(matches!(
        SweepCommTags::for_angle_set(0, last_fitting + 1),
        Err(MeshSweepError::TagSpaceExhausted { .. })
    ));
    assert!(SweepCommTags::for_angle_set(MAX_TAG as u16, 0).is_err());
}
