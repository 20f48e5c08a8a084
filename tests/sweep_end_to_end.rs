mod support;

use mesh_sweep::algs::wire::SweepCommTags;
use mesh_sweep::prelude::*;
use mesh_sweep::sweep::{
    ExchangeStatus, FluxDataStore, FluxExchangeBuffer, exchange_cell_views,
};
use mesh_sweep::topology::meshgen::{quad_grid_partition, slab_partition};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Barrier};
use std::time::Duration;
use support::{MaxPlusOne, group, merged, phi_by_gid, run_ranks};

fn scheduler(
    comm: &RayonComm,
    topo: PartitionTopology,
    groups: &[DirectionGroup],
    config: &SweepConfig,
) -> (SweepScheduler<RayonComm>, LocalFluxBuffer) {
    let topo = Arc::new(topo);
    let phi = LocalFluxBuffer::for_topology(&topo, 1, config.num_groups);
    let sched = SweepScheduler::new(topo, groups, comm, config).unwrap();
    (sched, phi)
}

#[test]
fn slab_plus_x_counts_cells_from_the_left() {
    let per_rank = run_ranks(2, |comm| {
        let topo = slab_partition(8, 2, comm.rank(), false).unwrap();
        let (mut sched, mut phi) =
            scheduler(&comm, topo, &[group(1.0, 0.0, &[0])], &SweepConfig::default());
        let mut solver = MaxPlusOne::default();
        sched.execute_sweep(&mut solver, &mut phi).unwrap();
        assert_eq!(solver.solved, 4);
        phi_by_gid(sched.topology(), &phi)
    });
    let expected: Vec<_> = (0..8).map(|g| (g, (g + 1) as f64)).collect();
    assert_eq!(merged(per_rank), expected);
}

#[test]
fn opposite_directions_in_one_scheduler() {
    let per_rank = run_ranks(2, |comm| {
        let topo = slab_partition(8, 2, comm.rank(), false).unwrap();
        let groups = [group(1.0, 0.0, &[0]), group(-1.0, 0.0, &[1])];
        let (mut sched, mut phi) = scheduler(&comm, topo, &groups, &SweepConfig::default());
        assert_eq!(sched.angle_sets().len(), 2);
        sched.execute_sweep(&mut MaxPlusOne::default(), &mut phi).unwrap();
        phi_by_gid(sched.topology(), &phi)
    });
    // (g + 1) from the left plus (8 - g) from the right
    for (_, v) in merged(per_rank) {
        assert_eq!(v, 9.0);
    }
}

#[test]
fn slab_minus_x_counts_from_the_right() {
    let per_rank = run_ranks(2, |comm| {
        let topo = slab_partition(8, 2, comm.rank(), false).unwrap();
        let (mut sched, mut phi) =
            scheduler(&comm, topo, &[group(-1.0, 0.0, &[0])], &SweepConfig::default());
        sched.execute_sweep(&mut MaxPlusOne::default(), &mut phi).unwrap();
        phi_by_gid(sched.topology(), &phi)
    });
    let expected: Vec<_> = (0..8).map(|g| (g, (8 - g) as f64)).collect();
    assert_eq!(merged(per_rank), expected);
}

#[test]
fn periodic_ring_uses_previous_iteration_across_delayed_edge() {
    let per_rank = run_ranks(3, |comm| {
        let topo = slab_partition(6, 3, comm.rank(), true).unwrap();
        let (mut sched, mut phi) =
            scheduler(&comm, topo, &[group(1.0, 0.0, &[0])], &SweepConfig::default());
        let mut solver = MaxPlusOne::default();
        sched.execute_sweep(&mut solver, &mut phi).unwrap();
        let first = phi_by_gid(sched.topology(), &phi);
        sched.execute_sweep(&mut solver, &mut phi).unwrap();
        let second = phi_by_gid(sched.topology(), &phi);
        (first, second)
    });
    let (first, second): (Vec<_>, Vec<_>) = per_rank.into_iter().unzip();
    let first: Vec<f64> = merged(first).into_iter().map(|(_, v)| v).collect();
    let second: Vec<f64> = merged(second).into_iter().map(|(_, v)| v).collect();
    assert_eq!(first, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    assert_eq!(second, vec![7.0, 8.0, 9.0, 10.0, 11.0, 12.0]);
}

fn quadrant_owner(i: usize, j: usize) -> usize {
    (i / 2) + 2 * (j / 2)
}

#[test]
fn chunked_messages_match_single_partition_sweep() {
    let groups = [group(1.0, 0.5, &[0, 1]), group(-0.3, 1.0, &[2, 3])];
    let config = SweepConfig {
        eager_limit_bytes: 16,
        max_in_flight: 3,
        num_groups: 2,
        ..SweepConfig::default()
    };

    let reference = {
        let topo = quad_grid_partition(4, 4, 1, 0, |_, _| 0).unwrap();
        let topo = Arc::new(topo);
        let mut phi = LocalFluxBuffer::for_topology(&topo, 1, 2);
        let mut sched = SweepScheduler::new(topo.clone(), &groups, &NoComm, &config).unwrap();
        sched.execute_sweep(&mut MaxPlusOne::default(), &mut phi).unwrap();
        phi_by_gid(&topo, &phi)
    };

    let per_rank = run_ranks(4, |comm| {
        let topo = quad_grid_partition(4, 4, 4, comm.rank(), quadrant_owner).unwrap();
        let (mut sched, mut phi) = scheduler(&comm, topo, &groups, &config);
        // a 2-face boundary carries 2 nodes x 2 angles x 2 groups per face
        for set in sched.angle_sets() {
            for layout in set.buffer().downstream_layouts() {
                assert_eq!(layout.slots.len(), 8);
            }
        }
        sched.execute_sweep(&mut MaxPlusOne::default(), &mut phi).unwrap();
        phi_by_gid(sched.topology(), &phi)
    });
    let mut reference = reference;
    reference.sort_by_key(|&(g, _)| g);
    assert_eq!(merged(per_rank), reference);
}

/// Run `f` on its own thread; a sweep that hangs fails the test instead of
/// the whole run.
fn within<T, F>(secs: u64, f: F) -> T
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let _ = tx.send(f());
    });
    rx.recv_timeout(Duration::from_secs(secs))
        .expect("sweep did not finish in time")
}

#[test]
fn opposite_groups_under_backpressure_finish_within_in_flight_limit() {
    // one value per message, two values per boundary face: every neighbor
    // buffer needs two messages but only one may be in flight, and each
    // partition is upstream for one group and downstream for the other
    let config = SweepConfig {
        eager_limit_bytes: 8,
        max_in_flight: 1,
        num_groups: 2,
        ..SweepConfig::default()
    };
    let limit = config.max_in_flight;
    let (phi, peak) = within(30, move || {
        let world = RayonComm::world(2);
        let observer = world[0].clone();
        let psi_tags: Vec<u16> = (0..2)
            .map(|k| SweepCommTags::for_angle_set(config.base_tag, k).unwrap().psi.as_u16())
            .collect();
        let running = AtomicUsize::new(world.len());
        let peak = AtomicUsize::new(0);

        let per_rank = std::thread::scope(|s| {
            s.spawn(|| {
                while running.load(Ordering::Acquire) > 0 {
                    for rank in 0..2 {
                        for &tag in &psi_tags {
                            let pending = observer.mailbox().pending_from(rank, tag);
                            peak.fetch_max(pending, Ordering::Relaxed);
                        }
                    }
                    std::thread::yield_now();
                }
            });
            let ranks: Vec<_> = world
                .into_iter()
                .map(|comm| {
                    let (config, running) = (&config, &running);
                    s.spawn(move || {
                        let topo = slab_partition(4, 2, comm.rank(), false).unwrap();
                        let groups = [group(1.0, 0.0, &[0]), group(-1.0, 0.0, &[1])];
                        let (mut sched, mut phi) = scheduler(&comm, topo, &groups, config);
                        for set in sched.angle_sets() {
                            for layout in set.buffer().downstream_layouts() {
                                assert_eq!(layout.slots.len(), 2);
                            }
                        }
                        sched.execute_sweep(&mut MaxPlusOne::default(), &mut phi).unwrap();
                        running.fetch_sub(1, Ordering::Release);
                        phi_by_gid(sched.topology(), &phi)
                    })
                })
                .collect();
            ranks
                .into_iter()
                .map(|h| h.join().unwrap())
                .collect::<Vec<_>>()
        });
        (merged(per_rank), peak.into_inner())
    });

    // (g + 1) from the left plus (4 - g) from the right
    assert_eq!(phi, (0..4u64).map(|g| (g, 5.0)).collect::<Vec<_>>());
    assert!(peak <= limit, "{peak} sends in flight on one tag");
}

#[test]
fn periodic_ring_with_chunked_delayed_messages() {
    let (first, second) = within(30, || {
        let config = SweepConfig {
            eager_limit_bytes: 8,
            max_in_flight: 1,
            num_groups: 2,
            ..SweepConfig::default()
        };
        let per_rank = run_ranks(3, |comm| {
            let topo = slab_partition(6, 3, comm.rank(), true).unwrap();
            let (mut sched, mut phi) = scheduler(&comm, topo, &[group(1.0, 0.0, &[0])], &config);
            let mut solver = MaxPlusOne::default();
            sched.execute_sweep(&mut solver, &mut phi).unwrap();
            let first = phi_by_gid(sched.topology(), &phi);
            let set = &sched.angle_sets()[0];
            if comm.rank() == 0 {
                assert_eq!(set.buffer().delayed_preloc_message_received(), &[vec![true, true]]);
                assert!(set.buffer().upstream_data_initialized());
            }
            sched.execute_sweep(&mut solver, &mut phi).unwrap();
            (first, phi_by_gid(sched.topology(), &phi))
        });
        let (first, second): (Vec<_>, Vec<_>) = per_rank.into_iter().unzip();
        (merged(first), merged(second))
    });
    let values = |v: Vec<(u64, f64)>| v.into_iter().map(|(_, x)| x).collect::<Vec<_>>();
    assert_eq!(values(first), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    assert_eq!(values(second), vec![7.0, 8.0, 9.0, 10.0, 11.0, 12.0]);
}

#[test]
fn cyclic_partitioning_converges_over_iterations() {
    // (0,0) and (1,1) on partition 0, the other two on partition 1: for
    // direction (1, 1) partition 0 feeds 1 and 1 feeds 0 back.
    let owner = |i: usize, j: usize| (i + j) % 2;
    let per_rank = run_ranks(2, |comm| {
        let topo = quad_grid_partition(2, 2, 2, comm.rank(), owner).unwrap();
        let (mut sched, mut phi) =
            scheduler(&comm, topo, &[group(1.0, 1.0, &[0])], &SweepConfig::default());
        assert_eq!(sched.angle_sets()[0].plan().delayed_edges(), &[(1, 0)]);
        let mut solver = MaxPlusOne::default();
        sched.execute_sweep(&mut solver, &mut phi).unwrap();
        let first = phi_by_gid(sched.topology(), &phi);
        sched.execute_sweep(&mut solver, &mut phi).unwrap();
        (first, phi_by_gid(sched.topology(), &phi))
    });
    let (first, second): (Vec<_>, Vec<_>) = per_rank.into_iter().unzip();
    // gid 3 = cell (1, 1) misses its upstream flux on the first pass only
    assert_eq!(merged(first), vec![(0, 1.0), (1, 2.0), (2, 2.0), (3, 1.0)]);
    assert_eq!(merged(second), vec![(0, 1.0), (1, 2.0), (2, 2.0), (3, 3.0)]);
}

#[test]
fn reset_clears_flags_and_keeps_plan() {
    run_ranks(2, |comm| {
        let topo = slab_partition(8, 2, comm.rank(), false).unwrap();
        let (mut sched, mut phi) =
            scheduler(&comm, topo, &[group(1.0, 0.0, &[0])], &SweepConfig::default());
        let plan_before = sched.angle_sets()[0].plan().clone();

        sched.execute_sweep(&mut MaxPlusOne::default(), &mut phi).unwrap();
        let set = &sched.angle_sets()[0];
        assert_eq!(set.state(), AngleSetState::Done);
        assert!(set.buffer().done_sending());
        if comm.rank() == 1 {
            assert!(set.buffer().preloc_message_received()[0].iter().all(|&r| r));
            assert!(set.buffer().data_initialized());
        }

        sched.reset();
        let set = &sched.angle_sets()[0];
        assert_eq!(set.state(), AngleSetState::NotStarted);
        assert!(!set.buffer().done_sending());
        assert!(!set.buffer().data_initialized());
        assert!(
            set.buffer()
                .preloc_message_received()
                .iter()
                .flatten()
                .all(|&r| !r)
        );
        assert_eq!(set.plan(), &plan_before);

        // and the next iteration runs the same way
        sched.execute_sweep(&mut MaxPlusOne::default(), &mut phi).unwrap();
        phi_by_gid(sched.topology(), &phi)
    });
}

#[test]
fn done_sending_is_monotone_until_reset() {
    let config = SweepConfig {
        eager_limit_bytes: 8,
        max_in_flight: 1,
        ..SweepConfig::default()
    };
    let barrier = Barrier::new(2);
    run_ranks(2, |comm| {
        let topo = slab_partition(4, 2, comm.rank(), false).unwrap();
        let d = Direction::new(1.0, 0.0, 0.0);
        let plan = SweepPlan::build(&topo, d, &comm, SweepCommTags::plan_tag(7)).unwrap();
        let tags = SweepCommTags::for_angle_set(7, 0).unwrap();
        let outgoing = FluxDataStore::outgoing_cell_views(&topo, &plan);
        let (up, delayed_up) = exchange_cell_views(&comm, &tags, &plan, outgoing).unwrap();
        let mut fluds = FluxDataStore::new(&topo, &plan, 1, &up, &delayed_up).unwrap();
        let mut buffer = FluxExchangeBuffer::new(comm.clone(), tags, &plan, &fluds, &config).unwrap();

        if comm.rank() == 0 {
            fluds.allocate_outgoing_psi();
            buffer.send_downstream_psi(&fluds);
            assert_eq!(buffer.pending_sends(), 1);
            // nobody has received yet
            assert!(!buffer.clear_downstream_buffers(&mut fluds));
            assert!(!buffer.done_sending());
            barrier.wait();
            while !buffer.clear_downstream_buffers(&mut fluds) {
                std::thread::yield_now();
            }
            for _ in 0..3 {
                assert!(buffer.clear_downstream_buffers(&mut fluds));
                assert!(buffer.done_sending());
            }
            buffer.reset();
            assert!(!buffer.done_sending());
        } else {
            barrier.wait();
            while buffer.receive_upstream_psi(&mut fluds).unwrap() != ExchangeStatus::Ready {
                std::thread::yield_now();
            }
            assert_eq!(buffer.preloc_message_received(), &[vec![true]]);
        }
    });
}
