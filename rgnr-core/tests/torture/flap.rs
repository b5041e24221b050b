// vim: tw=80
//! Randomly fail and restore positions while the raid group rebuilds, and
//! check its bookkeeping after every tick.

use rand::{
    Rng,
    RngCore,
    SeedableRng,
    thread_rng
};
use rand_xorshift::XorShiftRng;
use rstest::rstest;

use rgnr_core::{
    Position,
    checkpoint::MAX_REBUILD_POSITIONS,
    condition::LifecycleState,
    geometry::RaidType,
};

use crate::util::*;

const WIDTH: u32 = 6;

struct Checker {
    /// Last checkpoint seen per position, if any is tracked
    last: Vec<Option<u64>>,
}

impl Checker {
    fn new() -> Self {
        Checker { last: vec![None; WIDTH as usize] }
    }

    /// A position that fails again may restart from zero
    fn restarted(&mut self, p: Position) {
        self.last[p as usize] = None;
    }

    fn check(&mut self, h: &Harness) {
        h.assert_rl_invariant();
        assert_eq!(h.rg.lifecycle(), LifecycleState::Ready);
        for p in 0..WIDTH {
            let cp = h.rg.checkpoint(p);
            if let (Some(last), Some(cp)) = (self.last[p as usize], cp) {
                assert!(cp >= last,
                    "position {p}: checkpoint went from {last} to {cp}");
            }
            self.last[p as usize] = cp;
        }
    }
}

async fn do_test(seed: Option<[u8; 16]>) {
    let ops = (2000.0 * crate::test_scale()) as usize;
    let seed = seed.unwrap_or_else(|| {
        let mut seed = [0u8; 16];
        let mut seeder = thread_rng();
        seeder.fill_bytes(&mut seed);
        seed
    });
    println!("Using seed {:?}", &seed);
    // Use XorShiftRng because it's deterministic and seedable
    let mut rng = XorShiftRng::from_seed(seed);

    let mut h = HarnessBuilder::default()
        .raid_type(RaidType::Raid6, WIDTH)
        .build().await;
    let mut checker = Checker::new();
    let mut down = mask(0);

    for _ in 0..ops {
        match rng.gen_range(0..10) {
            0 => {
                let p = rng.gen_range(0..WIDTH);
                // Never lose more positions than the group can track
                let busy = down | h.rg.rebuild_logging();
                let mut after = busy;
                after.insert(p);
                if !down.contains(p) &&
                    after.count() as usize <= MAX_REBUILD_POSITIONS
                {
                    tracing::debug!(p, "fail");
                    h.rg.on_edge_state_change(p, crate::util::down())
                        .unwrap();
                    down.insert(p);
                    checker.restarted(p);
                }
            }
            1 | 2 => {
                if let Some(p) = down.iter().next() {
                    tracing::debug!(p, "restore");
                    h.rg.on_edge_state_change(p, up()).unwrap();
                    down.remove(p);
                }
            }
            3 => {
                h.io.defer_next(rng.gen_range(1..4));
            }
            _ => {
                h.tick().await;
            }
        }
        checker.check(&h);
    }

    for p in down.iter() {
        h.rg.on_edge_state_change(p, up()).unwrap();
    }
    h.settle().await;
    checker.check(&h);
    assert!(h.rg.rebuild_logging().is_empty());
    assert!(h.rg.nonpaged().checkpoints.positions().is_empty());
    for p in 0..WIDTH {
        assert!(!h.rg.needs_rebuild().is_marked(p).await.unwrap(),
                "position {p} still marked");
    }
}

#[rstest]
#[case(None)]
#[test_log::test(tokio::test)]
async fn flap(#[case] seed: Option<[u8; 16]>) {
    do_test(seed).await
}
