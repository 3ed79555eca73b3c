use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tally_sdk::{
    ActorId, MemoryRelay, MultiActorTracker, Policy, ResponseStateManager, SummaryConfigBuilder,
};
use tracing::{debug, info};

const CHOICES: [&str; 5] = ["1", "2", "3", "4", "5"];
const STATES: [(&str, Policy); 3] = [
    ("selection", Policy::LastWriterWinsNullable),
    ("favorites", Policy::Set),
    ("first-answer", Policy::FirstWriterWins),
];

/// Statistics collected during a poll simulation
#[derive(Clone, Debug)]
pub struct SimulationStats {
    pub participants: usize,
    pub rounds: usize,
    pub operations: usize,
    pub batches: usize,
    pub snapshots_delivered: usize,
    pub total_time: Duration,
    pub converged: bool,
}

impl SimulationStats {
    pub fn print(&self) {
        println!("\n╔════════════════════════════════════════════════════════════╗");
        println!("║              Poll Simulation Statistics                    ║");
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║  Participants:              {:>30} ║", self.participants);
        println!("║  Rounds:                    {:>30} ║", self.rounds);
        println!("║  Operations Generated:      {:>30} ║", self.operations);
        println!("║  Batches Sent:              {:>30} ║", self.batches);
        println!("║  Snapshots Delivered:       {:>30} ║", self.snapshots_delivered);
        println!("║  Total Time:                {:>29}s ║", format!("{:.3}", self.total_time.as_secs_f64()));
        println!("║  Converged:                 {:>30} ║", self.converged);
        println!("╚════════════════════════════════════════════════════════════╝");
    }
}

fn participant(relay: &Arc<MemoryRelay>, actor: &ActorId) -> ResponseStateManager<MemoryRelay> {
    let config = SummaryConfigBuilder::new().flush_delay(10).build();
    let summary = ResponseStateManager::new(Arc::new(actor.clone()), Arc::clone(relay), config);
    for (name, policy) in STATES {
        summary
            .register_state(name, policy)
            .expect("poll states register once with fixed policies");
    }
    summary
}

/// Run a poll where every participant makes random gestures each round.
///
/// Snapshots are delivered at least once and in arbitrary order relative to
/// pending writes; some participants see duplicates, some see stale ones.
pub async fn simulate_poll(participants: usize, rounds: usize) -> SimulationStats {
    let start = Instant::now();
    let mut rng = StdRng::from_entropy();
    let relay = Arc::new(MemoryRelay::new());
    let actors: Vec<ActorId> = (0..participants)
        .map(|i| ActorId::new(format!("participant-{}", i)))
        .collect();
    let summaries: Vec<_> = actors.iter().map(|actor| participant(&relay, actor)).collect();

    let mut operations = 0;
    let mut snapshots_delivered = 0;
    let mut history: Vec<String> = Vec::new();

    for round in 0..rounds {
        for summary in &summaries {
            let choice = CHOICES[rng.gen_range(0..CHOICES.len())];
            let generated = match rng.gen_range(0..4) {
                0 => summary.add_state("selection", choice),
                1 => summary.remove_state("selection", choice),
                2 => summary.add_state("favorites", choice),
                _ => summary.add_state("first-answer", choice),
            };
            operations += generated.map(|ops| ops.len()).unwrap_or(0);
        }

        tokio::time::sleep(Duration::from_millis(20)).await;
        history.push(relay.snapshot_json());

        for summary in &summaries {
            // Sometimes a stale snapshot, sometimes a duplicate.
            if let Some(stale) = history.choose(&mut rng) {
                summary.parse_snapshot(stale);
                snapshots_delivered += 1;
            }
            if rng.gen_bool(0.3) {
                if let Some(latest) = history.last() {
                    summary.parse_snapshot(latest);
                    snapshots_delivered += 1;
                }
            }
        }
        debug!(round, operations, "round complete");
    }

    for summary in &summaries {
        summary.flush_now().await;
    }
    let last = relay.snapshot_json();
    for summary in &summaries {
        summary.parse_snapshot(&last);
        snapshots_delivered += 1;
    }

    // Every participant must agree with the relay's canonical view.
    let canonical = relay.snapshot();
    let mut converged = true;
    for (name, policy) in STATES {
        let mut reference = MultiActorTracker::new(name, policy);
        reference.synchronize(&canonical);
        for actor in &actors {
            let expected = reference.get_value(actor);
            for summary in &summaries {
                if summary.get_state(name, actor).ok().as_ref() != Some(&expected) {
                    converged = false;
                }
            }
        }
    }
    info!(participants, rounds, converged, "poll simulation finished");

    SimulationStats {
        participants,
        rounds,
        operations,
        batches: relay.batch_count(),
        snapshots_delivered,
        total_time: start.elapsed(),
        converged,
    }
}
