use simulation::simulate_poll;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
pub mod simulation;

fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async_main());
}

async fn async_main() {
    println!("\n\n╔════════════════════════════════════════════════════════════╗");
    println!("║            RESPONSE SUMMARY SIMULATIONS                    ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    // Small poll
    let stats = simulate_poll(3, 10).await;
    stats.print();

    // Busy poll
    let stats = simulate_poll(12, 40).await;
    stats.print();

    if stats.converged {
        println!("\n✓ All participants converged!");
    } else {
        println!("\n✗ Participants diverged");
    }
}
