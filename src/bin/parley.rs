//! Parley CLI binary.
//!
//! End-to-end encrypted scheduling negotiation between autonomous agents.
//!
//! # Commands
//!
//! - `demo` - Run a complete two-agent negotiation in process
//! - `keys` - Generate X25519 key pairs and show the agreement handshake
//! - `config` - Print the resolved configuration

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, Utc, Weekday};
use clap::{Parser, Subcommand};
use parley::{
    decision::HttpReasoner,
    protocol::FinalPlanData,
    AgentTurn, Config, ConfirmedNegotiation, DecisionEngine, KeyPair, MemoryVault,
    NegotiationAgent, ProposalData, TimeSlot, VenueOption, VetoRule, VERSION,
};

/// Hour of day the seeded history anchors both profiles to.
const HISTORY_HOUR: u32 = 10;

#[derive(Parser)]
#[command(name = "parley")]
#[command(author = "Parley Contributors")]
#[command(version = VERSION)]
#[command(about = "Parley - encrypted scheduling negotiation between agents", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a full negotiation between two in-process agents
    Demo {
        /// Hour of day (0-23) alice proposes to meet at
        #[arg(long, default_value = "19")]
        hour: u8,

        /// Venue id alice proposes
        #[arg(long, default_value = "cafe-blue")]
        venue: String,

        /// Venue category alice proposes
        #[arg(long, default_value = "coffee")]
        category: String,

        /// Proposed duration in minutes
        #[arg(short, long, default_value = "60")]
        duration: u32,

        /// Confirmed meetings seeding bob's learned profile
        #[arg(long, default_value = "20")]
        history: u32,

        /// Negotiation round budget for both agents
        #[arg(short, long, default_value = "5")]
        max_rounds: u32,

        /// Install a veto on bob refusing anything starting after this hour
        #[arg(long)]
        latest_hour: Option<u8>,

        /// Config file path (default: platform config dir)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Enable verbose logging
        #[arg(short, long)]
        verbose: bool,
    },

    /// Generate two key pairs and derive the shared negotiation key
    Keys {
        /// Enable verbose logging
        #[arg(short, long)]
        verbose: bool,
    },

    /// Print the resolved configuration and where it came from
    Config {
        /// Config file path (default: platform config dir)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Demo {
            hour,
            venue,
            category,
            duration,
            history,
            max_rounds,
            latest_hour,
            config,
            verbose,
        } => cmd_demo(
            hour, &venue, &category, duration, history, max_rounds, latest_hour, config, verbose,
        ),

        Commands::Keys { verbose } => cmd_keys(verbose),

        Commands::Config { file } => cmd_config(file),
    }
}

#[allow(clippy::too_many_arguments)]
fn cmd_demo(
    hour: u8,
    venue: &str,
    category: &str,
    duration: u32,
    history: u32,
    max_rounds: u32,
    latest_hour: Option<u8>,
    config_path: Option<PathBuf>,
    verbose: bool,
) -> anyhow::Result<()> {
    init_logging(verbose);

    if hour > 23 {
        eprintln!("Invalid hour: {hour}. Use 0-23");
        std::process::exit(1);
    }
    if max_rounds == 0 {
        eprintln!("Invalid round budget: 0. Use at least 1");
        std::process::exit(1);
    }

    let config = load_config(config_path)?;
    let engine = build_engine(&config)?;

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        let start = next_saturday_at(Utc::now(), u32::from(hour));

        // Two agents, each with its own key vault. In production these run
        // on different devices and only exchange envelopes through a relay.
        let alice = NegotiationAgent::new("alice", Arc::new(MemoryVault::new()));
        let bob = NegotiationAgent::new("bob", Arc::new(MemoryVault::new())).with_engine(engine);

        alice
            .learn_from_history(&weekly_history("bob", venue, category, 20, start))
            .await?;
        bob.learn_from_history(&weekly_history("alice", venue, category, history, start))
            .await?;

        let mut autonomy = alice.preferences().await.autonomy;
        autonomy.max_negotiation_rounds = max_rounds;
        alice.set_autonomy(autonomy.clone()).await?;
        bob.set_autonomy(autonomy).await?;

        if let Some(latest) = latest_hour {
            bob.set_veto_rules(vec![VetoRule::never_after_hour(latest)?])
                .await?;
        }

        // Public keys travel out of band; each side derives the same
        // negotiation key without it ever crossing the wire.
        let alice_public = alice.public_key().await?;
        let bob_public = bob.public_key().await?;
        alice.establish_peer("bob", &bob_public).await?;
        bob.establish_peer("alice", &alice_public).await?;

        println!("Profiles:");
        println!(
            "  alice: {} confirmed meetings, confidence {:.2}",
            alice.preferences().await.learned.negotiation_count,
            parley::preferences::confidence(&alice.preferences().await.learned),
        );
        println!(
            "  bob:   {} confirmed meetings, confidence {:.2}",
            bob.preferences().await.learned.negotiation_count,
            parley::preferences::confidence(&bob.preferences().await.learned),
        );
        println!();
        println!(
            "alice proposes {} ({}) on {} at {:02}:00 for {} minutes",
            venue,
            category,
            start.format("%Y-%m-%d"),
            hour,
            duration
        );
        println!();
        println!("Envelopes as the relay sees them:");

        let proposal = ProposalData::new(
            vec![TimeSlot::of_minutes(start, duration)],
            vec![VenueOption::new(venue, category)],
        );
        let mut message = alice.propose("bob", proposal).await?;
        let negotiation_id = message.negotiation_id().to_string();
        print_leg(&message);

        let mut current: &NegotiationAgent = &bob;
        let mut other: &NegotiationAgent = &alice;
        let mut outcome: Option<FinalPlanData> = None;

        // Worst case both sides counter until the round budget trips, so
        // the leg count is bounded; the guard catches protocol bugs only.
        let mut legs = 1u32;
        loop {
            if legs > 2 * max_rounds + 4 {
                anyhow::bail!("negotiation did not settle within the round budget");
            }

            match current.handle_message(&message).await? {
                AgentTurn::Reply(reply) => {
                    print_leg(&reply);
                    message = reply;
                    std::mem::swap(&mut current, &mut other);
                    legs += 1;
                },

                AgentTurn::Conclude { plan, reply } => {
                    if let Some(reply) = reply {
                        print_leg(&reply);
                        other.handle_message(&reply).await?;
                    }
                    println!();
                    match plan {
                        Some(plan) => {
                            println!("Agreed plan:");
                            println!("  venue:    {} ({})", plan.venue.id, plan.venue.category);
                            println!(
                                "  start:    {}",
                                plan.time_slot.start.format("%Y-%m-%d %H:%M UTC")
                            );
                            println!(
                                "  duration: {} minutes",
                                plan.time_slot.duration_minutes()
                            );
                            outcome = Some(plan);
                        },
                        None => println!("Negotiation ended without a plan."),
                    }
                    break;
                },

                AgentTurn::Escalate { reason, notice } => {
                    if let Some(notice) = notice {
                        print_leg(&notice);
                        other.handle_message(&notice).await?;
                    }
                    println!();
                    println!("{} escalated to their human: {reason}", current.user_id());
                    break;
                },
            }
        }

        println!();
        println!("Final state:");
        for agent in [&alice, &bob] {
            if let Some(negotiation) = agent.negotiation(&negotiation_id).await {
                println!(
                    "  {:<5} {:?} after round {}",
                    agent.user_id(),
                    negotiation.state(),
                    negotiation.round()
                );
            }
        }

        // A confirmed meeting feeds back into the learned profile.
        if let Some(plan) = outcome {
            let before = bob.preferences().await.learned.negotiation_count;
            bob.learn_from_history(&[ConfirmedNegotiation {
                peer_id: "alice".to_string(),
                venue_id: plan.venue.id.clone(),
                venue_category: plan.venue.category.clone(),
                started_at: plan.time_slot.start,
                duration_minutes: plan.time_slot.duration_minutes(),
                confirmed: true,
            }])
            .await?;
            let after = bob.preferences().await.learned.negotiation_count;
            println!();
            println!("bob's profile grew: {before} -> {after} confirmed meetings");
        }

        Ok::<_, anyhow::Error>(())
    })
}

fn cmd_keys(verbose: bool) -> anyhow::Result<()> {
    init_logging(verbose);

    let alice = KeyPair::generate();
    let bob = KeyPair::generate();

    println!("X25519 key agreement:");
    println!("  alice public: {}", alice.public_key().to_base64());
    println!("  bob public:   {}", bob.public_key().to_base64());

    let ours = alice.diffie_hellman(bob.public_key());
    let theirs = bob.diffie_hellman(alice.public_key());

    println!(
        "  derived keys match: {} ({} bytes, HKDF-SHA256)",
        ours.as_bytes() == theirs.as_bytes(),
        ours.len()
    );
    Ok(())
}

fn cmd_config(file: Option<PathBuf>) -> anyhow::Result<()> {
    let source = match &file {
        Some(path) => path.display().to_string(),
        None => match Config::default_path() {
            Some(path) if path.exists() => path.display().to_string(),
            _ => "builtin defaults".to_string(),
        },
    };
    let config = load_config(file)?;

    println!("Configuration ({source}, merged with PARLEY_* environment):");
    println!();
    println!("[reasoner]");
    println!("  enabled:          {}", config.reasoner.enabled);
    println!("  endpoint:         {}", config.reasoner.endpoint);
    println!(
        "  api_key:          {}",
        if config.reasoner.api_key.is_some() {
            "set (redacted)"
        } else {
            "unset"
        }
    );
    println!("  timeout_secs:     {}", config.reasoner.timeout_secs);
    println!("  daily_call_limit: {}", config.reasoner.daily_call_limit);
    println!("  cache_ttl_secs:   {}", config.reasoner.cache_ttl_secs);
    println!();
    println!("[engine]");
    println!("  counter_slot_count: {}", config.engine.counter_slot_count);
    println!();
    println!("[agent]");
    println!("  custody_namespace: {}", config.agent.custody_namespace);

    Ok(())
}

// Helper functions

fn init_logging(verbose: bool) {
    let log_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<Config> {
    let base = match path {
        Some(path) => Config::from_file(path)?,
        None => match Config::default_path() {
            Some(path) if path.exists() => Config::from_file(path)?,
            _ => Config::default(),
        },
    };
    Ok(base.merge(Config::from_env()))
}

fn build_engine(config: &Config) -> anyhow::Result<DecisionEngine> {
    let mut engine = DecisionEngine::new().with_counter_slots(config.engine.counter_slot_count);

    if let Some(reasoner) = HttpReasoner::from_config(&config.reasoner)? {
        tracing::info!(endpoint = %config.reasoner.endpoint, "external reasoner enabled");
        engine = engine
            .with_reasoner(Arc::new(reasoner))
            .with_reasoner_limits(
                Duration::from_secs(config.reasoner.cache_ttl_secs),
                config.reasoner.daily_call_limit,
            )
            .with_reasoner_timeout(Duration::from_secs(config.reasoner.timeout_secs));
    }

    Ok(engine)
}

/// Weekly confirmed meetings at [`HISTORY_HOUR`], working back from `anchor`.
fn weekly_history(
    peer_id: &str,
    venue: &str,
    category: &str,
    count: u32,
    anchor: DateTime<Utc>,
) -> Vec<ConfirmedNegotiation> {
    let anchor = anchor
        .date_naive()
        .and_hms_opt(HISTORY_HOUR, 0, 0)
        .map_or(anchor, |naive| naive.and_utc());

    (1..=count)
        .map(|weeks_back| ConfirmedNegotiation {
            peer_id: peer_id.to_string(),
            venue_id: venue.to_string(),
            venue_category: category.to_string(),
            started_at: anchor - chrono::Duration::weeks(i64::from(weeks_back)),
            duration_minutes: 60,
            confirmed: true,
        })
        .collect()
}

/// The next Saturday strictly after `now`, at `hour:00` UTC.
fn next_saturday_at(now: DateTime<Utc>, hour: u32) -> DateTime<Utc> {
    let today = now.date_naive();
    let offset = (Weekday::Sat.num_days_from_monday() + 7 - today.weekday().num_days_from_monday())
        % 7;
    let days_ahead = if offset == 0 { 7 } else { offset };
    let date = today + chrono::Duration::days(i64::from(days_ahead));
    date.and_hms_opt(hour, 0, 0).map_or(now, |naive| naive.and_utc())
}

fn print_leg(message: &parley::AgentMessage) {
    let cipher = message.encrypted_payload();
    let preview: String = cipher.chars().take(24).collect();
    println!(
        "  {:<5} -> {:<5}  {:<16} round {}  {}... ({} base64 chars)",
        message.from_user_id(),
        message.to_user_id(),
        message.message_type().as_str(),
        message.round(),
        preview,
        cipher.len()
    );
}
