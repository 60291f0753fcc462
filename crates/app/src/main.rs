use std::sync::Arc;

use anyhow::bail;
use boxoffice_config::Config;
use boxoffice_db as db;
use boxoffice_gateway::{BankTransferGateway, CardGateway};
use boxoffice_models::{EventType, Hall, HallType, PricingTable};
use chrono::Local;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::OffsetTime;

mod email;
mod flow;
mod server;

use server::AppState;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const GIT_HASH: &str = env!("BOXOFFICE_GIT_HASH");

pub fn version_string() -> String {
    format!("{VERSION} ({GIT_HASH})")
}

// --- CLI definition ---

#[derive(Debug, Clone, ValueEnum)]
enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "trace"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

#[derive(Parser)]
#[command(name = "boxoffice")]
#[command(about = "Cinema and event ticketing backend")]
#[command(version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("BOXOFFICE_GIT_HASH"), ")"))]
struct Cli {
    /// Log level (default: from config)
    #[arg(short, long, global = true)]
    log_level: Option<LogLevel>,

    /// Display log timestamps in UTC (default: local time)
    #[arg(long, global = true)]
    utc: bool,

    /// Database URL (default: from config)
    #[arg(long, global = true)]
    db_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Port to listen on (default: from config)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Register a hall
    AddHall {
        /// Hall name (e.g. "Hall A")
        #[arg(long)]
        name: String,
        /// Physical capacity
        #[arg(long)]
        capacity: i64,
        /// Hall type: vip or standard
        #[arg(long)]
        hall_type: String,
    },
    /// List all halls
    ListHalls,
    /// Create an event in a hall
    AddEvent {
        #[arg(long)]
        title: String,
        /// Event type: movie or match
        #[arg(long)]
        event_type: String,
        #[arg(long)]
        category: String,
        /// Date (e.g. "2026-09-01")
        #[arg(long)]
        date: String,
        /// Time (e.g. "20:00")
        #[arg(long)]
        time: String,
        /// Hall id
        #[arg(long)]
        hall: String,
        #[arg(long)]
        total_seats: i64,
        /// Pricing table as JSON, e.g. '{"standardSingle":{"price":2500,"count":48}}'
        #[arg(long)]
        pricing: String,
    },
    /// List all events
    ListEvents,
    /// List bookings, optionally for one event
    ListBookings {
        #[arg(long)]
        event: Option<String>,
    },
    /// Cancel stale pending bookings and release their seat holds
    ReleaseHolds {
        /// Holds older than this many minutes are released
        #[arg(long, default_value = "30")]
        max_age_mins: i64,
    },
    /// Re-verify a payment reference against its gateway and settle it
    Verify {
        reference: String,
    },
}

// --- Logging ---

fn init_logging(level: &str, utc: bool) {
    let filter = EnvFilter::new(level);

    if utc {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_timer(OffsetTime::new(
                time::UtcOffset::UTC,
                time::macros::format_description!(
                    "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]Z"
                ),
            ))
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_timer(LocalTimer)
            .init();
    }
}

struct LocalTimer;

impl tracing_subscriber::fmt::time::FormatTime for LocalTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        let now = Local::now();
        write!(w, "{}", now.format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

// --- Helpers ---

fn parse_hall_type(s: &str) -> anyhow::Result<HallType> {
    match s {
        "vip" => Ok(HallType::Vip),
        "standard" => Ok(HallType::Standard),
        other => bail!("unknown hall type {other:?} (expected vip or standard)"),
    }
}

fn parse_event_type(s: &str) -> anyhow::Result<EventType> {
    match s {
        "movie" => Ok(EventType::Movie),
        "match" => Ok(EventType::Match),
        other => bail!("unknown event type {other:?} (expected movie or match)"),
    }
}

fn build_state(pool: sqlx::SqlitePool, config: &Config) -> AppState {
    // Customers land back on the frontend's completion page after paying
    // on the gateway's hosted checkout.
    let return_url = format!("{}/payment/complete", config.base_url.trim_end_matches('/'));
    AppState {
        pool,
        card: Arc::new(CardGateway::new(
            &config.card_secret_key,
            &config.card_base_url,
            &return_url,
        )),
        bank: Arc::new(BankTransferGateway::new(
            &config.bank_api_key,
            &config.bank_secret,
            &config.bank_contract_code,
            &config.bank_base_url,
            &return_url,
        )),
        mailer: Arc::new(email::Mailer::new(&config.email_api_key, &config.email_from)),
        card_public_key: config.card_public_key.clone(),
    }
}

// --- Main ---

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load();
    let cli = Cli::parse();

    let level = cli
        .log_level
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_else(|| config.log_level.clone());
    init_logging(&level, cli.utc || config.utc);

    let db_url = cli.db_url.as_deref().unwrap_or(&config.db_url);
    let pool = db::connect(db_url).await?;
    db::migrate(&pool).await?;

    match cli.command {
        Commands::Serve { port } => {
            let port = port.unwrap_or(config.port);
            let state = build_state(pool, &config);
            server::run_server(port, state).await?;
        }
        Commands::AddHall { name, capacity, hall_type } => {
            if capacity <= 0 {
                bail!("capacity must be positive");
            }
            let hall = Hall {
                id: boxoffice_models::new_id(),
                name,
                capacity,
                hall_type: parse_hall_type(&hall_type)?,
            };
            db::insert_hall(&pool, &hall).await?;
            println!("Added hall: {} ({:?}, capacity {}) id={}", hall.name, hall.hall_type, hall.capacity, hall.id);
        }
        Commands::ListHalls => {
            let halls = db::list_halls(&pool).await?;
            if halls.is_empty() {
                println!("No halls registered. Use `boxoffice add-hall` to add one.");
            } else {
                println!("{:<38} {:<20} {:<10} {}", "ID", "Name", "Type", "Capacity");
                println!("{}", "-".repeat(80));
                for h in &halls {
                    println!("{:<38} {:<20} {:<10} {}", h.id, h.name, format!("{:?}", h.hall_type).to_lowercase(), h.capacity);
                }
                println!("\n{} hall(s) total", halls.len());
            }
        }
        Commands::AddEvent { title, event_type, category, date, time, hall, total_seats, pricing } => {
            let event_type = parse_event_type(&event_type)?;
            let pricing: PricingTable = serde_json::from_str(&pricing)?;
            let Some(hall) = db::get_hall(&pool, &hall).await? else {
                bail!("hall {hall} not found");
            };
            flow::validate_event_setup(&hall, event_type, total_seats, &pricing)?;
            let event = boxoffice_models::Event {
                id: boxoffice_models::new_id(),
                title,
                event_type,
                category,
                event_date: date,
                event_time: time,
                hall_id: hall.id,
                total_seats,
                pricing: sqlx::types::Json(pricing),
                status: boxoffice_models::EventStatus::Active,
                created_at: chrono::Utc::now(),
            };
            db::insert_event(&pool, &event).await?;
            println!("Added event: {} on {} {} (id={})", event.title, event.event_date, event.event_time, event.id);
        }
        Commands::ListEvents => {
            let events = db::list_events(&pool).await?;
            if events.is_empty() {
                println!("No events found.");
            } else {
                println!("{:<38} {:<25} {:<8} {:<12} {:<7} {:<10} {}", "ID", "Title", "Type", "Date", "Time", "Status", "Booked/Total");
                println!("{}", "-".repeat(115));
                for e in &events {
                    let booked = db::unavailable_seat_ids(&pool, &e.id).await?.len();
                    println!(
                        "{:<38} {:<25} {:<8} {:<12} {:<7} {:<10} {}/{}",
                        e.id,
                        e.title,
                        format!("{:?}", e.event_type).to_lowercase(),
                        e.event_date,
                        e.event_time,
                        format!("{:?}", e.status).to_lowercase(),
                        booked,
                        e.total_seats,
                    );
                }
                println!("\n{} event(s) total", events.len());
            }
        }
        Commands::ListBookings { event } => {
            let bookings = db::list_bookings(&pool, event.as_deref()).await?;
            if bookings.is_empty() {
                println!("No bookings found.");
            } else {
                println!("{:<38} {:<20} {:<10} {:<10} {}", "Reference", "Customer", "Status", "Total", "Seats");
                println!("{}", "-".repeat(100));
                for b in &bookings {
                    println!(
                        "{:<38} {:<20} {:<10} {:<10} {}",
                        b.payment_reference,
                        b.customer_name,
                        format!("{:?}", b.status).to_lowercase(),
                        b.total_amount,
                        b.seats.0.join(", "),
                    );
                }
                println!("\n{} booking(s) total", bookings.len());
            }
        }
        Commands::ReleaseHolds { max_age_mins } => {
            let released = db::release_expired_holds(&pool, chrono::Duration::minutes(max_age_mins)).await?;
            println!("{released} stale pending booking(s) cancelled, holds released");
        }
        Commands::Verify { reference } => {
            let Some(booking) = db::get_booking_by_reference(&pool, &reference).await? else {
                bail!("no booking found for reference {reference}");
            };
            let state = build_state(pool.clone(), &config);
            let gateway = match booking.payment_method {
                boxoffice_models::PaymentMethod::Card => state.card.as_ref(),
                boxoffice_models::PaymentMethod::BankTransfer => state.bank.as_ref(),
            };
            let result = flow::settle(&pool, gateway, &reference).await?;
            match result.settlement {
                flow::Settlement::Confirmed(v) => {
                    info!("Booking {} confirmed", result.booking.id);
                    println!("Payment {reference} is PAID ({} paid); booking confirmed", v.amount_paid);
                }
                flow::Settlement::AlreadyConfirmed => {
                    println!("Booking for {reference} was already confirmed; nothing to do");
                }
                flow::Settlement::Failed(v) => {
                    println!("Payment {reference} is {:?}; booking marked failed, seats released", v.status);
                }
            }
        }
    }

    Ok(())
}
