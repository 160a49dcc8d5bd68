use anyhow::{bail, Context, Result};
use std::env;
use std::path::Path;
use std::sync::Arc;

use xtrack_reconcile::{load_batch, Config, EntityKind, Reconciler, SqliteStore, Store};

fn main() -> Result<()> {
    // Loads .env first so RUST_LOG from it applies
    let config = Config::from_env()?;
    init_tracing();

    let args: Vec<String> = env::args().collect();

    match args.get(1).map(String::as_str) {
        Some("import") => {
            let (Some(kind), Some(file)) = (args.get(2), args.get(3)) else {
                print_usage();
                bail!("import needs <locations|objects> <file>");
            };
            run_import(&config, kind.parse()?, Path::new(file))?;
        }
        Some("summary") => run_summary(&config)?,
        Some("history") => {
            let Some(idcode) = args.get(2) else {
                print_usage();
                bail!("history needs <idcode>");
            };
            run_history(&config, idcode)?;
        }
        _ => print_usage(),
    }

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn print_usage() {
    println!("xtrack-reconcile {}", xtrack_reconcile::VERSION);
    println!();
    println!("USAGE:");
    println!("  xtrack-reconcile import <locations|objects> <file.json|file.csv>");
    println!("  xtrack-reconcile summary");
    println!("  xtrack-reconcile history <idcode>");
    println!();
    println!("The store is read from DATABASE_URL (a .env file is honored).");
}

fn open_store(config: &Config) -> Result<SqliteStore> {
    let path = config
        .database_path
        .as_ref()
        .context("DATABASE_URL is not set")?;
    SqliteStore::open(path)
}

fn run_import(config: &Config, kind: EntityKind, file: &Path) -> Result<()> {
    println!("📥 Import {} - {}", kind.plural(), file.display());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    // 1. Load batch
    println!("\n📂 Loading batch...");
    let raw = load_batch(file)?;
    println!("✓ Loaded {} raw {}", raw.len(), kind.plural());

    // 2. Open store
    let store = open_store(config)?;
    let reconciler = Reconciler::new(Arc::new(store)).with_policy(config.comparison_policy);

    // 3. Reconcile
    println!("\n⚖️  Reconciling (policy: {})...", config.comparison_policy.as_str());
    let outcome = reconciler.reconcile_kind(kind, &raw);

    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    if !outcome.ok {
        eprintln!("❌ {}", outcome.message);
        std::process::exit(1);
    }

    println!("✅ {}", outcome.message);
    println!("   inserted:  {}", outcome.inserted);
    println!("   updated:   {}", outcome.updated);
    println!("   unchanged: {}", outcome.unchanged);
    if kind == EntityKind::Object {
        println!("   movements: {}", outcome.movements);
    }
    if outcome.skipped > 0 {
        println!("⚠️  {} records skipped (missing or invalid identity)", outcome.skipped);
    }
    if outcome.partial > 0 {
        println!("⚠️  {} records had fields normalized to null", outcome.partial);
    }

    Ok(())
}

fn run_summary(config: &Config) -> Result<()> {
    let store = open_store(config)?;
    let since = xtrack_reconcile::temporal::start_of_local_day(chrono::Local::now());
    let summary = store.summary(since)?;

    println!("📊 Xtrack store summary");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("Locations:        {}", summary.locations_count);
    println!("Objects:          {}", summary.objects_count);
    println!("Movements:        {}", summary.movements_count);
    println!("Movements today:  {}", summary.movements_today);

    let sections = [
        ("\n📍 Objects per location", &summary.objects_in_locations),
        ("\n➡️  Entries today", &summary.movements_entries_today),
        ("\n⬅️  Exits today", &summary.movements_exits_today),
    ];
    for (title, counts) in sections {
        if counts.is_empty() {
            continue;
        }
        println!("{title}");
        for c in counts {
            println!("  {:>6}  {} ({})", c.count, c.name.as_deref().unwrap_or("-"), c.location_id);
        }
    }

    Ok(())
}

fn run_history(config: &Config, idcode: &str) -> Result<()> {
    let store = open_store(config)?;

    let Some(object) = store.object(idcode)? else {
        bail!("object {idcode} not found");
    };

    println!("🏷️  {} - {}", object.idcode, object.description.as_deref().unwrap_or(""));
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("Location: {}", fmt_location(object.location_id));
    println!("Active:   {}", if object.active { "yes" } else { "no" });

    let movements = store.movements_for_object(idcode)?;
    println!("\n🚚 {} movements", movements.len());
    for m in movements {
        println!(
            "  {}  {} → {}",
            m.created_at,
            fmt_location(m.from_location_id),
            fmt_location(m.to_location_id)
        );
    }

    Ok(())
}

fn fmt_location(id: Option<i64>) -> String {
    id.map(|id| id.to_string()).unwrap_or_else(|| "(none)".to_string())
}
