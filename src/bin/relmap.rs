//! relmap: compile a schema document and print its migration plan and route table.
//!
//! Usage: `relmap [SCHEMA_PATH] [--apply]`
//! With `--apply`, migrations are run against `DATABASE_URL`.

use relmap_sdk::{
    apply_migrations, ensure_database_exists, load_from_path, plan, resolve, MappingOptions, PgStore, RouteTable,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("relmap_sdk=info,relmap=info")),
        )
        .init();

    let mut apply = false;
    let mut path = None;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--apply" => apply = true,
            _ => path = Some(arg),
        }
    }
    let path = path
        .or_else(|| std::env::var("SCHEMA_PATH").ok())
        .unwrap_or_else(|| "schema.json".into());

    let schema = load_from_path(&path).await?;
    let options = MappingOptions::from_env()?;
    let mapping = resolve(&schema, &options)?;
    for w in mapping.warnings() {
        eprintln!("warning: {}", w);
    }
    let plan = plan(&schema, &mapping)?;

    for v in 1..=plan.target_version {
        println!("-- version {}", v);
        for step in plan.for_version(v) {
            println!("{};", step.sql());
        }
    }
    let routes = RouteTable::build(&schema)?;
    println!("{}", serde_json::to_string_pretty(&routes)?);

    if apply {
        let database_url = std::env::var("DATABASE_URL").map_err(|_| "--apply needs DATABASE_URL")?;
        ensure_database_exists(&database_url).await?;
        let store = PgStore::connect(&database_url).await?;
        let version = apply_migrations(&store, &plan).await?;
        tracing::info!(version, "database is up to date");
    }
    Ok(())
}
