use admin_schema_rust::config::AppConfig;
use admin_schema_rust::store::SourceRegistry;
use admin_schema_rust::SchemaSkeleton;
use anyhow::Context;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if it exists
    dotenvy::dotenv().ok();

    // Load configuration
    let config = AppConfig::load()?;

    // RUST_LOG wins over the configured level
    use env_logger::{Builder, Env};
    Builder::from_env(Env::default().default_filter_or(config.logging.level.as_str())).init();

    println!("Admin schema inspector");

    let path = std::env::args().nth(1).unwrap_or_else(|| config.schema.path.clone());
    println!("Loading API description from {}", path);
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read API description {}", path))?;

    let skeleton = SchemaSkeleton::from_json_str(&raw)?.with_fetch_options(config.fetch_options());
    println!(
        "Built {} models, {} deferred binds",
        skeleton.models().len(),
        skeleton.resolver().init_queue().pending()
    );
    let app = skeleton.bind(Arc::new(SourceRegistry::new()), None)?;

    for name in app.models().names() {
        let Some(model) = app.model(name) else {
            continue;
        };
        println!("{}", name);
        for field in model.fields().iter() {
            println!(
                "  {:<24} {:<18} type={} format={}",
                field.name(),
                field.class_name(),
                field.data_type().map(|t| t.as_str()).unwrap_or("-"),
                field.format().unwrap_or("-")
            );
        }
    }

    Ok(())
}
