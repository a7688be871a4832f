use std::sync::Arc;

use secrecy::ExposeSecret;

use bumby::api::{self, ApiKeyAuthorizer, AppState};
use bumby::autoreply::dispatcher::spawn_dedup_sweep_loop;
use bumby::autoreply::{AutoReplyDispatcher, RuleEvaluator};
use bumby::config::AppConfig;
use bumby::store::{Database, LibSqlBackend};
use bumby::whatsapp::{LogOnlySender, MessageSender, WhatsAppClient};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = AppConfig::from_env()?;

    eprintln!("📨 Bumby v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   API: http://0.0.0.0:{}/api", config.port);
    eprintln!(
        "   Webhook: http://0.0.0.0:{}/webhook/whatsapp/{{unique_id}}",
        config.port
    );
    eprintln!(
        "   Matching: {:?}, short delays: {:?}",
        config.evaluator.case_sensitivity, config.evaluator.delay_policy
    );

    // ── Database ─────────────────────────────────────────────────────────
    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .unwrap_or_else(|e| {
                eprintln!(
                    "Error: Failed to open database at {}: {}",
                    config.db_path.display(),
                    e
                );
                std::process::exit(1);
            }),
    );
    eprintln!("   Database: {}", config.db_path.display());

    if let (Some(email), Some(key)) = (&config.bootstrap_email, &config.bootstrap_api_key) {
        if db.get_account_by_email(email).await?.is_none() {
            let account = db.create_account(email, key.expose_secret()).await?;
            tracing::info!(account_id = %account.id, unique_id = %account.unique_id, "Bootstrap account created");
        }
        eprintln!("   Bootstrap account: {}", email);
    }

    // ── Outbound ─────────────────────────────────────────────────────────
    let sender: Arc<dyn MessageSender> = match config.whatsapp.clone() {
        Some(wa) => {
            eprintln!("   WhatsApp: phone number {} ({})", wa.phone_number_id, wa.api_version);
            Arc::new(WhatsAppClient::new(wa))
        }
        None => {
            eprintln!("   WhatsApp: disabled (replies are logged only)");
            Arc::new(LogOnlySender)
        }
    };

    spawn_dedup_sweep_loop(Arc::clone(&db));

    let dispatcher = Arc::new(AutoReplyDispatcher::new(
        Arc::clone(&db),
        sender,
        RuleEvaluator::new(config.evaluator),
    ));

    let state = AppState {
        store: Arc::clone(&db),
        dispatcher,
        authorizer: Arc::new(ApiKeyAuthorizer::new(
            Arc::clone(&db),
            &config.admin_emails,
        )),
        verify_token: config.verify_token.clone(),
    };

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    tracing::info!(port = config.port, "HTTP server started");
    axum::serve(listener, api::router(state)).await?;

    Ok(())
}
