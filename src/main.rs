use pledge_trust::{
    api,
    clients::{HttpClassifier, HttpLedger},
    clock::SystemClock,
    collaborators::{
        DisabledClassifier, DisabledLedger, GoalRegistry, Ledger, StaticGoalRegistry, TracingSink,
        VisualClassifier,
    },
    config::{Config, FraudTuning, StakeTuning},
    engine::{EngineDeps, TrustEngine},
    logging,
    sled_store::SledStore,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_tracing(logging::DEFAULT_FILTER)?;

    // ----------------------------------------------------------------
    // 0. Configuration
    // ----------------------------------------------------------------
    let config = Config::from_env()?;
    info!(host = %config.host, port = config.port, db = %config.db_path, "configuration loaded");

    // ----------------------------------------------------------------
    // 1. Storage and collaborators
    // ----------------------------------------------------------------
    let store = Arc::new(SledStore::open(&config.db_path)?);
    info!(path = %config.db_path, "trust store opened");

    let classifier: Arc<dyn VisualClassifier> = match &config.classifier_url {
        Some(url) => Arc::new(HttpClassifier::new(url.as_str(), config.classifier_timeout)?),
        None => {
            warn!("CLASSIFIER_URL not set; every submission will be judged unclear");
            Arc::new(DisabledClassifier)
        }
    };

    let ledger: Arc<dyn Ledger> = match &config.ledger_url {
        Some(url) => Arc::new(HttpLedger::new(url.as_str(), config.ledger_timeout)?),
        None => {
            info!("LEDGER_URL not set; outcomes stay off-chain");
            Arc::new(DisabledLedger)
        }
    };

    let registry: Arc<dyn GoalRegistry> = match &config.goals_path {
        Some(path) => {
            let registry = StaticGoalRegistry::from_json_file(path)?;
            info!(path = %path.display(), "goal registry loaded");
            Arc::new(registry)
        }
        None => Arc::new(StaticGoalRegistry::default()),
    };

    // ----------------------------------------------------------------
    // 2. Engine and shared state
    // ----------------------------------------------------------------
    let engine = TrustEngine::new(
        EngineDeps {
            signals: store.clone(),
            profiles: store,
            classifier,
            ledger,
            sink: Arc::new(TracingSink),
            registry,
            clock: Arc::new(SystemClock),
        },
        FraudTuning::default(),
        StakeTuning::default(),
        config.timeouts(),
    );
    let shared_state = Arc::new(api::AppState {
        engine: Arc::new(engine),
    });

    // ----------------------------------------------------------------
    // 3. HTTP service
    // ----------------------------------------------------------------
    let app = api::app(shared_state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, "trust engine listening");

    axum::serve(listener, app).await?;

    Ok(())
}
