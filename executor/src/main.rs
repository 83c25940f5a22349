//! ZK Perps Executor Server
//!
//! # Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Client (Trader UI)                       │
//! │        intent → sign → seal(X25519+AES-GCM) → POST           │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Axum Web Server                         │
//! │  ┌─────────────────────────────────────────────────────────┐│
//! │  │                      Routes Layer                        ││
//! │  │  /submit  /verify  /relay/pubkey  /root  /liquidate     ││
//! │  └─────────────────────────────────────────────────────────┘│
//! │  ┌─────────────────────────────────────────────────────────┐│
//! │  │                    Services Layer                        ││
//! │  │  PositionBook   FundingOracle   ZkProver   Liquidator   ││
//! │  └─────────────────────────────────────────────────────────┘│
//! │  ┌─────────────────────────────────────────────────────────┐│
//! │  │                      Data Layer                          ││
//! │  │  In-memory Poseidon tree    PostgreSQL (rebuild source) ││
//! │  └─────────────────────────────────────────────────────────┘│
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Smart Contracts (Ethereum)                  │
//! │        PerpEngine.liquidate(proof, oldRoot, newRoot)         │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use zk_perps_executor::{
    db::FundingStateRow,
    routes,
    services::{spawn_scanner, ChainClient, EthersChain},
    AppState, Config, Database, FundingOracle, Liquidator, PositionBook, PositionStore,
    RateLimiter, RelayKeypair, ZkProver,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 환경변수 로드
    dotenvy::dotenv().ok();

    // 로깅 초기화
    // RUST_LOG=debug,sqlx=warn 형태로 레벨 제어 가능
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "zk_perps_executor=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("🚀 Starting ZK Perps Executor");

    // 설정 로드
    let config = Config::from_env()?;
    tracing::info!("📋 Configuration loaded ({} markets)", config.markets.len());

    // 데이터베이스 연결
    let db = Database::connect(&config.database_url).await?;
    tracing::info!("🗄️  Database connected");

    db.run_migrations().await?;
    tracing::info!("📦 Migrations completed");

    let store: Arc<dyn PositionStore> = Arc::new(db.store());

    // 재시작 복구: 죽은 프로세스가 남긴 진행 중 청산을 되돌린다
    let stale = store.reset_stale_liquidations().await?;
    if stale > 0 {
        tracing::warn!(count = stale, "stale liquidations reset from a previous run");
    }

    // 봉인 채널 키. 비밀키가 없으면 새로 만들고 경고만 남긴다
    // (재시작하면 이전 키로 봉인된 의도는 열 수 없다)
    let keypair = match &config.relay_secret_key {
        Some(encoded) => RelayKeypair::from_base64(encoded)?,
        None => {
            tracing::warn!("RELAY_SECRET_KEY not set, generating an ephemeral keypair");
            RelayKeypair::generate()
        }
    };
    let doc = zk_perps_executor::crypto::channel::publish_public_key(
        &config.relay_pubkey_path,
        &keypair,
    )?;
    tracing::info!(
        "🔑 Relay public key published to {} ({})",
        config.relay_pubkey_path,
        doc.public_key
    );

    // 펀딩 오라클: DB 스냅샷으로 단조성 유지
    let oracle = Arc::new(FundingOracle::new(
        &config.markets,
        config.funding_step_per_hour,
        config.price_feed_url.clone(),
    ));
    oracle.hydrate(&store.load_funding().await?);
    tracing::info!("💰 Funding oracle ready");

    // 포지션 트리 재구축
    let book = Arc::new(PositionBook::new(
        config.tree_depth,
        config.max_probe,
        store.clone(),
    )?);
    let restored = book.rebuild().await?;
    let (root, _, _) = book.root_info().await;
    tracing::info!("🌳 Position tree rebuilt ({} positions, root {})", restored, root);

    let prover = Arc::new(ZkProver::new(
        config.tree_depth,
        config.max_concurrent_proofs,
        config.verify_after_prove,
    ));
    tracing::info!("🔐 ZK prover initialized (depth {})", config.tree_depth);

    // 체인 클라이언트. RPC/컨트랙트/키 셋 다 있어야 켜진다
    if !config.chain_enabled() {
        tracing::warn!("chain credentials not set, liquidations run in dry-run mode");
    }
    let chain: Option<Arc<dyn ChainClient>> = match (
        &config.eth_rpc_url,
        &config.perp_engine_address,
        &config.executor_private_key,
    ) {
        (Some(rpc), Some(contract), Some(key)) => {
            let client = EthersChain::new(rpc, config.chain_id, contract, key)?;
            tracing::info!("⛓️  Chain client ready (executor {})", client.executor_address());
            Some(Arc::new(client))
        }
        _ => None,
    };

    let liquidator = Arc::new(Liquidator::new(
        book.clone(),
        store.clone(),
        oracle.clone(),
        prover.clone(),
        chain,
        config.mmr_bps,
        config.submit_max_retries,
        config.submit_backoff_ms,
    ));

    if config.scanner_enabled {
        spawn_scanner(liquidator.clone(), config.scan_interval_secs);
        tracing::info!("🔭 Liquidation scanner running every {}s", config.scan_interval_secs);
    }

    let limiter = Arc::new(RateLimiter::new(
        config.rate_limit_burst,
        config.rate_limit_per_sec,
    ));

    // 오라클 갱신 + 펀딩 상태 영속화 루프
    {
        let oracle = oracle.clone();
        let store = store.clone();
        let limiter = limiter.clone();
        let every = config.oracle_refresh_secs.max(1);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(every));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                for snap in oracle.refresh().await {
                    let row = FundingStateRow {
                        market: snap.market.clone(),
                        mark_price: snap.mark_price.to_string(),
                        cum_funding: snap.cum_funding.to_string(),
                        updated_at: snap.updated_at,
                    };
                    if let Err(e) = store.save_funding(&row).await {
                        tracing::warn!(market = %snap.market, error = %e, "funding state not persisted");
                    }
                }
                limiter.sweep(Duration::from_secs(900));
            }
        });
    }

    // 앱 상태 구성
    let state = AppState {
        config: Arc::new(config.clone()),
        db: Arc::new(db),
        store,
        book,
        oracle,
        prover,
        liquidator,
        keypair: Arc::new(keypair),
        limiter,
    };

    // 라우터 구성
    let app = routes::create_router(state);

    // 서버 시작
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("🌐 Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
