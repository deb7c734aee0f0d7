use std::{net::SocketAddr, process, sync::Arc, time::Duration};

use catalogue::{
    application::{
        catalog::{
            CategoryService, CompositionService, ProductService,
            media::{BlobStore, ImageNormalizer, MediaUrls},
            products::ProductMedia,
            views::ProductEncoder,
        },
        error::AppError,
        messages::{ContactService, InquiryService},
        notify::ContactNotifier,
        repos::{
            CategoriesRepo, CategoriesWriteRepo, CompositionsRepo, CompositionsWriteRepo,
            ContactMessagesRepo, InquiriesRepo, ProductsRepo, ProductsWriteRepo,
        },
    },
    cache::{CacheConfig, CacheTrigger, ResponseCache},
    config,
    infra::{
        db::PostgresRepositories,
        error::InfraError,
        http::{self, HttpState, RateLimiter},
        images::JpegNormalizer,
        mail::{DisabledNotifier, RelayNotifier},
        telemetry,
        uploads::UploadStorage,
    },
};
use tokio::{sync::watch, try_join};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Migrate(_) => run_migrate(settings).await,
    }
}

async fn run_migrate(settings: config::Settings) -> Result<(), AppError> {
    let pool = connect(&settings).await?;
    PostgresRepositories::run_migrations(&pool)
        .await
        .map_err(InfraError::from)?;
    info!(target = "catalogue::migrate", "Migrations applied");
    Ok(())
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let pool = connect(&settings).await?;
    PostgresRepositories::run_migrations(&pool)
        .await
        .map_err(InfraError::from)?;
    let repositories = Arc::new(PostgresRepositories::new(pool));

    let state = build_http_state(repositories, &settings)?;
    serve_http(&settings, state).await
}

async fn connect(settings: &config::Settings) -> Result<sqlx::PgPool, AppError> {
    let database_url = settings
        .database
        .url
        .as_ref()
        .ok_or_else(|| InfraError::configuration("database url is not configured"))?;

    let pool = PostgresRepositories::connect(database_url, settings.database.max_connections.get())
        .await
        .map_err(InfraError::from)?;
    Ok(pool)
}

fn build_notifier(mail: &config::MailSettings) -> Result<Arc<dyn ContactNotifier>, AppError> {
    if !mail.enabled {
        return Ok(Arc::new(DisabledNotifier));
    }
    let Some(endpoint) = mail.endpoint.clone() else {
        warn!(
            target = "catalogue::mail",
            "Mail enabled without an endpoint; notifications disabled"
        );
        return Ok(Arc::new(DisabledNotifier));
    };

    let relay = RelayNotifier::new(
        endpoint,
        mail.api_key.clone(),
        mail.sender.clone(),
        mail.recipient.clone(),
        mail.timeout,
    )?;
    Ok(Arc::new(relay))
}

fn build_http_state(
    repositories: Arc<PostgresRepositories>,
    settings: &config::Settings,
) -> Result<HttpState, AppError> {
    let categories_repo: Arc<dyn CategoriesRepo> = repositories.clone();
    let categories_write_repo: Arc<dyn CategoriesWriteRepo> = repositories.clone();
    let compositions_repo: Arc<dyn CompositionsRepo> = repositories.clone();
    let compositions_write_repo: Arc<dyn CompositionsWriteRepo> = repositories.clone();
    let products_repo: Arc<dyn ProductsRepo> = repositories.clone();
    let products_write_repo: Arc<dyn ProductsWriteRepo> = repositories.clone();
    let contact_repo: Arc<dyn ContactMessagesRepo> = repositories.clone();
    let inquiries_repo: Arc<dyn InquiriesRepo> = repositories.clone();

    let upload_storage = Arc::new(
        UploadStorage::new(settings.uploads.directory.clone())
            .map_err(|err| AppError::from(InfraError::Io(err)))?,
    );
    let blobs: Arc<dyn BlobStore> = upload_storage.clone();
    let normalizer: Arc<dyn ImageNormalizer> = Arc::new(JpegNormalizer::new(
        settings.images.max_dimension.get(),
        settings.images.jpeg_quality,
    ));
    let encoder = ProductEncoder::new(MediaUrls::new(settings.uploads.public_base.clone()));

    let cache = Arc::new(ResponseCache::new(CacheConfig::from(&settings.cache)));
    let cache_trigger = Some(Arc::new(CacheTrigger::new(cache.clone())));

    let categories = CategoryService::new(categories_repo.clone(), categories_write_repo)
        .with_cache_trigger_opt(cache_trigger.clone());
    let compositions = CompositionService::new(compositions_repo.clone(), compositions_write_repo)
        .with_cache_trigger_opt(cache_trigger.clone());
    let products = ProductService::new(
        products_repo.clone(),
        products_write_repo,
        categories_repo,
        compositions_repo,
        ProductMedia {
            normalizer,
            blobs,
            encoder: encoder.clone(),
        },
    )
    .with_cache_trigger_opt(cache_trigger);

    let contact = ContactService::new(contact_repo, build_notifier(&settings.mail)?);
    let inquiries = InquiryService::new(inquiries_repo, products_repo, encoder);

    let rate_limiter = RateLimiter::new(
        Duration::from_secs(u64::from(settings.rate_limit.window_seconds.get())),
        settings.rate_limit.max_requests.get(),
    );

    if settings.admin.token.is_none() {
        warn!(
            target = "catalogue::admin",
            "No admin token configured; admin routes will refuse every request"
        );
    }

    Ok(HttpState {
        categories,
        compositions,
        products,
        contact,
        inquiries,
        cache,
        uploads: upload_storage,
        db: repositories,
        rate_limiter,
        admin_token: settings.admin.token.as_deref().map(Arc::from),
        max_request_bytes: settings.uploads.max_request_bytes.get(),
    })
}

async fn serve_http(settings: &config::Settings, state: HttpState) -> Result<(), AppError> {
    let public_router = http::build_public_router(state.clone());
    let admin_router = http::build_admin_router(state);

    let public_listener = tokio::net::TcpListener::bind(settings.server.public_addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    let admin_listener = tokio::net::TcpListener::bind(settings.server.admin_addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        target = "catalogue::serve",
        public_addr = %settings.server.public_addr,
        admin_addr = %settings.server.admin_addr,
        "Listeners bound"
    );

    let (stop_tx, stop_rx) = watch::channel(false);

    let public_server = axum::serve(
        public_listener,
        public_router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(stopped(stop_rx.clone()));
    let admin_server = axum::serve(
        admin_listener,
        admin_router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(stopped(stop_rx));

    let servers = async { try_join!(public_server, admin_server) };
    tokio::pin!(servers);

    let finished = tokio::select! {
        result = &mut servers => Some(result),
        () = shutdown_signal() => None,
    };

    let result = match finished {
        Some(result) => result,
        None => {
            info!(target = "catalogue::serve", "Shutdown requested; draining connections");
            let _ = stop_tx.send(true);
            match tokio::time::timeout(settings.server.graceful_shutdown, &mut servers).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(
                        target = "catalogue::serve",
                        grace_secs = settings.server.graceful_shutdown.as_secs(),
                        "Graceful shutdown timed out; dropping open connections"
                    );
                    return Ok(());
                }
            }
        }
    };

    result.map_err(|err| AppError::unexpected(format!("server error: {err}")))?;
    Ok(())
}

async fn stopped(mut stop: watch::Receiver<bool>) {
    while !*stop.borrow_and_update() {
        if stop.changed().await.is_err() {
            return;
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
