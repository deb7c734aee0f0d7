#![allow(dead_code)]

use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use catalogue::application::catalog::{
    CategoryService, CompositionService, ProductService,
    media::{BlobStore, ImageNormalizer, MediaUrls},
    products::ProductMedia,
    views::ProductEncoder,
};
use catalogue::application::messages::{ContactService, InquiryService};
use catalogue::application::notify::ContactNotifier;
use catalogue::application::repos::{
    CategoriesRepo, CategoriesWriteRepo, CompositionsRepo, CompositionsWriteRepo,
    ContactMessagesRepo, InquiriesRepo, ProductsRepo, ProductsWriteRepo,
};
use catalogue::cache::{CacheConfig, CacheTrigger, ResponseCache};
use catalogue::infra::db::PostgresRepositories;
use catalogue::infra::http::{self, HttpState, RateLimiter};
use catalogue::infra::images::JpegNormalizer;
use catalogue::infra::mail::DisabledNotifier;
use catalogue::infra::uploads::UploadStorage;
use http_body_util::BodyExt;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use serde_json::Value;
use sqlx::PgPool;
use tempfile::TempDir;
use tower::ServiceExt;

pub const ADMIN_TOKEN: &str = "test-admin-token";
const BOUNDARY: &str = "catalogue-test-boundary";

pub struct TestApp {
    pub public: Router,
    pub admin: Router,
    pub state: HttpState,
    pub pool: PgPool,
    pub uploads: TempDir,
}

pub fn app(pool: PgPool) -> TestApp {
    let uploads = tempfile::tempdir().expect("tempdir");
    let repositories = Arc::new(PostgresRepositories::new(pool.clone()));

    let categories_repo: Arc<dyn CategoriesRepo> = repositories.clone();
    let categories_write_repo: Arc<dyn CategoriesWriteRepo> = repositories.clone();
    let compositions_repo: Arc<dyn CompositionsRepo> = repositories.clone();
    let compositions_write_repo: Arc<dyn CompositionsWriteRepo> = repositories.clone();
    let products_repo: Arc<dyn ProductsRepo> = repositories.clone();
    let products_write_repo: Arc<dyn ProductsWriteRepo> = repositories.clone();
    let contact_repo: Arc<dyn ContactMessagesRepo> = repositories.clone();
    let inquiries_repo: Arc<dyn InquiriesRepo> = repositories.clone();

    let storage = Arc::new(UploadStorage::new(uploads.path().to_path_buf()).expect("storage"));
    let blobs: Arc<dyn BlobStore> = storage.clone();
    let normalizer: Arc<dyn ImageNormalizer> = Arc::new(JpegNormalizer::default());
    let encoder = ProductEncoder::new(MediaUrls::new("/uploads"));

    let cache = Arc::new(ResponseCache::new(CacheConfig::default()));
    let trigger = Some(Arc::new(CacheTrigger::new(cache.clone())));
    let notifier: Arc<dyn ContactNotifier> = Arc::new(DisabledNotifier);

    let state = HttpState {
        categories: CategoryService::new(categories_repo.clone(), categories_write_repo)
            .with_cache_trigger_opt(trigger.clone()),
        compositions: CompositionService::new(compositions_repo.clone(), compositions_write_repo)
            .with_cache_trigger_opt(trigger.clone()),
        products: ProductService::new(
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
        .with_cache_trigger_opt(trigger),
        contact: ContactService::new(contact_repo, notifier),
        inquiries: InquiryService::new(inquiries_repo, products_repo, encoder),
        cache,
        uploads: storage,
        db: repositories,
        rate_limiter: RateLimiter::new(Duration::from_secs(60), 1_000),
        admin_token: Some(Arc::from(ADMIN_TOKEN)),
        max_request_bytes: 10 * 1024 * 1024,
    };

    TestApp {
        public: http::build_public_router(state.clone()),
        admin: http::build_admin_router(state.clone()),
        state,
        pool,
        uploads,
    }
}

pub fn json_request(method: Method, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {ADMIN_TOKEN}"));
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("request"),
        None => builder.body(Body::empty()).expect("request"),
    }
}

pub enum Part<'a> {
    Text(&'a str, &'a str),
    File(&'a str, &'a str, &'a [u8]),
}

pub fn multipart_request(method: Method, uri: &str, parts: &[Part<'_>]) -> Request<Body> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match part {
            Part::Text(name, value) => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
                );
                body.extend_from_slice(value.as_bytes());
            }
            Part::File(name, file_name, bytes) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\n\
                         Content-Type: application/octet-stream\r\n\r\n"
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(bytes);
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {ADMIN_TOKEN}"))
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .expect("request")
}

pub async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.expect("router responds");
    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("json body")
    };
    (status, body)
}

pub fn png(width: u32, height: u32) -> Vec<u8> {
    let image = RgbImage::from_pixel(width, height, Rgb([180, 40, 90]));
    let mut buffer = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(image)
        .write_to(&mut buffer, ImageFormat::Png)
        .expect("encode png");
    buffer.into_inner()
}

pub async fn count(pool: &PgPool, table: &str) -> i64 {
    sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM {table}"))
        .fetch_one(pool)
        .await
        .expect("count rows")
}

pub fn stored_files(root: &Path) -> usize {
    fn walk(dir: &Path) -> usize {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return 0;
        };
        entries
            .flatten()
            .map(|entry| {
                let path = entry.path();
                if path.is_dir() { walk(&path) } else { 1 }
            })
            .sum()
    }
    walk(root)
}

pub fn id_of(value: &Value) -> String {
    value["id"].as_str().expect("id field").to_string()
}
