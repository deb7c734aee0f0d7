use std::collections::HashSet;
use std::convert::Infallible;
use std::io::Cursor;
use std::sync::Arc;

use bytes::Bytes;
use catalogue::application::catalog::media::{ImageNormalizer, Upload};
use catalogue::cache::{CacheConfig, CacheKey, CacheTrigger, EntityKey, EventKind, ResponseCache, deps};
use catalogue::infra::images::JpegNormalizer;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use metrics_util::debugging::DebuggingRecorder;
use uuid::Uuid;

fn png(width: u32, height: u32) -> Bytes {
    let image = RgbImage::from_pixel(width, height, Rgb([12, 120, 200]));
    let mut buffer = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(image)
        .write_to(&mut buffer, ImageFormat::Png)
        .expect("encode png");
    Bytes::from(buffer.into_inner())
}

fn upload(bytes: Bytes) -> Upload {
    Upload {
        file_name: "swatch.png".to_string(),
        content_type: Some("image/png".to_string()),
        bytes,
    }
}

#[tokio::test]
async fn cache_and_image_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");

    // Cache miss, hit, then invalidation through a write event.
    let cache = Arc::new(ResponseCache::new(CacheConfig::default()));
    let trigger = CacheTrigger::new(cache.clone());
    let product_id = Uuid::new_v4();

    for _ in 0..2 {
        let body = cache
            .get_or_compute(CacheKey::ProductDetail(product_id), async {
                deps::record(EntityKey::Product(product_id));
                Ok::<_, Infallible>(Bytes::from_static(b"{}"))
            })
            .await
            .expect("infallible");
        assert_eq!(body, Bytes::from_static(b"{}"));
    }
    trigger.publish(EventKind::ProductUpdated { product_id });

    let stats = cache.stats();
    assert_eq!((stats.hits, stats.misses, stats.invalidated), (1, 1, 1));

    // One stored image, one rejected upload.
    let normalizer = JpegNormalizer::default();
    normalizer
        .normalize(&upload(png(40, 30)))
        .expect("png should normalize");
    assert!(
        normalizer
            .normalize(&upload(Bytes::from_static(b"not an image")))
            .is_err()
    );

    let names: HashSet<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    let expected = [
        "catalogue_cache_hit_total",
        "catalogue_cache_miss_total",
        "catalogue_cache_invalidated_total",
        "catalogue_image_normalized_total",
    ];

    for metric in expected {
        assert!(names.contains(metric), "missing metric: {metric}");
    }
}
