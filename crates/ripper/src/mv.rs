//! Segmented music-video downloader.
//!
//! Up to 16 workers fetch segments concurrently; a single writer owns the
//! output file and an out-of-order buffer map, writing segments strictly in
//! ascending index. Byte totals live in shared atomics read by the 500 ms
//! progress aggregator, which blends video and audio completion into one
//! percentage (capped at 90%, the remux phase owns the rest).

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures_util::TryStreamExt;
use reqwest::Client;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{Semaphore, mpsc, watch};
use tokio::task::JoinSet;
use tokio_util::io::StreamReader;
use tracing::{debug, warn};
use url::Url;

use crate::error::RipError;
use crate::tools::ExternalTools;

/// Concurrent segment fetches (and HEAD pre-flights).
const MAX_CONCURRENCY: usize = 16;

/// Byte-accounting granularity of the downloaded counter.
const READ_CHUNK: usize = 512 * 1024;

/// Aggregator tick interval.
const TICK: Duration = Duration::from_millis(500);

/// Shared byte accounting for one stream.
#[derive(Debug, Clone, Default)]
pub struct StreamCounters {
    pub downloaded: Arc<AtomicI64>,
    pub total: Arc<AtomicI64>,
}

impl StreamCounters {
    pub fn downloaded(&self) -> i64 {
        self.downloaded.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> i64 {
        self.total.load(Ordering::Relaxed)
    }
}

/// Sum the `content-length` of every URL via HEAD requests.
///
/// Missing or failed lengths simply do not count.
pub async fn head_total_size(http: &Client, urls: &[Url]) -> i64 {
    let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENCY));
    let mut join_set = JoinSet::new();
    for url in urls.iter().cloned() {
        let http = http.clone();
        let semaphore = semaphore.clone();
        join_set.spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok()?;
            let response = http.head(url).send().await.ok()?;
            if !response.status().is_success() {
                return None;
            }
            // Read the header directly: a HEAD response has no body for
            // `content_length()` to measure.
            response
                .headers()
                .get(reqwest::header::CONTENT_LENGTH)?
                .to_str()
                .ok()?
                .parse::<i64>()
                .ok()
        });
    }

    let mut total = 0i64;
    while let Some(result) = join_set.join_next().await {
        if let Ok(Some(len)) = result {
            total += len;
        }
    }
    total
}

async fn fetch_segment(
    http: Client,
    url: Url,
    index: usize,
    counters: StreamCounters,
) -> Option<(usize, Bytes)> {
    let response = match http.get(url.clone()).send().await {
        Ok(response) if response.status().is_success() => response,
        Ok(response) => {
            warn!(index, status = %response.status(), "segment fetch failed");
            return None;
        }
        Err(e) => {
            warn!(index, error = %e, "segment fetch failed");
            return None;
        }
    };

    // Account in fixed 512 KiB steps, not transport chunk sizes.
    let mut reader = StreamReader::new(response.bytes_stream().map_err(std::io::Error::other));
    let mut buffer = BytesMut::new();
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        let mut filled = 0usize;
        while filled < READ_CHUNK {
            match reader.read(&mut chunk[filled..]).await {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) => {
                    warn!(index, error = %e, "segment read failed");
                    return None;
                }
            }
        }
        if filled == 0 {
            break;
        }
        counters.downloaded.fetch_add(filled as i64, Ordering::Relaxed);
        buffer.extend_from_slice(&chunk[..filled]);
        if filled < READ_CHUNK {
            break;
        }
    }
    Some((index, buffer.freeze()))
}

/// Fetch `urls` concurrently and assemble them at `out_path` in index
/// order. `counters.total` is primed from HEAD pre-flights before the
/// first GET fires.
pub async fn download_segments(
    http: &Client,
    urls: &[Url],
    out_path: &Path,
    counters: &StreamCounters,
) -> Result<(), RipError> {
    counters
        .total
        .store(head_total_size(http, urls).await, Ordering::Relaxed);

    let (tx, mut rx) = mpsc::channel::<(usize, Bytes)>(urls.len().max(1));
    let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENCY));
    let mut join_set = JoinSet::new();
    for (index, url) in urls.iter().cloned().enumerate() {
        let tx = tx.clone();
        let http = http.clone();
        let semaphore = semaphore.clone();
        let counters = counters.clone();
        join_set.spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return;
            };
            if let Some(segment) = fetch_segment(http, url, index, counters).await {
                let _ = tx.send(segment).await;
            }
        });
    }
    drop(tx);

    // Single writer: hold out-of-order segments until their turn.
    let mut file = tokio::fs::File::create(out_path).await?;
    let mut next_index = 0usize;
    let mut pending: HashMap<usize, Bytes> = HashMap::new();
    while let Some((index, data)) = rx.recv().await {
        if index == next_index {
            file.write_all(&data).await?;
            next_index += 1;
            while let Some(data) = pending.remove(&next_index) {
                file.write_all(&data).await?;
                next_index += 1;
            }
        } else {
            pending.insert(index, data);
        }
    }
    file.flush().await?;
    while join_set.join_next().await.is_some() {}

    if next_index != urls.len() {
        warn!(
            written = next_index,
            expected = urls.len(),
            "segments missing from assembled stream"
        );
    }
    debug!(segments = next_index, "stream assembled");
    Ok(())
}

/// Download one MV stream and decrypt it with the external block-mode tool.
pub async fn run_mv_stream(
    http: &Client,
    key: &str,
    urls: &[Url],
    out_path: &Path,
    counters: &StreamCounters,
    tools: &ExternalTools,
) -> Result<(), RipError> {
    let staging = tempfile::Builder::new()
        .prefix("enc_mv_data-")
        .suffix(".mp4")
        .tempfile()?;
    download_segments(http, urls, staging.path(), counters).await?;
    tools.decrypt_file(key, staging.path(), out_path).await
}

/// Blend both streams into one download percentage.
///
/// Video weighs 0.5, audio 0.4, and the whole download phase is scaled to
/// 90% — the remainder belongs to remuxing. Unknown totals contribute zero.
pub fn blended_percent(v_done: i64, v_total: i64, a_done: i64, a_total: i64) -> f64 {
    let ratio = |done: i64, total: i64| {
        if total > 0 {
            done as f64 / total as f64
        } else {
            0.0
        }
    };
    (ratio(v_done, v_total) * 0.5 + ratio(a_done, a_total) * 0.4) * 0.9
}

/// Tick every 500 ms, reporting the blended percentage whenever its integer
/// value increases. Exits when `done` flips to true. Ticks while both
/// totals are still unknown are skipped.
pub async fn progress_aggregator(
    video: StreamCounters,
    audio: StreamCounters,
    mut done: watch::Receiver<bool>,
    mut on_percent: impl FnMut(f64),
) {
    let mut ticker = tokio::time::interval(TICK);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut last_emitted = -1i64;
    loop {
        tokio::select! {
            changed = done.changed() => {
                if changed.is_err() || *done.borrow() {
                    return;
                }
            }
            _ = ticker.tick() => {
                let (v_total, a_total) = (video.total(), audio.total());
                if v_total == 0 && a_total == 0 {
                    continue;
                }
                let percent = blended_percent(
                    video.downloaded(), v_total,
                    audio.downloaded(), a_total,
                );
                let current = (percent * 100.0) as i64;
                if current > last_emitted {
                    on_percent(percent);
                    last_emitted = current;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::Router;
    use axum::extract::Path as AxumPath;
    use axum::http::{Method, header::CONTENT_LENGTH};
    use axum::response::IntoResponse;
    use axum::routing::any;

    use super::*;

    const SEGMENT_LEN: usize = 1_000_000;
    const SEGMENTS: usize = 10;

    fn segment_body(index: usize) -> Vec<u8> {
        vec![index as u8; SEGMENT_LEN]
    }

    async fn spawn_segment_server() -> Url {
        // Segments answer slowest-first so completion order is reversed.
        let router = Router::new().route(
            "/seg/{index}",
            any(|method: Method, AxumPath(index): AxumPath<usize>| async move {
                if method == Method::HEAD {
                    return ([(CONTENT_LENGTH, SEGMENT_LEN.to_string())], Vec::new())
                        .into_response();
                }
                let delay = (SEGMENTS - index) * 20;
                tokio::time::sleep(Duration::from_millis(delay as u64)).await;
                segment_body(index).into_response()
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        Url::parse(&format!("http://{addr}")).unwrap()
    }

    #[tokio::test]
    async fn test_reverse_arrival_still_assembles_in_order() {
        let base = spawn_segment_server().await;
        let urls: Vec<Url> = (0..SEGMENTS)
            .map(|i| base.join(&format!("/seg/{i}")).unwrap())
            .collect();

        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("assembled.mp4");
        let counters = StreamCounters::default();

        download_segments(&Client::new(), &urls, &out, &counters)
            .await
            .unwrap();

        assert_eq!(counters.total(), (SEGMENT_LEN * SEGMENTS) as i64);
        assert_eq!(counters.downloaded(), (SEGMENT_LEN * SEGMENTS) as i64);

        let assembled = std::fs::read(&out).unwrap();
        assert_eq!(assembled.len(), SEGMENT_LEN * SEGMENTS);
        for (index, chunk) in assembled.chunks(SEGMENT_LEN).enumerate() {
            assert!(chunk.iter().all(|&b| b == index as u8), "segment {index} out of place");
        }
    }

    #[tokio::test]
    async fn test_blended_percent_weights() {
        // Video done, audio half done: 0.5 + 0.2 scaled by 0.9.
        let percent = blended_percent(100, 100, 50, 100);
        assert!((percent - 0.63).abs() < 1e-9);
        // Unknown totals contribute nothing.
        assert_eq!(blended_percent(10, 0, 0, 0), 0.0);
        // Both complete caps at 90%.
        assert!((blended_percent(5, 5, 7, 7) - 0.9).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_aggregator_emits_monotonic_integers() {
        let video = StreamCounters::default();
        let audio = StreamCounters::default();
        video.total.store(1000, Ordering::Relaxed);
        audio.total.store(1000, Ordering::Relaxed);

        let (done_tx, done_rx) = watch::channel(false);
        let (percent_tx, mut percent_rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(progress_aggregator(
            video.clone(),
            audio.clone(),
            done_rx,
            move |p| {
                percent_tx.send((p * 100.0) as i64).unwrap();
            },
        ));

        for step in 1..=4 {
            video.downloaded.store(step * 250, Ordering::Relaxed);
            audio.downloaded.store(step * 250, Ordering::Relaxed);
            tokio::time::advance(TICK).await;
            tokio::task::yield_now().await;
        }
        done_tx.send(true).unwrap();
        task.await.unwrap();

        let mut seen = Vec::new();
        while let Ok(percent) = percent_rx.try_recv() {
            seen.push(percent);
        }
        assert!(!seen.is_empty());
        assert!(seen.windows(2).all(|w| w[0] < w[1]), "percents not increasing: {seen:?}");
        assert!(*seen.last().unwrap() <= 90);
    }
}
