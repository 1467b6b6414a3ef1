//! Region feed - JSONL stream of per-frame foreground regions
//!
//! The first line is a `FeedHeader` carrying the source frame rate. Each
//! following line holds the regions extracted from one frame. A malformed
//! frame line is logged and skipped; a missing or malformed header is fatal.

use crate::domain::types::{FeedHeader, FrameRegions};
use crate::infra::metrics::Metrics;
use anyhow::{bail, Context};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Parse the feed header line
pub fn parse_header(line: &str) -> anyhow::Result<FeedHeader> {
    let header: FeedHeader = serde_json::from_str(line.trim()).context("invalid feed header")?;
    if !header.fps.is_finite() || header.fps <= 0.0 {
        bail!("feed header fps must be positive, got {}", header.fps);
    }
    Ok(header)
}

/// Parse one frame line
pub fn parse_frame(line: &str) -> serde_json::Result<FrameRegions> {
    serde_json::from_str(line.trim())
}

/// Reader over a region feed
pub struct FeedReader<R> {
    lines: Lines<R>,
    header: FeedHeader,
    line_no: u64,
    metrics: Option<Arc<Metrics>>,
}

impl FeedReader<BufReader<File>> {
    /// Open a feed file and read its header
    pub async fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .await
            .with_context(|| format!("failed to open region feed {}", path.display()))?;
        Self::from_reader(BufReader::new(file))
            .await
            .with_context(|| format!("failed to read region feed {}", path.display()))
    }
}

impl<R: AsyncBufRead + Unpin> FeedReader<R> {
    /// Wrap a reader; the first non-blank line must be the header
    pub async fn from_reader(reader: R) -> anyhow::Result<Self> {
        let mut lines = reader.lines();
        let mut line_no = 0u64;
        loop {
            line_no += 1;
            let Some(line) = lines.next_line().await? else {
                bail!("region feed is empty, expected a header line");
            };
            if line.trim().is_empty() {
                continue;
            }
            let header = parse_header(&line)?;
            info!(fps = %header.fps, width = ?header.width, height = ?header.height, "feed_opened");
            return Ok(Self { lines, header, line_no, metrics: None });
        }
    }

    /// Attach metrics so skipped lines are counted
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn header(&self) -> &FeedHeader {
        &self.header
    }

    /// Next well-formed frame, or None at end of stream
    pub async fn next_frame(&mut self) -> anyhow::Result<Option<FrameRegions>> {
        while let Some(line) = self.lines.next_line().await.context("region feed read failed")? {
            self.line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            match parse_frame(&line) {
                Ok(frame) => return Ok(Some(frame)),
                Err(e) => {
                    if let Some(ref m) = self.metrics {
                        m.record_feed_line_skipped();
                    }
                    warn!(line = %self.line_no, error = %e, "feed_frame_malformed");
                }
            }
        }
        Ok(None)
    }

    /// Forward frames into the counter channel until end of stream,
    /// shutdown, or the receiver going away. Returns frames forwarded.
    ///
    /// With `pacing` set, frames are released one per tick.
    pub async fn pump(
        mut self,
        tx: mpsc::Sender<FrameRegions>,
        pacing: Option<Duration>,
        mut shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<u64> {
        let mut ticker = pacing.map(tokio::time::interval);
        let mut forwarded = 0u64;

        loop {
            if let Some(ref mut t) = ticker {
                tokio::select! {
                    _ = t.tick() => {}
                    Ok(()) = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                        continue;
                    }
                }
            }
            if *shutdown.borrow() {
                break;
            }

            let Some(frame) = self.next_frame().await? else {
                break;
            };
            if tx.send(frame).await.is_err() {
                debug!("feed_receiver_closed");
                break;
            }
            forwarded += 1;
        }

        info!(frames = %forwarded, last_line = %self.line_no, "feed_finished");
        Ok(forwarded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = r#"{"fps": 30.0, "width": 640, "height": 360}
{"frame": 0, "regions": []}

{"frame": 1, "regions": [{"min_x": 10, "min_y": 20, "max_x": 110, "max_y": 220, "area": 18000.0}]}
not json
{"frame": 3, "regions": [{"min_x": 1, "min_y": 2, "max_x": 3, "max_y": 4, "area": 5.0}, {"min_x": 6, "min_y": 7, "max_x": 8, "max_y": 9, "area": 10.0}]}
"#;

    #[tokio::test]
    async fn test_reads_header_and_frames() {
        let metrics = Arc::new(Metrics::new());
        let mut reader = FeedReader::from_reader(FEED.as_bytes()).await.unwrap().with_metrics(metrics.clone());
        assert_eq!(reader.header().fps, 30.0);
        assert_eq!(reader.header().width, Some(640));

        let f0 = reader.next_frame().await.unwrap().unwrap();
        assert_eq!(f0.frame, 0);
        assert!(f0.regions.is_empty());

        let f1 = reader.next_frame().await.unwrap().unwrap();
        assert_eq!(f1.frame, 1);
        assert_eq!(f1.regions[0].area, 18000.0);
        assert_eq!(f1.regions[0].bbox.max_y, 220);

        // Malformed line is skipped
        let f3 = reader.next_frame().await.unwrap().unwrap();
        assert_eq!(f3.frame, 3);
        assert_eq!(f3.regions.len(), 2);
        assert_eq!(f3.regions[0].area, 5.0);
        assert_eq!(f3.regions[1].area, 10.0);
        assert_eq!(metrics.feed_lines_skipped_total(), 1);

        assert!(reader.next_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_header_is_fatal() {
        assert!(FeedReader::from_reader("".as_bytes()).await.is_err());
        assert!(FeedReader::from_reader("{\"frame\": 0}\n".as_bytes()).await.is_err());
    }

    #[test]
    fn test_header_rejects_bad_fps() {
        assert!(parse_header(r#"{"fps": 0}"#).is_err());
        assert!(parse_header(r#"{"fps": -25.0}"#).is_err());
        assert!(parse_header(r#"{"fps": 25}"#).is_ok());
    }

    #[tokio::test]
    async fn test_pump_forwards_all_frames() {
        let reader = FeedReader::from_reader(FEED.as_bytes()).await.unwrap();
        let (tx, mut rx) = mpsc::channel(16);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let forwarded = reader.pump(tx, None, shutdown_rx).await.unwrap();
        assert_eq!(forwarded, 3);

        let mut frames = Vec::new();
        while let Some(f) = rx.recv().await {
            frames.push(f.frame);
        }
        assert_eq!(frames, vec![0, 1, 3]);
    }

    #[tokio::test]
    async fn test_pump_stops_on_shutdown() {
        let reader = FeedReader::from_reader(FEED.as_bytes()).await.unwrap();
        let (tx, _rx) = mpsc::channel(16);
        let (_shutdown_tx, shutdown_rx) = watch::channel(true);

        let forwarded = reader.pump(tx, None, shutdown_rx).await.unwrap();
        assert_eq!(forwarded, 0);
    }

    #[tokio::test]
    async fn test_open_missing_file() {
        let err = FeedReader::open("/nonexistent/regions.jsonl").await.err().unwrap();
        assert!(err.to_string().contains("failed to open region feed"));
    }
}
