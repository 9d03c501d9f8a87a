//! Progress reporting for transfers
//!
//! Every file transfer owns an [`Indicator`] that a [`ProgressReader`]
//! advances as bytes flow through it. Indicators are handed out by an
//! [`IndicatorPool`], which keeps at most `queue_size` of them visible,
//! optionally tracks an aggregate of completed nodes, and renders everything
//! through `indicatif` on a fixed refresh interval.

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::SeekFrom;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{ready, Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncSeek, ReadBuf};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;
use treecp_core::api::ErrorSink;
use treecp_core::StoreError;

/// Progress counter of one transfer, or of the whole run
#[derive(Debug, Clone)]
pub struct Indicator {
    inner: Arc<IndicatorState>,
}

#[derive(Debug)]
struct IndicatorState {
    id: u64,
    label: String,
    current: AtomicU64,
    total: AtomicU64,
    message: Mutex<Option<String>>,
}

impl Indicator {
    pub fn new(label: impl Into<String>, total: u64) -> Self {
        Self::with_id(0, label, total)
    }

    fn with_id(id: u64, label: impl Into<String>, total: u64) -> Self {
        Self {
            inner: Arc::new(IndicatorState {
                id,
                label: label.into(),
                current: AtomicU64::new(0),
                total: AtomicU64::new(total),
                message: Mutex::new(None),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn current(&self) -> u64 {
        self.inner.current.load(Ordering::Acquire)
    }

    pub fn total(&self) -> u64 {
        self.inner.total.load(Ordering::Acquire)
    }

    /// Move to an absolute position, capped at the total
    pub fn set(&self, position: u64) {
        self.inner
            .current
            .store(position.min(self.total()), Ordering::Release);
    }

    pub fn incr(&self, delta: u64) {
        let total = self.total();
        let _ = self
            .inner
            .current
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(current.saturating_add(delta).min(total))
            });
    }

    pub fn finish(&self) {
        self.inner.current.store(self.total(), Ordering::Release);
    }

    pub fn is_complete(&self) -> bool {
        self.current() >= self.total()
    }

    pub fn set_message(&self, message: impl Into<String>) {
        *self.lock_message() = Some(message.into());
    }

    pub fn message(&self) -> Option<String> {
        self.lock_message().clone()
    }

    fn lock_message(&self) -> MutexGuard<'_, Option<String>> {
        self.inner
            .message
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Sink whose errors end up as this indicator's message.
    ///
    /// The returned task finishes once every sender has been dropped.
    pub fn error_sink(&self) -> (ErrorSink, JoinHandle<()>) {
        let (sender, mut receiver) = mpsc::unbounded_channel::<StoreError>();
        let indicator = self.clone();
        let listener = tokio::spawn(async move {
            while let Some(error) = receiver.recv().await {
                debug!("{}: {}", indicator.label(), error);
                indicator.set_message(error.to_string());
            }
        });
        (sender, listener)
    }
}

/// Stream wrapper reporting read and seek positions to an indicator.
///
/// In double mode the stream is expected to be read twice (hash pass, then
/// upload pass) and each pass accounts for half of the total.
pub struct ProgressReader<R> {
    inner: R,
    indicator: Indicator,
    total: u64,
    read: u64,
    double: bool,
    first_pass_done: bool,
    at_eof: bool,
    seeking: bool,
}

impl<R> ProgressReader<R> {
    pub fn new(inner: R, indicator: Indicator, total: u64) -> Self {
        Self {
            inner,
            indicator,
            total,
            read: 0,
            double: false,
            first_pass_done: false,
            at_eof: false,
            seeking: false,
        }
    }

    pub fn double(mut self, double: bool) -> Self {
        self.double = double;
        self
    }

    fn on_read(&mut self, bytes: u64) {
        self.at_eof = false;
        self.read += if self.double { bytes / 2 } else { bytes };
        self.indicator.set(self.read);
    }

    fn on_eof(&mut self) {
        if self.at_eof {
            return;
        }
        self.at_eof = true;
        if self.double && !self.first_pass_done {
            self.first_pass_done = true;
            self.read = self.total / 2;
        } else {
            self.read = self.total;
        }
        self.indicator.set(self.read);
    }

    fn on_seek(&mut self, offset: u64) {
        self.at_eof = false;
        self.read = match (self.double, self.first_pass_done) {
            (true, true) => self.total / 2 + offset / 2,
            (true, false) => offset / 2,
            (false, _) => offset,
        };
        self.indicator.set(self.read);
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for ProgressReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let before = buf.filled().len();
        let had_room = buf.remaining() > 0;
        ready!(Pin::new(&mut self.inner).poll_read(cx, buf))?;

        let bytes = (buf.filled().len() - before) as u64;
        if bytes > 0 {
            self.on_read(bytes);
        } else if had_room {
            self.on_eof();
        }
        Poll::Ready(Ok(()))
    }
}

impl<R: AsyncSeek + Unpin> AsyncSeek for ProgressReader<R> {
    fn start_seek(mut self: Pin<&mut Self>, position: SeekFrom) -> std::io::Result<()> {
        Pin::new(&mut self.inner).start_seek(position)?;
        self.seeking = true;
        Ok(())
    }

    fn poll_complete(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<u64>> {
        let offset = ready!(Pin::new(&mut self.inner).poll_complete(cx))?;
        if std::mem::take(&mut self.seeking) {
            self.on_seek(offset);
        }
        Poll::Ready(Ok(offset))
    }
}

/// Set of indicators shown while a transfer runs
#[derive(Clone)]
pub struct IndicatorPool {
    inner: Arc<PoolState>,
    renderer: Arc<Mutex<Option<RenderHandle>>>,
}

struct PoolState {
    queue_size: usize,
    aggregate: Option<Indicator>,
    slots: Mutex<Vec<Option<Indicator>>>,
    finished: AtomicU64,
    messages: Mutex<Vec<(String, String)>>,
    next_id: AtomicU64,
}

struct RenderHandle {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl IndicatorPool {
    /// Create a pool; `show_aggregate` adds an indicator counting completed
    /// nodes against `total_nodes`.
    pub fn new(show_aggregate: bool, total_nodes: u64, queue_size: usize) -> Self {
        let queue_size = queue_size.max(1);
        let aggregate = show_aggregate.then(|| Indicator::with_id(0, "total", total_nodes));
        Self {
            inner: Arc::new(PoolState {
                queue_size,
                aggregate,
                slots: Mutex::new(vec![None; queue_size]),
                finished: AtomicU64::new(0),
                messages: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
            renderer: Arc::new(Mutex::new(None)),
        }
    }

    pub fn queue_size(&self) -> usize {
        self.inner.queue_size
    }

    pub fn aggregate(&self) -> Option<&Indicator> {
        self.inner.aggregate.as_ref()
    }

    /// Register an indicator for one transfer and give it a visible slot
    pub fn get(&self, total: u64, label: &str) -> Indicator {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let indicator = Indicator::with_id(id, label, total);

        let mut slots = self.inner.lock_slots();
        let index = slots
            .iter()
            .position(|slot| slot.as_ref().map_or(true, Indicator::is_complete))
            .unwrap_or(id as usize % self.inner.queue_size);
        slots[index] = Some(indicator.clone());
        indicator
    }

    /// Free the slot held by a finished indicator
    pub fn retire(&self, indicator: &Indicator) {
        let mut slots = self.inner.lock_slots();
        for slot in slots.iter_mut() {
            if slot.as_ref().is_some_and(|held| held.id() == indicator.id()) {
                *slot = None;
            }
        }
        drop(slots);

        if indicator.is_complete() {
            self.inner.finished.fetch_add(1, Ordering::Relaxed);
        }
        if let Some(message) = indicator.message() {
            self.inner
                .lock_messages()
                .push((indicator.label().to_string(), message));
        }
    }

    /// Count one node as done on the aggregate
    pub fn done(&self) {
        let Some(aggregate) = &self.inner.aggregate else {
            return;
        };
        aggregate.incr(1);
        if aggregate.is_complete() {
            self.inner.lock_slots().iter_mut().for_each(|slot| *slot = None);
        }
    }

    /// Indicators currently holding a slot
    pub fn visible(&self) -> Vec<Indicator> {
        self.inner.lock_slots().iter().flatten().cloned().collect()
    }

    /// Number of retired indicators that had reached their total
    pub fn finished(&self) -> u64 {
        self.inner.finished.load(Ordering::Relaxed)
    }

    /// `(label, message)` of retired indicators that carried a message
    pub fn messages(&self) -> Vec<(String, String)> {
        self.inner.lock_messages().clone()
    }

    /// Start drawing the pool every `refresh_interval`
    pub fn start(&self, refresh_interval: Duration, quiet: bool) {
        let target = if quiet {
            ProgressDrawTarget::hidden()
        } else {
            ProgressDrawTarget::stderr()
        };
        let mut renderer = Renderer::new(target, self.inner.queue_size);
        let state = Arc::clone(&self.inner);
        let (shutdown, mut stopped) = oneshot::channel();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(refresh_interval.max(Duration::from_millis(10)));
            loop {
                tokio::select! {
                    _ = ticker.tick() => renderer.refresh(&state),
                    _ = &mut stopped => {
                        renderer.refresh(&state);
                        renderer.finish(&state);
                        break;
                    }
                }
            }
        });

        let mut handle = self.lock_renderer();
        if let Some(previous) = handle.replace(RenderHandle { shutdown, task }) {
            previous.task.abort();
        }
    }

    /// Draw a final frame and stop rendering
    pub async fn stop(&self) {
        let handle = self.lock_renderer().take();
        if let Some(handle) = handle {
            let _ = handle.shutdown.send(());
            if let Err(e) = handle.task.await {
                debug!("Progress renderer ended abnormally: {}", e);
            }
        }
    }

    fn lock_renderer(&self) -> MutexGuard<'_, Option<RenderHandle>> {
        self.renderer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl PoolState {
    fn lock_slots(&self) -> MutexGuard<'_, Vec<Option<Indicator>>> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_messages(&self) -> MutexGuard<'_, Vec<(String, String)>> {
        self.messages.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// indicatif view of a pool
struct Renderer {
    multi: MultiProgress,
    aggregate: Option<ProgressBar>,
    bars: Vec<Option<(u64, ProgressBar)>>,
}

impl Renderer {
    fn new(target: ProgressDrawTarget, queue_size: usize) -> Self {
        Self {
            multi: MultiProgress::with_draw_target(target),
            aggregate: None,
            bars: (0..queue_size).map(|_| None).collect(),
        }
    }

    fn refresh(&mut self, state: &PoolState) {
        if let Some(indicator) = &state.aggregate {
            let bar = self.aggregate.get_or_insert_with(|| {
                let bar = self.multi.insert(0, ProgressBar::new(indicator.total()));
                bar.set_style(aggregate_style());
                bar
            });
            let done = indicator.current();
            bar.set_length(indicator.total());
            bar.set_position(done);
            bar.set_message(format!("{}/{} files or folders", done, indicator.total()));
        }

        let slots = state.lock_slots().clone();
        for (index, slot) in slots.into_iter().enumerate() {
            let shown = self.bars[index].as_ref().map(|(id, _)| *id);
            match slot {
                Some(indicator) => {
                    if shown != Some(indicator.id()) {
                        if let Some((_, old)) = self.bars[index].take() {
                            self.multi.remove(&old);
                        }
                        let bar = self.multi.add(ProgressBar::new(indicator.total()));
                        bar.set_style(file_style());
                        self.bars[index] = Some((indicator.id(), bar));
                    }
                    if let Some((_, bar)) = &self.bars[index] {
                        bar.set_length(indicator.total());
                        bar.set_position(indicator.current());
                        bar.set_message(describe(&indicator));
                    }
                }
                None => {
                    if let Some((_, old)) = self.bars[index].take() {
                        self.multi.remove(&old);
                    }
                }
            }
        }
    }

    fn finish(&mut self, state: &PoolState) {
        for (_, bar) in self.bars.iter_mut().filter_map(Option::take) {
            self.multi.remove(&bar);
        }
        if let Some(bar) = self.aggregate.take() {
            let done = state.aggregate.as_ref().map_or(0, Indicator::current);
            bar.finish_with_message(format!("{} files or folders", done));
        }
        for (label, message) in state.lock_messages().iter() {
            let _ = self.multi.println(format!("{}: {}", label, message));
        }
    }
}

fn describe(indicator: &Indicator) -> String {
    match indicator.message() {
        Some(message) => format!("{} ({})", indicator.label(), message),
        None => indicator.label().to_string(),
    }
}

fn aggregate_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.green/blue}] {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-")
}

fn file_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("  [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta}) {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-")
}

/// Format bytes in human-readable format
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.2} {}", size, UNITS[unit_index])
    }
}
