//! Rate-limiting middleware with a pluggable counter store.
//!
//! Requests are bucketed by a configurable key (default: remote IP). The
//! store counts hits per key within a window; when the count exceeds the
//! configured maximum the request is rejected with `429 Too Many Requests`
//! and a `Retry-After` header. `X-RateLimit-*` headers are emitted according
//! to policy.
//!
//! The bundled [`MemoryStore`] keeps counters in a mutex-protected map and
//! runs a background janitor that evicts expired entries; its `close()` is
//! registered with the process closer registry so janitors die with the
//! process even for per-route limiters.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::context::Context;
use crate::error::HttpError;
use crate::http::StatusCode;
use crate::middleware::{Message, Middleware, MiddlewareFuture, Next};

/// Counter storage behind the rate limiter.
///
/// Implementations may be backed by process memory, Redis, or anything that
/// can count atomically per key.
#[async_trait]
pub trait LimiterStore: Send + Sync {
    /// Records a hit for `key` within `window`. Returns the hit count inside
    /// the current window (including this hit) and the time the window resets.
    async fn increment(&self, key: &str, window: Duration) -> (u64, SystemTime);

    /// Releases background resources. Must be idempotent.
    fn close(&self);
}

#[derive(Debug)]
struct Counter {
    count: u64,
    window_start: SystemTime,
    window: Duration,
}

/// In-memory fixed-window counter store with a background janitor.
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, Counter>>>,
    janitor: CancellationToken,
}

impl MemoryStore {
    /// Default janitor sweep interval.
    pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

    /// Creates the store and, when called inside a tokio runtime, spawns the
    /// janitor that evicts expired entries every `cleanup_interval`.
    pub fn new(cleanup_interval: Duration) -> Self {
        let entries: Arc<Mutex<HashMap<String, Counter>>> = Arc::new(Mutex::new(HashMap::new()));
        let janitor = CancellationToken::new();

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let entries = entries.clone();
            let token = janitor.clone();
            handle.spawn(async move {
                let mut interval = tokio::time::interval(cleanup_interval);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = interval.tick() => {
                            let now = SystemTime::now();
                            entries.lock().retain(|_, counter| {
                                now.duration_since(counter.window_start)
                                    .is_ok_and(|age| age < counter.window)
                            });
                        }
                    }
                }
            });
        }

        Self { entries, janitor }
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CLEANUP_INTERVAL)
    }
}

#[async_trait]
impl LimiterStore for MemoryStore {
    async fn increment(&self, key: &str, window: Duration) -> (u64, SystemTime) {
        let now = SystemTime::now();
        let mut entries = self.entries.lock();
        let counter = entries.entry(key.to_owned()).or_insert(Counter {
            count: 0,
            window_start: now,
            window,
        });

        let expired = now
            .duration_since(counter.window_start)
            .is_ok_and(|age| age >= window);
        if expired {
            counter.count = 0;
            counter.window_start = now;
        }
        counter.window = window;
        counter.count += 1;

        (counter.count, counter.window_start + window)
    }

    fn close(&self) {
        self.janitor.cancel();
    }
}

impl Drop for MemoryStore {
    fn drop(&mut self) {
        self.janitor.cancel();
    }
}

/// When to emit the `X-RateLimit-*` headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendHeaders {
    Always,
    OnLimit,
    Never,
}

/// How the `Retry-After` header is rendered on a 429.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAfterMode {
    Seconds,
    HttpDate,
}

type KeyGenerator = Arc<dyn Fn(&Context) -> String + Send + Sync>;
type SkipPredicate = Arc<dyn Fn(&Context) -> bool + Send + Sync>;

/// Rate-limiting middleware. See the [module docs](self).
///
/// # Examples
///
/// ```rust,no_run
/// use std::time::Duration;
/// use trellis::middleware::RateLimit;
///
/// let limiter = RateLimit::new(100, Duration::from_secs(60));
/// ```
pub struct RateLimit {
    max_requests: u64,
    window: Duration,
    store: Arc<dyn LimiterStore>,
    key_generator: KeyGenerator,
    skip: Option<SkipPredicate>,
    message: Message,
    send_headers: SendHeaders,
    retry_after: RetryAfterMode,
}

impl RateLimit {
    /// Creates a limiter allowing `max_requests` per `window`, keyed by
    /// remote IP and backed by a fresh [`MemoryStore`] whose `close()` is
    /// registered with the closer registry.
    pub fn new(max_requests: u64, window: Duration) -> Self {
        let store = Arc::new(MemoryStore::default());
        let closer_store = store.clone();
        crate::lifecycle::register_closer("rate-limit-memory-store", move || {
            closer_store.close();
            Ok(())
        });

        Self {
            max_requests,
            window,
            store,
            key_generator: Arc::new(|ctx| {
                ctx.remote_addr()
                    .map(|addr| addr.ip().to_string())
                    .unwrap_or_else(|| "unknown".to_owned())
            }),
            skip: None,
            message: Message::from("Too Many Requests"),
            send_headers: SendHeaders::Always,
            retry_after: RetryAfterMode::Seconds,
        }
    }

    /// Replaces the counter store (e.g. with a shared external store).
    #[must_use]
    pub fn store(mut self, store: Arc<dyn LimiterStore>) -> Self {
        self.store = store;
        self
    }

    /// Replaces the key generator.
    #[must_use]
    pub fn key_generator(
        mut self,
        generator: impl Fn(&Context) -> String + Send + Sync + 'static,
    ) -> Self {
        self.key_generator = Arc::new(generator);
        self
    }

    /// Requests matching the predicate bypass the limiter entirely.
    #[must_use]
    pub fn skip(mut self, predicate: impl Fn(&Context) -> bool + Send + Sync + 'static) -> Self {
        self.skip = Some(Arc::new(predicate));
        self
    }

    /// Overrides the 429 message, either a string or [`Message::from_fn`].
    #[must_use]
    pub fn message(mut self, message: impl Into<Message>) -> Self {
        self.message = message.into();
        self
    }

    /// Controls when the `X-RateLimit-*` headers are emitted.
    #[must_use]
    pub fn send_headers(mut self, policy: SendHeaders) -> Self {
        self.send_headers = policy;
        self
    }

    /// Controls the `Retry-After` rendering.
    #[must_use]
    pub fn retry_after_mode(mut self, mode: RetryAfterMode) -> Self {
        self.retry_after = mode;
        self
    }
}

fn unix_seconds(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

fn http_date(time: SystemTime) -> String {
    chrono::DateTime::<chrono::Utc>::from(time)
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}

impl Middleware for RateLimit {
    fn handle(&self, ctx: Context, next: Next) -> MiddlewareFuture {
        let max_requests = self.max_requests;
        let window = self.window;
        let store = self.store.clone();
        let key_generator = self.key_generator.clone();
        let skip = self.skip.clone();
        let message = self.message.clone();
        let send_headers = self.send_headers;
        let retry_after = self.retry_after;

        Box::pin(async move {
            if skip.as_ref().is_some_and(|predicate| predicate(&ctx)) {
                return next.run(ctx).await;
            }

            let key = key_generator(&ctx);
            let (count, reset_at) = store.increment(&key, window).await;
            let limited = count > max_requests;

            let emit = matches!(send_headers, SendHeaders::Always)
                || (matches!(send_headers, SendHeaders::OnLimit) && limited);
            if emit {
                ctx.set_header("X-RateLimit-Limit", max_requests.to_string());
                ctx.set_header(
                    "X-RateLimit-Remaining",
                    max_requests.saturating_sub(count).to_string(),
                );
                ctx.set_header("X-RateLimit-Reset", unix_seconds(reset_at).to_string());
            }

            if limited {
                let retry_value = match retry_after {
                    RetryAfterMode::Seconds => {
                        let secs = reset_at
                            .duration_since(SystemTime::now())
                            .map(|d| d.as_secs())
                            .unwrap_or(0)
                            .max(1);
                        secs.to_string()
                    }
                    RetryAfterMode::HttpDate => http_date(reset_at),
                };
                ctx.set_header("Retry-After", retry_value);
                let body = message.resolve(&ctx);
                return Err(HttpError::new(StatusCode::TooManyRequests).with_message(body));
            }

            next.run(ctx).await
        })
    }
}
