//! Process-wide context free list.
//!
//! The dispatcher acquires a [`Context`] per request and releases it after
//! the response is taken. Released contexts are reset and kept for reuse so
//! steady-state request handling allocates no context state. A context the
//! application retained past the request boundary (an outstanding clone) is
//! dropped instead of re-pooled; the pool never hands out aliased state.

use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;

use super::{Context, ContextCore};
use crate::http::Request;
use crate::router::HtmlRenderer;

static POOL: Lazy<Pool> = Lazy::new(Pool::default);

#[derive(Default)]
struct Pool {
    free: Mutex<Vec<Arc<ContextCore>>>,
}

/// Takes a reset context from the free list (or allocates one) and binds it
/// to `request`.
pub(crate) fn acquire(
    request: Request,
    params: Vec<(String, String)>,
    renderer: Option<Arc<dyn HtmlRenderer>>,
) -> Context {
    let mut core = POOL
        .free
        .lock()
        .pop()
        .unwrap_or_else(|| Arc::new(ContextCore::new()));

    // Pooled cores are uniquely owned: release() only re-pools cores with no
    // outstanding clones.
    Arc::get_mut(&mut core)
        .expect("pooled context core is uniquely owned")
        .populate(request, params, renderer);

    Context { core }
}

/// Resets `ctx` and returns it to the free list.
///
/// When the application kept a clone alive, the core is dropped instead —
/// reuse would alias state across requests.
pub(crate) fn release(ctx: Context) {
    let Context { mut core } = ctx;
    if let Some(inner) = Arc::get_mut(&mut core) {
        inner.reset();
        POOL.free.lock().push(core);
    } else {
        tracing::debug!("context retained past request boundary — not re-pooling");
    }
}
