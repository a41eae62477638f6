//! The interceptor builder (C5): a small framework producing per-request
//! `InterceptionHandler`s from a chain of setup steps, plus the
//! `malwareBlocked` event each block decision emits.

use rama_http::HeaderMap;
use rama_http::StatusCode;
use std::sync::Arc;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;
use tokio::sync::broadcast;

/// `{statusCode, message}` — the literal synthetic response for a blocked
/// request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockResponse {
    pub status_code: StatusCode,
    pub message: String,
}

/// `malwareBlocked` payload: `{packageName, version, targetUrl, timestampMillis}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalwareBlockedEvent {
    pub package_name: String,
    pub version: String,
    pub target_url: String,
    pub timestamp_millis: u128,
}

type HeaderModifier = Arc<dyn Fn(&mut HeaderMap) + Send + Sync>;
type BodyModifier = Arc<dyn Fn(Vec<u8>, &mut HeaderMap) -> Vec<u8> + Send + Sync>;

/// Mutable per-request builder. Setup steps append header/body modifiers in
/// registration order and may flag the request as blocked.
pub struct InterceptionContext {
    target_url: String,
    block_response: Option<BlockResponse>,
    header_modifiers: Vec<HeaderModifier>,
    body_modifiers: Vec<BodyModifier>,
    pending_block_event: Option<MalwareBlockedEvent>,
}

impl InterceptionContext {
    fn new(target_url: impl Into<String>) -> Self {
        Self {
            target_url: target_url.into(),
            block_response: None,
            header_modifiers: Vec::new(),
            body_modifiers: Vec::new(),
            pending_block_event: None,
        }
    }

    pub fn target_url(&self) -> &str {
        &self.target_url
    }

    /// Flags the request as blocked with the literal 403 wire contract and
    /// queues the `malwareBlocked` event for the interceptor to emit once
    /// this context is built.
    pub fn block_malware(&mut self, package_name: &str, version: &str) {
        self.block_response = Some(BlockResponse {
            status_code: StatusCode::FORBIDDEN,
            message: crate::responses::BLOCKED_BY_SAFE_CHAIN.to_string(),
        });
        let timestamp_millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        self.pending_block_event = Some(MalwareBlockedEvent {
            package_name: package_name.to_string(),
            version: version.to_string(),
            target_url: self.target_url.clone(),
            timestamp_millis,
        });
    }

    pub fn modify_request_headers<F>(&mut self, f: F)
    where
        F: Fn(&mut HeaderMap) + Send + Sync + 'static,
    {
        self.header_modifiers.push(Arc::new(f));
    }

    pub fn modify_body<F>(&mut self, f: F)
    where
        F: Fn(Vec<u8>, &mut HeaderMap) -> Vec<u8> + Send + Sync + 'static,
    {
        self.body_modifiers.push(Arc::new(f));
    }

    fn build(self) -> (InterceptionHandler, Option<MalwareBlockedEvent>) {
        (
            InterceptionHandler {
                block_response: self.block_response,
                malware_blocked: self.pending_block_event.clone(),
                header_modifiers: self.header_modifiers,
                body_modifiers: self.body_modifiers,
            },
            self.pending_block_event,
        )
    }
}

/// Immutable result of running the setup chain for one request.
pub struct InterceptionHandler {
    pub block_response: Option<BlockResponse>,
    /// Set iff `block_response` is, carrying the same `(name, version)` the
    /// setup chain already resolved — callers record bookkeeping off this
    /// rather than re-parsing the target URL themselves.
    pub malware_blocked: Option<MalwareBlockedEvent>,
    header_modifiers: Vec<HeaderModifier>,
    body_modifiers: Vec<BodyModifier>,
}

impl InterceptionHandler {
    pub fn modify_request_headers(&self, headers: &mut HeaderMap) {
        for modifier in &self.header_modifiers {
            modifier(headers);
        }
    }

    pub fn modifies_response(&self) -> bool {
        !self.body_modifiers.is_empty()
    }

    pub fn modify_body(&self, mut body: Vec<u8>, headers: &mut HeaderMap) -> Vec<u8> {
        for modifier in &self.body_modifiers {
            body = modifier(body, headers);
        }
        body
    }
}

type SetupStep = Arc<dyn Fn(&mut InterceptionContext) + Send + Sync>;

/// A stateless, shareable per-ecosystem interceptor. `handle_request` is the
/// only thing callers need: build a context, run the setup chain, emit the
/// block event if one was raised, return the immutable handler.
#[derive(Clone)]
pub struct Interceptor {
    setups: Arc<Vec<SetupStep>>,
    events: broadcast::Sender<MalwareBlockedEvent>,
}

impl Interceptor {
    pub fn handle_request(&self, target_url: &str) -> InterceptionHandler {
        let mut ctx = InterceptionContext::new(target_url);
        for setup in self.setups.iter() {
            setup(&mut ctx);
        }
        let (handler, event) = ctx.build();
        if let Some(event) = event {
            // No subscribers is not an error: the controller always holds a
            // receiver, but tests may build an interceptor standalone.
            let _ = self.events.send(event);
        }
        handler
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MalwareBlockedEvent> {
        self.events.subscribe()
    }
}

/// Builds an [`Interceptor`] from an ordered chain of setup steps, each of
/// which may call `block_malware`, `modify_request_headers`, or
/// `modify_body` on the context it's given.
pub fn intercept_requests<F>(setups: Vec<F>) -> Interceptor
where
    F: Fn(&mut InterceptionContext) + Send + Sync + 'static,
{
    let (events, _rx) = broadcast::channel(256);
    Interceptor {
        setups: Arc::new(setups.into_iter().map(|f| Arc::new(f) as SetupStep).collect()),
        events,
    }
}
