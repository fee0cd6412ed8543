use std::fmt;
use std::sync::Arc;

use futures::FutureExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::executor::{self, PreparedCall, Reply};
use crate::history::PendingEntry;
use crate::retry::{self, RetryPolicy};
use crate::{ApiError, ClientContext, ClientOptions, Result};

const IDEMPOTENCY_KEY: &str = "idempotency-key";

/// Per-call options for [`ApiClient::request`].
#[derive(Clone, Debug, Default)]
pub struct RequestOptions {
    /// Defaults to `GET`.
    pub method: Method,
    /// Merged over the defaults (`Content-Type`, `Authorization`).
    pub headers: HeaderMap,
    /// JSON payload, for writes.
    pub body: Option<JsonValue>,
    /// Abandons the call when cancelled.
    pub cancel: Option<CancellationToken>,
}

impl RequestOptions {
    pub fn new(method: Method) -> Self {
        Self {
            method,
            ..Self::default()
        }
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_body(mut self, body: JsonValue) -> Self {
        self.body = Some(body);
        self
    }

    /// Serializes `body` as the JSON payload.
    pub fn with_json<B: Serialize + ?Sized>(self, body: &B) -> Result<Self> {
        Ok(self.with_body(encode_body(body)?))
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Base service for every domain API client.
///
/// Reads (`GET`, `HEAD`) of the same URL issued close together share one
/// execution. Writes are counted as inflight until they settle. Every call
/// is retried on transport failures, 5xx and 429, and is logged to the
/// context's history.
#[derive(Clone)]
pub struct ApiClient {
    ctx: Arc<ClientContext>,
}

impl fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiClient").field("ctx", &self.ctx).finish()
    }
}

impl ApiClient {
    pub fn new(ctx: Arc<ClientContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &Arc<ClientContext> {
        &self.ctx
    }

    /// Fetches `path` and decodes the result.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        decode_reply(self.request(path, RequestOptions::default()).await?)
    }

    /// Sends `body` with `POST` and decodes the result.
    pub async fn post<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let options = RequestOptions::new(Method::POST).with_json(body)?;
        decode_reply(self.request(path, options).await?)
    }

    /// Sends `body` with `PUT` and decodes the result.
    pub async fn put<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let options = RequestOptions::new(Method::PUT).with_json(body)?;
        decode_reply(self.request(path, options).await?)
    }

    /// Deletes `path`. Use `()` as `T` for endpoints answering 204.
    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        decode_reply(self.request(path, RequestOptions::new(Method::DELETE)).await?)
    }

    /// Performs one logical call and returns the JSON result (`Null` for 204).
    pub async fn request(&self, path: &str, options: RequestOptions) -> Result<JsonValue> {
        let config = self.ctx.options();
        let RequestOptions {
            method,
            mut headers,
            body,
            cancel,
        } = options;
        let read = is_read(&method);

        let inflight = (!read).then(|| self.ctx.inflight.begin());
        let mut entry = self.ctx.history.start(&method, path, body.as_ref());

        let url = match config.base_url.resolve().await {
            Ok(base) => format!("{base}{path}"),
            Err(err) => {
                entry.finish(&Err(err.clone()));
                return Err(err);
            }
        };
        entry.set_url(&url);

        if !read && config.idempotency_keys {
            if let Ok(key) = HeaderValue::from_str(&Uuid::new_v4().to_string()) {
                headers
                    .entry(HeaderName::from_static(IDEMPOTENCY_KEY))
                    .or_insert(key);
            }
        }

        let call = PreparedCall {
            http: self.ctx.http_client(&config),
            method,
            url,
            headers,
            body,
            timeout: config.timeout(),
        };
        let policy = RetryPolicy::from(config.as_ref());

        let outcome = if read {
            self.shared_read(call, policy, cancel.as_ref(), &mut entry, &config)
                .await
        } else {
            let tokens = self.ctx.token_store().as_ref();
            let signals = self.ctx.signal_bus().as_ref();
            let call = &call;
            retry::run(policy, cancel.as_ref(), move || {
                executor::execute(tokens, signals, call)
            })
            .await
        };

        entry.finish(&outcome);
        drop(inflight);
        outcome.map(|reply| reply.body)
    }

    /// Checks that the API answers `path` with a 2xx within the probe bound.
    ///
    /// The probe is unauthenticated, never retried and not recorded.
    pub async fn probe(&self, path: &str) -> Result<()> {
        let config = self.ctx.options();
        let url = format!("{}{path}", config.base_url.resolve().await?);
        let bound = config.probe_timeout();

        let send = self.ctx.http_client(&config).get(&url).send();
        let response = tokio::time::timeout(bound, send)
            .await
            .map_err(|_| ApiError::Timeout(bound))?
            .map_err(ApiError::network)?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(ApiError::Http {
                status: status.as_u16(),
                message: format!("HTTP {}", status.as_u16()),
                body: None,
            })
        }
    }

    async fn shared_read(
        &self,
        call: PreparedCall,
        policy: RetryPolicy,
        cancel: Option<&CancellationToken>,
        entry: &mut PendingEntry,
        config: &ClientOptions,
    ) -> Result<Reply> {
        let key = call.url.clone();
        let ctx = Arc::clone(&self.ctx);
        let (shared, joined) = self.ctx.reads.join(&key, config.dedup_window(), move || {
            async move {
                let tokens = ctx.token_store().as_ref();
                let signals = ctx.signal_bus().as_ref();
                let call = &call;
                retry::run(policy, None, move || executor::execute(tokens, signals, call)).await
            }
            .boxed()
        });
        if joined {
            entry.mark_deduplicated();
        }

        // Cancelling stops this caller's wait; other waiters keep the call.
        match cancel {
            Some(token) => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => Err(ApiError::Cancelled),
                    outcome = shared => outcome,
                }
            }
            None => shared.await,
        }
    }
}

fn is_read(method: &Method) -> bool {
    *method == Method::GET || *method == Method::HEAD
}

fn encode_body<B: Serialize + ?Sized>(body: &B) -> Result<JsonValue> {
    serde_json::to_value(body)
        .map_err(|err| ApiError::Encode(err.to_string()))
}

fn decode_reply<T: DeserializeOwned>(value: JsonValue) -> Result<T> {
    serde_json::from_value(value)
        .map_err(|err| ApiError::Decode(format!("unexpected response shape: {err}")))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use reqwest::Method;
    use serde::Deserialize;
    use serde_json::json;

    use super::{decode_reply, is_read, ApiClient, RequestOptions};
    use crate::{ApiError, ClientContext, ClientOptions, MemoryTokenStore};

    #[derive(Debug, Deserialize, PartialEq)]
    struct Device {
        serial: String,
    }

    #[test]
    fn only_get_and_head_are_reads() {
        assert!(is_read(&Method::GET));
        assert!(is_read(&Method::HEAD));
        for method in [Method::POST, Method::PUT, Method::PATCH, Method::DELETE] {
            assert!(!is_read(&method), "{method}");
        }
    }

    #[test]
    fn request_options_default_to_get_without_body() {
        let options = RequestOptions::default();
        assert_eq!(options.method, Method::GET);
        assert!(options.body.is_none());
        assert!(options.cancel.is_none());
    }

    #[test]
    fn decode_reply_maps_shape_errors() {
        let device: Device = decode_reply(json!({ "serial": "FTX123" })).expect("must decode");
        assert_eq!(device.serial, "FTX123");
        decode_reply::<()>(serde_json::Value::Null).expect("null decodes to unit");
        assert!(matches!(
            decode_reply::<Device>(json!([1, 2])),
            Err(ApiError::Decode(_))
        ));
    }

    #[test]
    fn unserializable_body_is_an_encode_error() {
        let mut body = BTreeMap::new();
        body.insert((1, 2), "port");

        let err = RequestOptions::new(Method::POST)
            .with_json(&body)
            .expect_err("tuple keys cannot become JSON object keys");

        assert!(matches!(err, ApiError::Encode(_)));
        assert!(err.message().starts_with("encode error: "));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn unresolvable_base_url_is_logged_once() {
        struct Broken;

        #[async_trait::async_trait]
        impl crate::BaseUrlResolver for Broken {
            async fn resolve(&self) -> crate::Result<String> {
                Err(ApiError::Config("no controller selected".to_owned()))
            }
        }

        let ctx = ClientContext::new(
            ClientOptions::default().with_resolver(Arc::new(Broken)),
            Arc::new(MemoryTokenStore::new()),
        );
        let client = ApiClient::new(Arc::clone(&ctx));

        let err = client
            .post::<_, serde_json::Value>("/jobs", &json!({ "template": 4 }))
            .await
            .expect_err("resolution must fail");

        assert!(matches!(err, ApiError::Config(_)));
        assert_eq!(ctx.inflight_count(), 0);
        let history = ctx.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].url, "/jobs");
        assert_eq!(
            history[0].error.as_deref(),
            Some("configuration error: no controller selected")
        );
    }
}
