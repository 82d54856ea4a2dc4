use std::path::PathBuf;
use std::time::Duration;

use fnemu_core::model::RESOURCE_TYPE;
use fnemu_core::{
    CallResult, ConfigError, ErrorKind, FunctionDescriptor, FunctionName, StructuredError, Trigger,
};
use serde::{Deserialize, Serialize};

use crate::{ClientConfig, TransportClient, TransportFuture, TransportMode};

const API_VERSION: &str = "v1beta2";

/// JSON-over-HTTP client for the emulator's REST surface.
pub struct RestClient {
    http: reqwest::Client,
    base_url: String,
    project_id: String,
    region: String,
}

impl RestClient {
    pub fn new(config: &ClientConfig) -> Result<Self, ConfigError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ConfigError::InvalidTransport(e.to_string()))?;
        Ok(Self {
            http,
            base_url: config.endpoint(),
            project_id: config.project_id.clone(),
            region: config.region.clone(),
        })
    }

    fn qualify(&self, name: &str) -> String {
        FunctionName::format(&self.project_id, &self.region, name)
    }

    fn functions_url(&self) -> String {
        format!(
            "{}/{API_VERSION}/{}/functions",
            self.base_url,
            FunctionName::location(&self.project_id, &self.region)
        )
    }

    fn function_url(&self, name: &str) -> String {
        format!("{}/{API_VERSION}/{}", self.base_url, self.qualify(name))
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        what: &str,
    ) -> Result<reqwest::Response, StructuredError> {
        let resp = request.send().await.map_err(|e| {
            StructuredError::internal(format!(
                "Failed to reach emulator at {} ({what}): {e}",
                self.base_url
            ))
        })?;

        if resp.status().is_success() {
            Ok(resp)
        } else {
            Err(error_from_response(resp, what).await)
        }
    }
}

impl TransportClient for RestClient {
    fn mode(&self) -> TransportMode {
        TransportMode::Rest
    }

    fn test_connection(&self) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            let url = format!("{}/$discovery/rest", self.base_url);
            let request = self.http.get(&url).query(&[("version", API_VERSION)]);
            self.send(request, "discovery").await?;
            Ok(())
        })
    }

    fn list_functions(&self) -> TransportFuture<'_, Vec<FunctionDescriptor>> {
        Box::pin(async move {
            let mut functions = Vec::new();
            let mut page_token: Option<String> = None;

            loop {
                let mut request = self.http.get(self.functions_url());
                if let Some(token) = &page_token {
                    request = request.query(&[("pageToken", token)]);
                }
                let resp = self.send(request, "list functions").await?;
                let page: WireListResponse = decode(resp).await?;

                functions.extend(page.functions.into_iter().map(FunctionDescriptor::from));
                match page.next_page_token {
                    Some(token) if !token.is_empty() => page_token = Some(token),
                    _ => break,
                }
            }

            tracing::debug!(count = functions.len(), "Listed functions");
            Ok(functions)
        })
    }

    fn get_function<'a>(&'a self, name: &'a str) -> TransportFuture<'a, FunctionDescriptor> {
        Box::pin(async move {
            let request = self.http.get(self.function_url(name));
            let resp = self
                .send(request, "get function")
                .await
                .map_err(|e| with_resource(e, &self.qualify(name)))?;
            let wire: WireFunction = decode(resp).await?;
            Ok(wire.into())
        })
    }

    fn create_function<'a>(
        &'a self,
        function: &'a FunctionDescriptor,
    ) -> TransportFuture<'a, ()> {
        Box::pin(async move {
            function.validate_for_create()?;

            let body = WireFunction::from(function);
            let request = self.http.post(self.functions_url()).json(&body);
            let resp = self
                .send(request, "create function")
                .await
                .map_err(|e| with_resource(e, &function.name))?;

            // The emulator answers with a long-running operation, possibly empty.
            let body = resp.text().await.unwrap_or_default();
            let operation: WireOperation = if body.trim().is_empty() {
                WireOperation::default()
            } else {
                serde_json::from_str(&body).map_err(|e| {
                    StructuredError::internal(format!("Failed to decode create operation: {e}"))
                })?
            };
            if let Some(error) = operation.error {
                return Err(StructuredError::new(
                    ErrorKind::from_grpc_code(error.code),
                    error.message,
                ));
            }
            tracing::info!(function = %function.name, "Function created");
            Ok(())
        })
    }

    fn delete_function<'a>(&'a self, name: &'a str) -> TransportFuture<'a, ()> {
        Box::pin(async move {
            let request = self.http.delete(self.function_url(name));
            self.send(request, "delete function")
                .await
                .map_err(|e| with_resource(e, &self.qualify(name)))?;
            tracing::info!(function = %name, "Function deleted");
            Ok(())
        })
    }

    fn call_function<'a>(
        &'a self,
        name: &'a str,
        data: &'a serde_json::Value,
    ) -> TransportFuture<'a, CallResult> {
        Box::pin(async move {
            let url = format!("{}:call", self.function_url(name));
            let body = serde_json::json!({ "data": data });
            let request = self.http.post(&url).json(&body);
            let resp = self
                .send(request, "call function")
                .await
                .map_err(|e| with_resource(e, &self.qualify(name)))?;
            let wire: WireCallResponse = decode(resp).await?;
            Ok(CallResult {
                execution_id: wire.execution_id,
                result: wire.result,
                error: wire.error,
            })
        })
    }
}

async fn decode<T: serde::de::DeserializeOwned>(
    resp: reqwest::Response,
) -> Result<T, StructuredError> {
    resp.json()
        .await
        .map_err(|e| StructuredError::internal(format!("Failed to decode emulator response: {e}")))
}

async fn error_from_response(resp: reqwest::Response, what: &str) -> StructuredError {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<WireErrorBody>(&body)
        .ok()
        .map(|b| b.error.message)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| format!("{what}: emulator returned {status}"));
    StructuredError::new(ErrorKind::from_http_status(status.as_u16()), message)
}

fn with_resource(err: StructuredError, name: &str) -> StructuredError {
    match err.kind() {
        ErrorKind::NotFound | ErrorKind::Conflict => err.with_resource_info(RESOURCE_TYPE, name),
        _ => err,
    }
}

// ── Wire types ────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct WireFunction {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    source_archive_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    https_trigger: Option<WireHttpsTrigger>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pubsub_trigger: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    gcs_trigger: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timeout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    service_account: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct WireHttpsTrigger {
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct WireListResponse {
    functions: Vec<WireFunction>,
    next_page_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WireOperation {
    error: Option<WireStatus>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WireStatus {
    code: i32,
    message: String,
}

#[derive(Debug, Deserialize)]
struct WireErrorBody {
    error: WireStatus,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct WireCallResponse {
    execution_id: String,
    result: Option<String>,
    error: Option<String>,
}

impl From<&FunctionDescriptor> for WireFunction {
    fn from(function: &FunctionDescriptor) -> Self {
        let mut wire = WireFunction {
            name: function.name.clone(),
            source_archive_url: function.source_archive_url.clone(),
            timeout: function.timeout.map(format_duration),
            service_account: function
                .local_path
                .as_ref()
                .map(|p| p.display().to_string()),
            ..Default::default()
        };
        match &function.trigger {
            Some(Trigger::Http { url }) => {
                wire.https_trigger = Some(WireHttpsTrigger { url: url.clone() })
            }
            Some(Trigger::Topic(topic)) => wire.pubsub_trigger = Some(topic.clone()),
            Some(Trigger::Bucket(bucket)) => wire.gcs_trigger = Some(bucket.clone()),
            None => {}
        }
        wire
    }
}

impl From<WireFunction> for FunctionDescriptor {
    fn from(wire: WireFunction) -> Self {
        let trigger = if let Some(https) = wire.https_trigger {
            Some(Trigger::Http { url: https.url })
        } else if let Some(topic) = wire.pubsub_trigger {
            Some(Trigger::Topic(topic))
        } else {
            wire.gcs_trigger.map(Trigger::Bucket)
        };
        FunctionDescriptor {
            name: wire.name,
            trigger,
            source_archive_url: wire.source_archive_url,
            timeout: wire.timeout.as_deref().and_then(parse_duration),
            local_path: wire.service_account.map(PathBuf::from),
        }
    }
}

/// Format a duration the way the JSON mapping of `google.protobuf.Duration`
/// expects (`"60s"`, `"1.5s"`).
fn format_duration(d: Duration) -> String {
    if d.subsec_nanos() == 0 {
        format!("{}s", d.as_secs())
    } else {
        format!("{}s", d.as_secs_f64())
    }
}

fn parse_duration(s: &str) -> Option<Duration> {
    let secs: f64 = s.trim().strip_suffix('s')?.parse().ok()?;
    (secs >= 0.0).then(|| Duration::from_secs_f64(secs))
}
