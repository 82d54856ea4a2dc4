use std::path::PathBuf;
use std::time::Duration;

use fnemu_core::model::RESOURCE_TYPE;
use fnemu_core::{
    CallResult, ConfigError, ErrorKind, FunctionDescriptor, FunctionName, StructuredError, Trigger,
};
use tonic::codec::ProstCodec;
use tonic::codegen::http::uri::PathAndQuery;
use tokio::sync::OnceCell;
use tonic::transport::{Channel, Endpoint};

use crate::{ClientConfig, TransportClient, TransportFuture, TransportMode};

pub mod proto;

use proto::cloud_function;

/// gRPC client for `CloudFunctionsService`.
///
/// Construction only validates the endpoint. The channel is built on the
/// first call (usually the health probe), so a client can be created outside
/// a Tokio runtime.
pub struct GrpcClient {
    target: Endpoint,
    channel: OnceCell<Channel>,
    endpoint: String,
    project_id: String,
    region: String,
}

impl GrpcClient {
    pub fn new(config: &ClientConfig) -> Result<Self, ConfigError> {
        let endpoint = config.endpoint();
        let target = Endpoint::from_shared(endpoint.clone())
            .map_err(|e| ConfigError::InvalidTransport(format!("{endpoint}: {e}")))?
            .connect_timeout(config.request_timeout)
            .timeout(config.request_timeout);
        Ok(Self {
            target,
            channel: OnceCell::new(),
            endpoint,
            project_id: config.project_id.clone(),
            region: config.region.clone(),
        })
    }

    fn qualify(&self, name: &str) -> String {
        FunctionName::format(&self.project_id, &self.region, name)
    }

    fn location(&self) -> String {
        FunctionName::location(&self.project_id, &self.region)
    }

    async fn unary<Req, Resp>(&self, path: &'static str, request: Req) -> Result<Resp, tonic::Status>
    where
        Req: prost::Message + Send + Sync + 'static,
        Resp: prost::Message + Default + Send + Sync + 'static,
    {
        // connect_lazy spawns the channel worker, so it needs the runtime.
        let channel = self
            .channel
            .get_or_init(|| async { self.target.connect_lazy() })
            .await
            .clone();
        let mut grpc = tonic::client::Grpc::new(channel);
        grpc.ready().await.map_err(|e| {
            tonic::Status::unavailable(format!("emulator at {} not ready: {e}", self.endpoint))
        })?;
        let codec: ProstCodec<Req, Resp> = ProstCodec::default();
        let response = grpc
            .unary(tonic::Request::new(request), PathAndQuery::from_static(path), codec)
            .await?;
        Ok(response.into_inner())
    }
}

fn from_status(status: tonic::Status) -> StructuredError {
    let kind = ErrorKind::from_grpc_code(status.code() as i32);
    let message = if status.message().is_empty() {
        format!("emulator returned {:?}", status.code())
    } else {
        status.message().to_string()
    };
    StructuredError::new(kind, message)
}

fn from_status_for(status: tonic::Status, name: &str) -> StructuredError {
    let err = from_status(status);
    match err.kind() {
        ErrorKind::NotFound | ErrorKind::Conflict => err.with_resource_info(RESOURCE_TYPE, name),
        _ => err,
    }
}

fn check_operation(operation: proto::Operation) -> Result<(), StructuredError> {
    match operation.error {
        Some(error) if error.code != 0 => Err(StructuredError::new(
            ErrorKind::from_grpc_code(error.code),
            error.message,
        )),
        _ => Ok(()),
    }
}

impl TransportClient for GrpcClient {
    fn mode(&self) -> TransportMode {
        TransportMode::Grpc
    }

    fn test_connection(&self) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            let request = proto::ListFunctionsRequest {
                location: self.location(),
                page_size: 1,
                page_token: String::new(),
            };
            self.unary::<_, proto::ListFunctionsResponse>(proto::LIST_FUNCTIONS, request)
                .await
                .map_err(from_status)?;
            Ok(())
        })
    }

    fn list_functions(&self) -> TransportFuture<'_, Vec<FunctionDescriptor>> {
        Box::pin(async move {
            let mut functions = Vec::new();
            let mut page_token = String::new();

            loop {
                let request = proto::ListFunctionsRequest {
                    location: self.location(),
                    page_size: 0,
                    page_token: page_token.clone(),
                };
                let page: proto::ListFunctionsResponse = self
                    .unary(proto::LIST_FUNCTIONS, request)
                    .await
                    .map_err(from_status)?;

                functions.extend(page.functions.into_iter().map(FunctionDescriptor::from));
                if page.next_page_token.is_empty() {
                    break;
                }
                page_token = page.next_page_token;
            }

            tracing::debug!(count = functions.len(), "Listed functions");
            Ok(functions)
        })
    }

    fn get_function<'a>(&'a self, name: &'a str) -> TransportFuture<'a, FunctionDescriptor> {
        Box::pin(async move {
            let qualified = self.qualify(name);
            let request = proto::GetFunctionRequest {
                name: qualified.clone(),
            };
            let function: proto::CloudFunction = self
                .unary(proto::GET_FUNCTION, request)
                .await
                .map_err(|s| from_status_for(s, &qualified))?;
            Ok(function.into())
        })
    }

    fn create_function<'a>(
        &'a self,
        function: &'a FunctionDescriptor,
    ) -> TransportFuture<'a, ()> {
        Box::pin(async move {
            function.validate_for_create()?;

            let request = proto::CreateFunctionRequest {
                location: self.location(),
                function: Some(function.into()),
            };
            let operation: proto::Operation = self
                .unary(proto::CREATE_FUNCTION, request)
                .await
                .map_err(|s| from_status_for(s, &function.name))?;
            check_operation(operation)?;

            tracing::info!(function = %function.name, "Function created");
            Ok(())
        })
    }

    fn delete_function<'a>(&'a self, name: &'a str) -> TransportFuture<'a, ()> {
        Box::pin(async move {
            let qualified = self.qualify(name);
            let request = proto::DeleteFunctionRequest {
                name: qualified.clone(),
            };
            let operation: proto::Operation = self
                .unary(proto::DELETE_FUNCTION, request)
                .await
                .map_err(|s| from_status_for(s, &qualified))?;
            check_operation(operation)?;

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
            let qualified = self.qualify(name);
            let request = proto::CallFunctionRequest {
                name: qualified.clone(),
                data: data.to_string(),
            };
            let response: proto::CallFunctionResponse = self
                .unary(proto::CALL_FUNCTION, request)
                .await
                .map_err(|s| from_status_for(s, &qualified))?;
            Ok(CallResult {
                execution_id: response.execution_id,
                result: non_empty(response.result),
                error: non_empty(response.error),
            })
        })
    }
}

fn non_empty(s: String) -> Option<String> {
    (!s.is_empty()).then_some(s)
}

impl From<&FunctionDescriptor> for proto::CloudFunction {
    fn from(function: &FunctionDescriptor) -> Self {
        let trigger = function.trigger.as_ref().map(|t| match t {
            Trigger::Http { url } => cloud_function::Trigger::HttpsTrigger(proto::HttpsTrigger {
                url: url.clone().unwrap_or_default(),
            }),
            Trigger::Topic(topic) => cloud_function::Trigger::PubsubTrigger(topic.clone()),
            Trigger::Bucket(bucket) => cloud_function::Trigger::GcsTrigger(bucket.clone()),
        });
        proto::CloudFunction {
            name: function.name.clone(),
            timeout: function.timeout.map(|d| prost_types::Duration {
                seconds: d.as_secs() as i64,
                nanos: d.subsec_nanos() as i32,
            }),
            service_account: function
                .local_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            source_archive_url: function.source_archive_url.clone().unwrap_or_default(),
            trigger,
        }
    }
}

impl From<proto::CloudFunction> for FunctionDescriptor {
    fn from(function: proto::CloudFunction) -> Self {
        let trigger = function.trigger.map(|t| match t {
            cloud_function::Trigger::HttpsTrigger(https) => Trigger::Http {
                url: non_empty(https.url),
            },
            cloud_function::Trigger::PubsubTrigger(topic) => Trigger::Topic(topic),
            cloud_function::Trigger::GcsTrigger(bucket) => Trigger::Bucket(bucket),
        });
        let timeout = function
            .timeout
            .filter(|d| d.seconds >= 0 && d.nanos >= 0)
            .map(|d| Duration::new(d.seconds as u64, d.nanos as u32));
        FunctionDescriptor {
            name: function.name,
            trigger,
            source_archive_url: non_empty(function.source_archive_url),
            timeout,
            local_path: non_empty(function.service_account).map(PathBuf::from),
        }
    }
}
