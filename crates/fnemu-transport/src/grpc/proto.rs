//! Messages of `google.cloud.functions.v1beta2.CloudFunctionsService`, limited
//! to the fields the controller reads or writes.

pub const LIST_FUNCTIONS: &str =
    "/google.cloud.functions.v1beta2.CloudFunctionsService/ListFunctions";
pub const GET_FUNCTION: &str = "/google.cloud.functions.v1beta2.CloudFunctionsService/GetFunction";
pub const CREATE_FUNCTION: &str =
    "/google.cloud.functions.v1beta2.CloudFunctionsService/CreateFunction";
pub const DELETE_FUNCTION: &str =
    "/google.cloud.functions.v1beta2.CloudFunctionsService/DeleteFunction";
pub const CALL_FUNCTION: &str =
    "/google.cloud.functions.v1beta2.CloudFunctionsService/CallFunction";

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CloudFunction {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
    #[prost(message, optional, tag = "10")]
    pub timeout: ::core::option::Option<::prost_types::Duration>,
    /// Local source directory; the emulator stores it in this field.
    #[prost(string, tag = "13")]
    pub service_account: ::prost::alloc::string::String,
    #[prost(string, tag = "14")]
    pub source_archive_url: ::prost::alloc::string::String,
    #[prost(oneof = "cloud_function::Trigger", tags = "4, 5, 6")]
    pub trigger: ::core::option::Option<cloud_function::Trigger>,
}

pub mod cloud_function {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Trigger {
        #[prost(string, tag = "4")]
        PubsubTrigger(::prost::alloc::string::String),
        #[prost(string, tag = "5")]
        GcsTrigger(::prost::alloc::string::String),
        #[prost(message, tag = "6")]
        HttpsTrigger(super::HttpsTrigger),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HttpsTrigger {
    #[prost(string, tag = "1")]
    pub url: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListFunctionsRequest {
    #[prost(string, tag = "1")]
    pub location: ::prost::alloc::string::String,
    #[prost(int32, tag = "2")]
    pub page_size: i32,
    #[prost(string, tag = "3")]
    pub page_token: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListFunctionsResponse {
    #[prost(message, repeated, tag = "1")]
    pub functions: ::prost::alloc::vec::Vec<CloudFunction>,
    #[prost(string, tag = "2")]
    pub next_page_token: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetFunctionRequest {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CreateFunctionRequest {
    #[prost(string, tag = "1")]
    pub location: ::prost::alloc::string::String,
    #[prost(message, optional, tag = "2")]
    pub function: ::core::option::Option<CloudFunction>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeleteFunctionRequest {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CallFunctionRequest {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub data: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CallFunctionResponse {
    #[prost(string, tag = "1")]
    pub execution_id: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub result: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub error: ::prost::alloc::string::String,
}

/// `google.longrunning.Operation`, without metadata and response payloads.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Operation {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
    #[prost(bool, tag = "3")]
    pub done: bool,
    #[prost(message, optional, tag = "4")]
    pub error: ::core::option::Option<OperationError>,
}

/// `google.rpc.Status` as embedded in an operation.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct OperationError {
    #[prost(int32, tag = "1")]
    pub code: i32,
    #[prost(string, tag = "2")]
    pub message: ::prost::alloc::string::String,
}
