//! Conversions between toolchat types and genai types, plus client construction
//!
//! Auth flows through our `SecretStore`, not genai's env var lookup, and the
//! adapter kind is forced per backend so model names never need a prefix.

use std::future::Future;
use std::pin::Pin;

use genai::chat::{
    ChatMessage as GenaiMessage, ChatOptions as GenaiOptions, ChatRequest,
    ChatRole as GenaiRole, Tool as GenaiTool, ToolCall as GenaiToolCall,
    ToolResponse as GenaiToolResponse,
};
use genai::resolver::{AuthData, AuthResolver, Endpoint, ServiceTargetResolver};
use genai::{adapter::AdapterKind, Client, ModelIden, ServiceTarget};

use super::schema::{translate_schema, SchemaDialect};
use super::traits::GenerationOptions;
use crate::types::{ChatMessage, MessageRole, ProviderKind, ToolCall, ToolDescriptor, ToolResult};

// ============================================================================
// toolchat -> genai
// ============================================================================

/// Convert a MessageRole to genai ChatRole
pub fn to_genai_role(role: MessageRole) -> GenaiRole {
    match role {
        MessageRole::System => GenaiRole::System,
        MessageRole::User => GenaiRole::User,
        MessageRole::Assistant => GenaiRole::Assistant,
    }
}

/// Convert a ChatMessage to genai ChatMessage
pub fn to_genai_message(msg: ChatMessage) -> GenaiMessage {
    GenaiMessage {
        role: to_genai_role(msg.role),
        content: msg.content.into(),
        options: None,
    }
}

/// Convert a conversation to genai messages, order preserved
pub fn to_genai_messages(messages: Vec<ChatMessage>) -> Vec<GenaiMessage> {
    messages.into_iter().map(to_genai_message).collect()
}

/// Convert a descriptor to a genai Tool with the schema translated for `dialect`
pub fn to_genai_tool(tool: &ToolDescriptor, dialect: SchemaDialect) -> GenaiTool {
    GenaiTool::new(tool.name.clone())
        .with_description(tool.description.clone())
        .with_schema(translate_schema(&tool.input_schema, dialect))
}

/// Convert descriptors to genai tools
pub fn to_genai_tools(tools: &[ToolDescriptor], dialect: SchemaDialect) -> Vec<GenaiTool> {
    tools.iter().map(|t| to_genai_tool(t, dialect)).collect()
}

/// Convert a ToolResult to genai ToolResponse
pub fn to_genai_tool_response(result: ToolResult) -> GenaiToolResponse {
    GenaiToolResponse::new(result.call_id, result.content)
}

/// Initial request for a conversation; tools are attached only when present
pub fn build_request(
    conversation: Vec<ChatMessage>,
    tools: Option<&[ToolDescriptor]>,
    dialect: SchemaDialect,
) -> ChatRequest {
    let request = ChatRequest::new(to_genai_messages(conversation));
    match tools {
        Some(tools) if !tools.is_empty() => request.with_tools(to_genai_tools(tools, dialect)),
        _ => request,
    }
}

/// Convert generation options to genai ChatOptions
pub fn to_genai_options(options: &GenerationOptions) -> GenaiOptions {
    GenaiOptions::default()
        .with_temperature(options.temperature)
        .with_top_p(options.top_p)
        .with_max_tokens(options.max_output_tokens)
        // Capture tool calls in stream so the loop can run them
        .with_capture_tool_calls(true)
}

// ============================================================================
// genai -> toolchat
// ============================================================================

/// Convert a genai ToolCall to ToolCall
pub fn from_genai_tool_call(tc: &GenaiToolCall) -> ToolCall {
    ToolCall::new(tc.call_id.clone(), tc.fn_name.clone(), tc.fn_arguments.clone())
}

// ============================================================================
// Client Creation with Custom Auth
// ============================================================================

/// genai adapter kind that serves a backend
pub fn adapter_kind_for(kind: ProviderKind) -> Option<AdapterKind> {
    match kind {
        ProviderKind::Gemini => Some(AdapterKind::Gemini),
        ProviderKind::Ollama => Some(AdapterKind::Ollama),
        ProviderKind::OpenAI => Some(AdapterKind::OpenAI),
        ProviderKind::Anthropic => Some(AdapterKind::Anthropic),
        ProviderKind::Mock => None,
    }
}

/// Normalize a base URL for genai endpoints (trailing slash)
pub fn normalize_base_url(url: &str) -> String {
    let trimmed = url.trim();
    if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{}/", trimmed)
    }
}

/// Create a genai Client bound to one backend
///
/// - auth comes from `api_key` (resolved from the secret store by the caller)
/// - every model name resolves to `adapter_kind`
/// - `base_url`, when set, replaces the adapter's default endpoint
pub fn create_client(
    adapter_kind: AdapterKind,
    api_key: Option<String>,
    base_url: Option<String>,
) -> Client {
    let auth_resolver = AuthResolver::from_resolver_async_fn(
        move |_model_iden: ModelIden| -> Pin<Box<dyn Future<Output = genai::resolver::Result<Option<AuthData>>> + Send>> {
            let key = api_key.clone();
            // None lets genai handle keyless backends such as Ollama
            Box::pin(async move { Ok(key.map(AuthData::from_single)) })
        },
    );

    let endpoint = base_url.map(|u| normalize_base_url(&u));

    let target_resolver = ServiceTargetResolver::from_resolver_fn(
        move |target: ServiceTarget| -> Result<ServiceTarget, genai::resolver::Error> {
            let ServiceTarget { endpoint: default_endpoint, auth, model } = target;

            let resolved_endpoint = match &endpoint {
                Some(url) => Endpoint::from_owned(url.clone()),
                None => default_endpoint,
            };

            Ok(ServiceTarget {
                endpoint: resolved_endpoint,
                auth, // Auth is handled by AuthResolver
                model: ModelIden::new(adapter_kind, model.model_name),
            })
        },
    );

    Client::builder()
        .with_auth_resolver(auth_resolver)
        .with_service_target_resolver(target_resolver)
        .build()
}
