//! End-to-end tests for the middleware pipeline.
//!
//! Run with: cargo test --test middleware_tests
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::task::JoinSet;

use mcp_guard::{
    Config, ErrorEnvelope, ErrorHandler, MethodContract, MiddlewareError, ProtocolMiddleware,
    RequestContext, RequestValidator, RpcRequest, TimeoutManager, TimeoutPolicy, codes,
};

const SESSION: &str = "session-test";

fn middleware() -> ProtocolMiddleware {
    ProtocolMiddleware::from_config(&Config::default())
}

fn context_for(raw: &Value) -> RequestContext {
    RequestContext::from_raw(raw, Some(SESSION.to_string()))
}

fn envelope(result: Result<Value, MiddlewareError>) -> ErrorEnvelope {
    match result {
        Err(MiddlewareError::Coded(envelope)) => envelope,
        other => panic!("expected a coded error, got {other:?}"),
    }
}

/// Handler that echoes a fixed MCP-shaped result.
async fn ok_handler(request: RpcRequest) -> Result<Value, MiddlewareError> {
    match request.method.as_str() {
        "tools/list" => Ok(json!({"tools": [{"name": "echo", "inputSchema": {}}]})),
        "tools/call" => Ok(json!({"content": [{"type": "text", "text": "hi"}]})),
        _ => Ok(json!({})),
    }
}

mod request_flow {
    use super::*;

    #[tokio::test]
    async fn test_valid_request_gets_metadata() {
        let mw = middleware();
        let raw = json!({"jsonrpc": "2.0", "id": 7, "method": "tools/list"});
        let ctx = context_for(&raw);

        let result = mw.process_request(&raw, &ctx, ok_handler).await.unwrap();

        assert_eq!(result["tools"][0]["name"], "echo");
        let metadata = &result["_metadata"];
        assert_eq!(metadata["requestId"], "7");
        assert_eq!(metadata["sessionId"], SESSION);
        assert!(metadata["timestamp"].as_str().unwrap().ends_with('Z'));
        assert!(metadata["processingStartedAt"].is_string());
    }

    #[tokio::test]
    async fn test_string_id_is_request_id() {
        let mw = middleware();
        let raw = json!({
            "jsonrpc": "2.0",
            "id": "abc",
            "method": "tools/call",
            "params": {"name": "echo", "arguments": {"text": "hi"}}
        });
        let ctx = context_for(&raw);

        let result = mw.process_request(&raw, &ctx, ok_handler).await.unwrap();
        assert_eq!(result["_metadata"]["requestId"], "abc");
        assert_eq!(result["content"][0]["text"], "hi");
    }

    #[tokio::test]
    async fn test_handler_receives_typed_request() {
        let mw = middleware();
        let raw = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "resources/read",
            "params": {"uri": "file:///etc/motd"}
        });
        let ctx = context_for(&raw);

        let result = mw
            .process_request(&raw, &ctx, |request| async move {
                assert_eq!(request.method, "resources/read");
                assert_eq!(request.param("uri"), Some(&json!("file:///etc/motd")));
                Ok(json!({"contents": []}))
            })
            .await
            .unwrap();
        assert!(result["contents"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_non_object_result_passes_unchanged() {
        let mw = middleware();
        let raw = json!({"jsonrpc": "2.0", "id": 1, "method": "roots/list"});
        let ctx = context_for(&raw);

        let result = mw
            .process_request(&raw, &ctx, |_| async { Ok(json!("plain")) })
            .await
            .unwrap();
        assert_eq!(result, json!("plain"));
    }
}

mod rejections {
    use super::*;

    #[tokio::test]
    async fn test_unknown_method_is_method_not_found() {
        let mw = middleware();
        let raw = json!({"jsonrpc": "2.0", "id": 1, "method": "tools/delete"});
        let ctx = context_for(&raw);

        let env = envelope(mw.process_request(&raw, &ctx, ok_handler).await);

        assert_eq!(env.code, codes::METHOD_NOT_FOUND);
        assert_eq!(env.message, "Method not found");
        assert_eq!(env.data.unwrap()["method"], "tools/delete");
        let block = env.context.unwrap();
        assert_eq!(block.request_id, "1");
        assert_eq!(block.session_id.as_deref(), Some(SESSION));
        assert_eq!(block.method, "tools/delete");
    }

    #[tokio::test]
    async fn test_missing_version_lists_violations() {
        let mw = middleware();
        let raw = json!({"id": 1, "method": "tools/list"});
        let ctx = context_for(&raw);

        let env = envelope(mw.process_request(&raw, &ctx, ok_handler).await);

        assert_eq!(env.code, codes::INVALID_PARAMS);
        assert_eq!(env.message, "Request validation failed");
        let data = env.data.unwrap();
        assert_eq!(data["originalMessage"], "Invalid request format");
        let violation = &data["details"]["violations"][0];
        assert_eq!(violation["path"], "");
        assert!(violation["message"].as_str().unwrap().contains("\"jsonrpc\""));
    }

    #[tokio::test]
    async fn test_invalid_params_for_method() {
        let mw = middleware();
        let raw = json!({
            "jsonrpc": "2.0",
            "id": 2,
            "method": "tools/call",
            "params": {"arguments": {}}
        });
        let ctx = context_for(&raw);

        let env = envelope(mw.process_request(&raw, &ctx, ok_handler).await);

        assert_eq!(env.code, codes::INVALID_PARAMS);
        let data = env.data.unwrap();
        assert_eq!(
            data["originalMessage"],
            "Invalid parameters for method tools/call"
        );
        let violation = &data["details"]["violations"][0];
        assert_eq!(violation["path"], "/params");
        assert!(violation["message"].as_str().unwrap().contains("\"name\""));
    }

    #[tokio::test]
    async fn test_rejected_request_never_reaches_handler() {
        let mw = middleware();
        let raw = json!({"jsonrpc": "1.0", "id": 1, "method": "tools/list"});
        let ctx = context_for(&raw);

        let result = mw
            .process_request(&raw, &ctx, |_| async {
                Err(MiddlewareError::Internal("handler ran".into()))
            })
            .await;

        let env = envelope(result);
        assert_eq!(env.code, codes::INVALID_PARAMS);
        assert_eq!(mw.timeouts().pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_oversized_params_is_internal_error() {
        let config = Config {
            max_params_bytes: 64,
            ..Config::default()
        };
        let mw = ProtocolMiddleware::from_config(&config);
        let raw = json!({
            "jsonrpc": "2.0",
            "id": 3,
            "method": "tools/call",
            "params": {"name": "echo", "arguments": {"text": "x".repeat(100)}}
        });
        let ctx = context_for(&raw);

        let env = envelope(mw.process_request(&raw, &ctx, ok_handler).await);

        assert_eq!(env.code, codes::INTERNAL_ERROR);
        assert_eq!(env.message, "Internal server error");
        let original = env.data.unwrap()["originalMessage"].clone();
        assert!(original.as_str().unwrap().contains("Request payload too large"));
    }

    #[tokio::test]
    async fn test_too_many_sampling_messages() {
        let config = Config {
            sampling_max_messages: 2,
            ..Config::default()
        };
        let mw = ProtocolMiddleware::from_config(&config);
        let message = json!({"role": "user", "content": {"type": "text", "text": "hi"}});
        let raw = json!({
            "jsonrpc": "2.0",
            "id": 4,
            "method": "sampling/create",
            "params": {"messages": [message.clone(), message.clone(), message]}
        });
        let ctx = context_for(&raw);

        let env = envelope(mw.process_request(&raw, &ctx, ok_handler).await);

        assert_eq!(env.code, codes::INTERNAL_ERROR);
        let original = env.data.unwrap()["originalMessage"].clone();
        assert!(original.as_str().unwrap().contains("Too many messages"));
    }
}

mod timeouts {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_slow_handler_times_out_with_method_budget() {
        let mw = middleware();
        let raw = json!({
            "jsonrpc": "2.0",
            "id": 5,
            "method": "tools/call",
            "params": {"name": "slow"}
        });
        let ctx = context_for(&raw);

        let env = envelope(
            mw.process_request(&raw, &ctx, |_| async {
                tokio::time::sleep(Duration::from_secs(600)).await;
                Ok(json!({"content": []}))
            })
            .await,
        );

        assert_eq!(env.code, codes::INTERNAL_ERROR);
        assert_eq!(env.message, "Request timed out");
        let data = env.data.unwrap();
        assert_eq!(data["timeout"], 60_000);
        assert_eq!(data["method"], "tools/call");

        let stats = mw.stats().await;
        assert_eq!(stats.timeouts.total_timeouts, 1);
        assert_eq!(stats.timeouts.pending_timeouts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_configured_override_applies() {
        let mut config = Config::default();
        config
            .method_timeouts
            .insert("tools/list".to_string(), Duration::from_millis(50));
        let mw = ProtocolMiddleware::from_config(&config);
        let raw = json!({"jsonrpc": "2.0", "id": 6, "method": "tools/list"});
        let ctx = context_for(&raw);

        let env = envelope(
            mw.process_request(&raw, &ctx, |_| async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok(json!({"tools": []}))
            })
            .await,
        );

        assert_eq!(env.data.unwrap()["timeout"], 50);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_handler_clears_its_timer() {
        let mw = middleware();
        let raw = json!({"jsonrpc": "2.0", "id": 8, "method": "prompts/list"});
        let ctx = context_for(&raw);

        mw.process_request(&raw, &ctx, |_| async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(json!({"prompts": []}))
        })
        .await
        .unwrap();

        tokio::time::advance(Duration::from_secs(120)).await;
        let stats = mw.timeouts().stats().await;
        assert_eq!(stats.pending_timeouts, 0);
        assert_eq!(stats.total_timeouts, 0);
    }

    #[tokio::test]
    async fn test_concurrent_requests_leave_no_pending_timers() {
        let mw = middleware();
        let mut tasks = JoinSet::new();

        for i in 0..20 {
            let mw = mw.clone();
            tasks.spawn(async move {
                let raw = json!({"jsonrpc": "2.0", "id": i, "method": "tools/list"});
                let ctx = context_for(&raw);
                mw.process_request(&raw, &ctx, ok_handler).await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            assert!(joined.unwrap().is_ok());
        }

        assert_eq!(mw.timeouts().pending_count().await, 0);
        assert_eq!(mw.validator().stats().total_validations, 20);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_request_releases_its_timer() {
        let mw = middleware();
        let raw = json!({"jsonrpc": "2.0", "id": 12, "method": "tools/list"});
        let ctx = context_for(&raw);

        let outcome = tokio::time::timeout(
            Duration::from_millis(10),
            mw.process_request(&raw, &ctx, |_| std::future::pending()),
        )
        .await;
        assert!(outcome.is_err());

        tokio::time::advance(Duration::from_secs(6)).await;
        tokio::task::yield_now().await;

        let stats = mw.timeouts().stats().await;
        assert_eq!(stats.pending_timeouts, 0);
        assert_eq!(stats.total_timeouts, 0);
    }
}

mod handler_errors {
    use super::*;

    #[tokio::test]
    async fn test_generic_handler_error_is_internal() {
        let mw = middleware();
        let raw = json!({"jsonrpc": "2.0", "id": 9, "method": "tools/list"});
        let ctx = context_for(&raw);

        let env = envelope(
            mw.process_request(&raw, &ctx, |_| async {
                Err(MiddlewareError::Internal("database unavailable".into()))
            })
            .await,
        );

        assert_eq!(env.code, codes::INTERNAL_ERROR);
        assert!(!env.is_recoverable());
        let stats = mw.errors().stats();
        assert_eq!(stats.total_errors, 1);
        assert_eq!(stats.errors_by_method["tools/list"], 1);
    }

    #[tokio::test]
    async fn test_coded_handler_error_passes_through() {
        let mw = middleware();
        let raw = json!({"jsonrpc": "2.0", "id": 10, "method": "tools/list"});
        let ctx = context_for(&raw);

        let env = envelope(
            mw.process_request(&raw, &ctx, |_| async {
                Err(MiddlewareError::Coded(ErrorEnvelope::new(
                    -32001,
                    "Upstream refused",
                    None,
                )))
            })
            .await,
        );

        assert_eq!(env.code, -32001);
        assert_eq!(env.message, "Upstream refused");
        assert!(env.context.is_some());
    }

    #[tokio::test]
    async fn test_rate_limit_gets_default_retry_hint() {
        let mw = middleware();
        let raw = json!({"jsonrpc": "2.0", "id": 11, "method": "tools/list"});
        let ctx = context_for(&raw);

        let env = envelope(
            mw.process_request(&raw, &ctx, |_| async {
                Err(MiddlewareError::rate_limit("slow down", None))
            })
            .await,
        );

        assert_eq!(env.message, "Rate limit exceeded");
        assert_eq!(env.data.unwrap()["retryAfter"], 60);
    }
}

mod responses {
    use super::*;

    fn list_request() -> RpcRequest {
        serde_json::from_value(json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"})).unwrap()
    }

    #[tokio::test]
    async fn test_valid_response_is_stamped() {
        let mw = middleware();
        let request = list_request();
        let ctx = RequestContext::new(Some(SESSION.into()), "1", "tools/list");
        let response = json!({"jsonrpc": "2.0", "id": 1, "result": {"tools": []}});

        let stamped = mw.process_response(&response, &request, &ctx).unwrap();

        assert_eq!(stamped["_requestId"], "1");
        assert!(stamped["_processingTime"].is_u64());
        assert_eq!(stamped["result"], json!({"tools": []}));
    }

    #[tokio::test]
    async fn test_malformed_result_fails_response_validation() {
        let mw = middleware();
        let request = list_request();
        let ctx = RequestContext::new(None, "1", "tools/list");
        let response = json!({"jsonrpc": "2.0", "id": 1, "result": {"items": []}});

        let env = envelope(mw.process_response(&response, &request, &ctx));

        assert_eq!(env.code, codes::INTERNAL_ERROR);
        assert_eq!(env.message, "Response validation failed");
        let violation = &env.data.unwrap()["violations"][0];
        assert_eq!(violation["path"], "/result");
        assert!(violation["message"].as_str().unwrap().contains("\"tools\""));
        assert_eq!(mw.validator().stats().validation_errors, 1);
    }

    #[tokio::test]
    async fn test_processed_result_round_trips_through_response() {
        let mw = middleware();
        let raw = json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"});
        let ctx = context_for(&raw);

        let result = mw.process_request(&raw, &ctx, ok_handler).await.unwrap();
        assert!(
            MethodContract::mcp_default()
                .result_schema("tools/list")
                .unwrap()
                .is_valid(&result)
        );

        let response = json!({"jsonrpc": "2.0", "id": 1, "result": result.clone()});
        let stamped = mw.process_response(&response, &list_request(), &ctx).unwrap();

        let original = result.as_object().unwrap();
        for (key, value) in original {
            assert_eq!(&stamped["result"][key], value, "field {key} changed");
        }
        assert_eq!(stamped["result"].as_object().unwrap().len(), original.len());
        assert_eq!(stamped["_requestId"], "1");
        assert!(stamped["_processingTime"].is_u64());
        assert_eq!(mw.validator().stats().validation_errors, 0);
    }

    #[tokio::test]
    async fn test_error_response_is_accepted() {
        let mw = middleware();
        let request = list_request();
        let ctx = RequestContext::new(None, "1", "tools/list");
        let response = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": {"code": -32601, "message": "Method not found"}
        });

        assert!(mw.process_response(&response, &request, &ctx).is_ok());
    }
}

mod statistics {
    use super::*;

    #[tokio::test]
    async fn test_stats_aggregate_components() {
        let mw = middleware();

        let good = json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"});
        mw.process_request(&good, &context_for(&good), ok_handler)
            .await
            .unwrap();

        let bad = json!({"jsonrpc": "2.0", "id": 2, "method": "nope"});
        let _ = mw.process_request(&bad, &context_for(&bad), ok_handler).await;

        let stats = mw.stats().await;
        assert_eq!(stats.validation.total_validations, 2);
        assert_eq!(stats.validation.validation_errors, 1);
        assert!((stats.validation.success_rate - 0.5).abs() < f64::EPSILON);
        assert_eq!(stats.errors.total_errors, 1);
        assert_eq!(stats.errors.most_common_error.as_deref(), Some("MethodNotFoundError"));
        assert_eq!(stats.timeouts.method_overrides, 8);
    }

    #[tokio::test]
    async fn test_injected_components_are_independent() {
        let shared_errors = Arc::new(ErrorHandler::new());
        let build = |errors: Arc<ErrorHandler>| {
            ProtocolMiddleware::new(
                Arc::new(RequestValidator::new(
                    MethodContract::mcp_default(),
                    Default::default(),
                )),
                Arc::new(TimeoutManager::new(TimeoutPolicy::default())),
                errors,
            )
        };
        let first = build(Arc::clone(&shared_errors));
        let second = build(Arc::clone(&shared_errors));
        let isolated = middleware();

        let bad = json!({"jsonrpc": "2.0", "id": 1, "method": "nope"});
        let _ = first.process_request(&bad, &context_for(&bad), ok_handler).await;
        let _ = second.process_request(&bad, &context_for(&bad), ok_handler).await;

        assert_eq!(shared_errors.stats().total_errors, 2);
        assert_eq!(first.validator().stats().total_validations, 1);
        assert_eq!(isolated.errors().stats().total_errors, 0);
    }

    #[tokio::test]
    async fn test_shutdown_clears_pending_timers() {
        let mw = middleware();
        let _handle = mw.timeouts().create_timeout("tools/call").await;
        assert_eq!(mw.timeouts().pending_count().await, 1);

        mw.shutdown().await;
        assert_eq!(mw.timeouts().pending_count().await, 0);
    }
}
