//! Conversation list, history, and cancel endpoints.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::{json, Value};

use bubbleflow::{
    bubble, BubbleRecord, ConversationSummary, HistoryContext, MessageContext, NewChatContext,
    Runtime,
};

async fn spawn_server(runtime: Runtime) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, runtime.router()).await.unwrap();
    });
    format!("http://{addr}")
}

async fn get_json(url: &str, user_id: Option<&str>) -> Value {
    let mut req = reqwest::Client::new().get(url);
    if let Some(user_id) = user_id {
        req = req.header("User-Id", user_id);
    }
    let resp = req.send().await.unwrap();
    assert_eq!(resp.status(), 200);
    resp.json().await.unwrap()
}

#[tokio::test]
async fn conversation_list_preserves_handler_order() {
    let runtime = Runtime::new();
    runtime.set_conversation_list(
        "alice",
        vec![
            ConversationSummary::new("c1", "First", 100).unwrap(),
            ConversationSummary::new("c2", "Second", 200).unwrap(),
        ],
    );
    let base = spawn_server(runtime).await;

    let payload = get_json(&format!("{base}/api/conversations"), Some("alice")).await;
    let ids: Vec<&str> = payload["conversations"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, ["c1", "c2"]);
    assert_eq!(payload["conversations"][0]["title"], "First");
    assert_eq!(payload["conversations"][1]["updatedAt"], 200);
}

#[tokio::test]
async fn conversation_list_is_per_user_and_normalizes_header() {
    let runtime = Runtime::new();
    runtime.set_conversation_list(
        "alice",
        vec![ConversationSummary::new("c1", "Alice's", 1).unwrap()],
    );
    runtime.set_conversation_list(
        "anonymous",
        vec![ConversationSummary::new("c2", "Nobody's", 2).unwrap()],
    );
    let base = spawn_server(runtime).await;
    let url = format!("{base}/api/conversations");

    let padded = get_json(&url, Some("  alice  ")).await;
    assert_eq!(padded["conversations"][0]["id"], "c1");

    let missing = get_json(&url, None).await;
    assert_eq!(missing["conversations"][0]["id"], "c2");

    let blank = get_json(&url, Some("   ")).await;
    assert_eq!(blank["conversations"][0]["id"], "c2");

    let unknown = get_json(&url, Some("bob")).await;
    assert_eq!(unknown["conversations"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn history_without_handler_exports_the_session() {
    let runtime = Runtime::new();
    runtime.on_message(|_: MessageContext| async move {
        let reply = bubble().set("remembered").send().await?;
        reply.done().await;
        anyhow::Ok(())
    });
    let base = spawn_server(runtime).await;
    let client = reqwest::Client::new();

    client
        .post(format!("{base}/api/conversations/stream"))
        .json(&json!({ "conversationId": "kept", "message": "go" }))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    let payload = get_json(&format!("{base}/api/conversations/kept/messages"), None).await;
    assert_eq!(payload["conversationId"], "kept");
    let messages = payload["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["content"], "remembered");
    assert_eq!(messages[0]["type"], "text");
}

#[tokio::test]
async fn history_handler_receives_context() {
    let runtime = Runtime::new();
    let seen: Arc<Mutex<Option<(String, String)>>> = Arc::new(Mutex::new(None));
    {
        let seen = seen.clone();
        runtime.on_history(move |ctx: HistoryContext| {
            let seen = seen.clone();
            async move {
                *seen.lock() = Some((ctx.conversation_id, ctx.user_id));
                Vec::<BubbleRecord>::new()
            }
        });
    }
    let base = spawn_server(runtime).await;

    let payload = get_json(
        &format!("{base}/api/conversations/abc/messages"),
        Some("user-123"),
    )
    .await;
    assert_eq!(payload["messages"].as_array().unwrap().len(), 0);
    assert_eq!(
        seen.lock().clone(),
        Some(("abc".to_string(), "user-123".to_string()))
    );
}

#[tokio::test]
async fn history_handler_positional_convention_works() {
    let runtime = Runtime::new();
    let seen: Arc<Mutex<Option<(String, String)>>> = Arc::new(Mutex::new(None));
    {
        let seen = seen.clone();
        runtime.on_history(move |conversation_id: String, user_id: String| {
            let seen = seen.clone();
            async move {
                *seen.lock() = Some((conversation_id, user_id));
                Vec::<BubbleRecord>::new()
            }
        });
    }
    let base = spawn_server(runtime).await;

    get_json(&format!("{base}/api/conversations/abc/messages"), None).await;
    assert_eq!(
        seen.lock().clone(),
        Some(("abc".to_string(), "anonymous".to_string()))
    );
}

#[tokio::test]
async fn history_handler_may_return_drafts() {
    let runtime = Runtime::new();
    runtime.on_history(|_: HistoryContext| async move {
        vec![bubble().role("assistant").kind("text").set("Saved")]
    });
    let base = spawn_server(runtime).await;

    let payload = get_json(&format!("{base}/api/conversations/abc/messages"), None).await;
    let messages = payload["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["role"], "assistant");
    assert_eq!(messages[0]["content"], "Saved");
}

#[tokio::test]
async fn history_handler_returning_nothing_falls_back_to_sent_bubbles() {
    let runtime = Runtime::new();
    runtime.on_history(|_: HistoryContext| async move {
        // no sink here: the bubble binds, records, and is marked done
        let sent = bubble().set("From send").send().await?;
        assert!(sent.is_done());
        anyhow::Ok(())
    });
    let base = spawn_server(runtime).await;

    let payload = get_json(&format!("{base}/api/conversations/abc/messages"), None).await;
    let messages = payload["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["content"], "From send");
}

#[tokio::test]
async fn second_stream_on_one_conversation_is_rejected() {
    let runtime = Runtime::new();
    runtime.on_message(|_: MessageContext| async move {
        let reply = bubble().send().await?;
        reply.stream("busy").await;
        tokio::time::sleep(Duration::from_secs(30)).await;
        anyhow::Ok(())
    });
    let base = spawn_server(runtime).await;
    let client = reqwest::Client::new();

    let first = client
        .post(format!("{base}/api/conversations/stream"))
        .json(&json!({ "conversationId": "solo", "message": "go" }))
        .send()
        .await
        .unwrap();
    assert_eq!(first.status(), 200);
    // make sure the first stream is attached and producing
    let mut stream = first.bytes_stream();
    stream.next().await.unwrap().unwrap();

    let second = client
        .post(format!("{base}/api/conversations/stream"))
        .json(&json!({ "conversationId": "solo", "message": "go" }))
        .send()
        .await
        .unwrap();
    assert_eq!(second.status(), 409);
    let body: Value = second.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("already active"));
}

#[tokio::test]
async fn restricted_cors_echoes_only_listed_origins() {
    let runtime = Runtime::new();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = runtime.router_with_origins(vec!["http://localhost:5173".to_string()]);
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    let url = format!("http://{addr}/api/conversations");
    let client = reqwest::Client::new();

    let allowed = client
        .get(&url)
        .header("Origin", "http://localhost:5173")
        .send()
        .await
        .unwrap();
    assert_eq!(
        allowed.headers()["access-control-allow-origin"],
        "http://localhost:5173"
    );

    let denied = client
        .get(&url)
        .header("Origin", "http://evil.example")
        .send()
        .await
        .unwrap();
    assert!(denied.headers().get("access-control-allow-origin").is_none());
}

#[tokio::test]
async fn cancel_of_unknown_stream_reports_unknown() {
    let base = spawn_server(Runtime::new()).await;
    let payload: Value = reqwest::Client::new()
        .post(format!("{base}/api/streams/no-such-stream/cancel"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(payload["status"], "unknown");
}

#[tokio::test]
async fn new_chat_handler_positional_convention_works() {
    let runtime = Runtime::new();
    let seen: Arc<Mutex<Option<(String, String)>>> = Arc::new(Mutex::new(None));
    {
        let seen = seen.clone();
        runtime.on_new_chat(move |conversation_id: String, user_id: String| {
            let seen = seen.clone();
            async move {
                *seen.lock() = Some((conversation_id, user_id));
            }
        });
    }
    let base = spawn_server(runtime).await;

    reqwest::Client::new()
        .post(format!("{base}/api/conversations/stream"))
        .header("User-Id", "user-123")
        .json(&json!({}))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    let seen = seen.lock().clone().unwrap();
    assert!(!seen.0.is_empty(), "conversation id was minted");
    assert_eq!(seen.1, "user-123");
}
