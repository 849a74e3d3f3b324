use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use voxcall_calls::{
    CallError, CallingClient, FoundryAssistant, FoundrySettings, GraphCallingClient,
    GraphSettings, PollPolicy, ReplyProducer, NO_ASSISTANT_RESPONSE,
};

async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

mod graph {
    use super::*;

    #[derive(Default)]
    struct Seen {
        token_forms: Mutex<Vec<(String, HashMap<String, String>)>>,
        answers: Mutex<Vec<(String, Option<String>, Value)>>,
    }

    fn router(seen: Arc<Seen>, expires_in: Option<u64>, answer_status: StatusCode) -> Router {
        Router::new()
            .route(
                "/{tenant}/oauth2/v2.0/token",
                post(
                    move |State(seen): State<Arc<Seen>>,
                          Path(tenant): Path<String>,
                          Form(form): Form<HashMap<String, String>>| async move {
                        let n = {
                            let mut forms = seen.token_forms.lock().unwrap();
                            forms.push((tenant, form));
                            forms.len()
                        };
                        let mut body = json!({
                            "token_type": "Bearer",
                            "access_token": format!("graph-token-{}", n)
                        });
                        if let Some(expires_in) = expires_in {
                            body["expires_in"] = json!(expires_in);
                        }
                        Json(body)
                    },
                ),
            )
            .route(
                "/communications/calls/{call_id}/answer",
                post(
                    move |State(seen): State<Arc<Seen>>,
                          Path(call_id): Path<String>,
                          headers: HeaderMap,
                          Json(body): Json<Value>| async move {
                        let auth = headers
                            .get("authorization")
                            .and_then(|v| v.to_str().ok())
                            .map(str::to_string);
                        seen.answers.lock().unwrap().push((call_id, auth, body));
                        (answer_status, "")
                    },
                ),
            )
            .with_state(seen)
    }

    async fn client(router: Router) -> GraphCallingClient {
        let base = serve(router).await;
        GraphCallingClient::new(GraphSettings {
            login_base_url: base.clone(),
            graph_base_url: base,
            ..GraphSettings::new("app-id", "app-secret")
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_token_is_requested_with_client_credentials_and_cached() {
        let seen = Arc::new(Seen::default());
        let client = client(router(Arc::clone(&seen), Some(3600), StatusCode::ACCEPTED)).await;

        assert_eq!(client.acquire_token("tenant-a").await.unwrap(), "graph-token-1");
        assert_eq!(client.acquire_token("tenant-a").await.unwrap(), "graph-token-1");
        assert_eq!(client.acquire_token("tenant-b").await.unwrap(), "graph-token-2");

        let forms = seen.token_forms.lock().unwrap();
        assert_eq!(forms.len(), 2);
        let (tenant, form) = &forms[0];
        assert_eq!(tenant, "tenant-a");
        assert_eq!(form["client_id"], "app-id");
        assert_eq!(form["client_secret"], "app-secret");
        assert_eq!(form["grant_type"], "client_credentials");
        assert_eq!(form["scope"], "https://graph.microsoft.com/.default");
    }

    #[tokio::test]
    async fn test_short_lived_token_is_not_cached() {
        let seen = Arc::new(Seen::default());
        let client = client(router(Arc::clone(&seen), None, StatusCode::ACCEPTED)).await;

        client.acquire_token("tenant-a").await.unwrap();
        client.acquire_token("tenant-a").await.unwrap();

        assert_eq!(seen.token_forms.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_missing_tenant_is_a_credential_error() {
        let seen = Arc::new(Seen::default());
        let client = client(router(Arc::clone(&seen), Some(3600), StatusCode::ACCEPTED)).await;

        assert!(matches!(
            client.acquire_token("  ").await,
            Err(CallError::Credential(_))
        ));
        assert!(seen.token_forms.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_token_rejection_is_a_credential_error() {
        let router = Router::new().route(
            "/{tenant}/oauth2/v2.0/token",
            post(|| async { (StatusCode::UNAUTHORIZED, r#"{"error":"invalid_client"}"#) }),
        );
        let client = client(router).await;

        match client.acquire_token("tenant-a").await {
            Err(CallError::Credential(details)) => {
                assert!(details.contains("401"));
                assert!(details.contains("invalid_client"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_answer_posts_callback_and_bearer_token() {
        let seen = Arc::new(Seen::default());
        let client = client(router(Arc::clone(&seen), Some(3600), StatusCode::ACCEPTED)).await;

        client
            .answer_call("call-1", "tok", "https://bot.example.com/callback")
            .await
            .unwrap();

        let answers = seen.answers.lock().unwrap();
        let (call_id, auth, body) = &answers[0];
        assert_eq!(call_id, "call-1");
        assert_eq!(auth.as_deref(), Some("Bearer tok"));
        assert_eq!(body["callbackUri"], "https://bot.example.com/callback");
        assert_eq!(body["acceptedModalities"], json!(["audio"]));
        assert_eq!(
            body["mediaConfig"]["@odata.type"],
            "#microsoft.graph.serviceHostedMediaConfig"
        );
    }

    #[tokio::test]
    async fn test_answer_rejection_is_an_answer_error() {
        let seen = Arc::new(Seen::default());
        let client = client(router(Arc::clone(&seen), Some(3600), StatusCode::FORBIDDEN)).await;

        assert!(matches!(
            client.answer_call("call-1", "tok", "https://cb").await,
            Err(CallError::Answer(details)) if details.contains("403")
        ));
    }
}

mod foundry {
    use super::*;

    struct Agent {
        run_statuses: Vec<&'static str>,
        messages: Value,
        probes: AtomicUsize,
        posted: Mutex<Vec<Value>>,
        queries: Mutex<Vec<(Option<String>, Option<String>)>>,
    }

    impl Agent {
        fn new(run_statuses: Vec<&'static str>, messages: Value) -> Arc<Self> {
            Arc::new(Self {
                run_statuses,
                messages,
                probes: AtomicUsize::new(0),
                posted: Mutex::new(Vec::new()),
                queries: Mutex::new(Vec::new()),
            })
        }

        fn record(&self, headers: &HeaderMap, query: &HashMap<String, String>) {
            let auth = headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            self.queries
                .lock()
                .unwrap()
                .push((auth, query.get("api-version").cloned()));
        }
    }

    async fn create_thread(
        State(agent): State<Arc<Agent>>,
        headers: HeaderMap,
        Query(query): Query<HashMap<String, String>>,
    ) -> impl IntoResponse {
        agent.record(&headers, &query);
        Json(json!({"id": "thread-1", "object": "thread"}))
    }

    async fn post_message(
        State(agent): State<Arc<Agent>>,
        headers: HeaderMap,
        Query(query): Query<HashMap<String, String>>,
        Json(body): Json<Value>,
    ) -> impl IntoResponse {
        agent.record(&headers, &query);
        agent.posted.lock().unwrap().push(body);
        Json(json!({"id": "msg-1"}))
    }

    async fn list_messages(
        State(agent): State<Arc<Agent>>,
        headers: HeaderMap,
        Query(query): Query<HashMap<String, String>>,
    ) -> impl IntoResponse {
        agent.record(&headers, &query);
        assert_eq!(query.get("order").map(String::as_str), Some("asc"));
        Json(agent.messages.clone())
    }

    async fn create_run(
        State(agent): State<Arc<Agent>>,
        headers: HeaderMap,
        Query(query): Query<HashMap<String, String>>,
        Json(body): Json<Value>,
    ) -> impl IntoResponse {
        agent.record(&headers, &query);
        agent.posted.lock().unwrap().push(body);
        Json(json!({"id": "run-1", "status": "queued"}))
    }

    async fn get_run(
        State(agent): State<Arc<Agent>>,
        Path((thread_id, run_id)): Path<(String, String)>,
    ) -> impl IntoResponse {
        assert_eq!(thread_id, "thread-1");
        assert_eq!(run_id, "run-1");
        let n = agent.probes.fetch_add(1, Ordering::SeqCst);
        let status = agent.run_statuses[n.min(agent.run_statuses.len() - 1)];
        let mut run = json!({"id": "run-1", "status": status});
        if status == "failed" {
            run["last_error"] = json!({"code": "server_error", "message": "model overloaded"});
        }
        Json(run)
    }

    async fn assistant(agent: &Arc<Agent>) -> FoundryAssistant {
        let router = Router::new()
            .route("/threads", post(create_thread))
            .route(
                "/threads/{thread_id}/messages",
                post(post_message).get(list_messages),
            )
            .route("/threads/{thread_id}/runs", post(create_run))
            .route("/threads/{thread_id}/runs/{run_id}", get(get_run))
            .with_state(Arc::clone(agent));
        let endpoint = serve(router).await;

        FoundryAssistant::new(FoundrySettings {
            endpoint,
            agent_id: "asst_42".to_string(),
            api_key: "foundry-key".to_string(),
            api_version: "v1".to_string(),
            poll: PollPolicy {
                initial_delay: Duration::from_millis(5),
                max_delay: Duration::from_millis(20),
                jitter_factor: 0.0,
                max_attempts: 4,
                timeout: Duration::from_secs(2),
            },
        })
        .unwrap()
    }

    fn conversation(reply: &str) -> Value {
        json!({"object": "list", "data": [
            {"role": "user", "content": [{"type": "text", "text": {"value": "hello"}}]},
            {"role": "assistant", "content": [{"type": "text", "text": {"value": reply}}]}
        ]})
    }

    #[tokio::test]
    async fn test_reply_runs_agent_until_completed() {
        let agent = Agent::new(
            vec!["queued", "in_progress", "completed"],
            conversation("Hi there"),
        );
        let assistant = assistant(&agent).await;

        assert_eq!(assistant.reply("hello").await.unwrap(), "Hi there");
        assert_eq!(agent.probes.load(Ordering::SeqCst), 3);

        let posted = agent.posted.lock().unwrap();
        assert_eq!(posted[0], json!({"role": "user", "content": "hello"}));
        assert_eq!(posted[1], json!({"assistant_id": "asst_42"}));

        for (auth, version) in agent.queries.lock().unwrap().iter() {
            assert_eq!(auth.as_deref(), Some("Bearer foundry-key"));
            assert_eq!(version.as_deref(), Some("v1"));
        }
    }

    #[tokio::test]
    async fn test_failed_run_is_a_reply_error() {
        let agent = Agent::new(vec!["in_progress", "failed"], conversation("unused"));
        let assistant = assistant(&agent).await;

        match assistant.reply("hello").await {
            Err(CallError::Reply(details)) => {
                assert!(details.contains("failed"));
                assert!(details.contains("model overloaded"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_run_stopped_without_completing_still_reads_messages() {
        let agent = Agent::new(
            vec!["in_progress", "requires_action"],
            conversation("Let me check that"),
        );
        let assistant = assistant(&agent).await;

        assert_eq!(assistant.reply("hello").await.unwrap(), "Let me check that");
        assert_eq!(agent.probes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_missing_assistant_message_uses_placeholder() {
        let agent = Agent::new(
            vec!["completed"],
            json!({"data": [
                {"role": "user", "content": [{"type": "text", "text": {"value": "hello"}}]}
            ]}),
        );
        let assistant = assistant(&agent).await;

        assert_eq!(assistant.reply("hello").await.unwrap(), NO_ASSISTANT_RESPONSE);
    }

    #[tokio::test]
    async fn test_run_that_never_finishes_times_out() {
        let agent = Agent::new(vec!["in_progress"], conversation("unused"));
        let assistant = assistant(&agent).await;

        assert!(matches!(
            assistant.reply("hello").await,
            Err(CallError::Timeout(_))
        ));
        assert_eq!(agent.probes.load(Ordering::SeqCst), 4);
    }
}
