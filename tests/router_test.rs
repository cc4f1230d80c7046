use async_trait::async_trait;
use companion::memory::ContextAssembler;
use companion::memory::short_term::ShortTermMemory;
use companion::router::{
    DisabledClassifier, HttpClassifier, RespondentClassifier, RespondentRouter, RouteInput,
    RouteReply, RouteRequest, WEB_CONTENT_PLACEHOLDER,
};
use companion::store::MemoryStore;
use companion::types::{AiFriend, MODE_NORMAL, NewHistoryEntry, ProfileFields, RouteSource};
use companion::store::Store;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn friend(id: &str, name: &str) -> AiFriend {
    AiFriend {
        id: id.into(),
        user_id: "u1".into(),
        name: name.into(),
        persona: format!("{name} persona"),
        about: String::new(),
        knowledge_base: String::new(),
        status: true,
        memory: Vec::new(),
        avatar_url: None,
    }
}

fn user() -> ProfileFields {
    ProfileFields {
        name: "Sam".into(),
        persona: String::new(),
        about: "likes hiking".into(),
        knowledge_base: String::new(),
    }
}

fn cast() -> Vec<AiFriend> {
    vec![
        friend("f1", "Mira"),
        friend("f2", "Leo"),
        friend("f3", "Ada"),
        friend("f4", "Kai"),
    ]
}

fn router_with(classifier: Arc<dyn RespondentClassifier>, store: Arc<MemoryStore>) -> RespondentRouter {
    let assembler = Arc::new(ContextAssembler::new(Arc::new(ShortTermMemory::default()), store));
    RespondentRouter::new(classifier, assembler, 10)
}

/// Answers with every active friend whose exact name appears in the message.
struct MentionClassifier {
    seen: Mutex<Vec<RouteRequest>>,
}

#[async_trait]
impl RespondentClassifier for MentionClassifier {
    async fn classify(&self, request: &RouteRequest) -> anyhow::Result<RouteReply> {
        self.seen.lock().unwrap().push(request.clone());
        let latest = request.message.lines().last().unwrap_or_default();
        let friends = request
            .router_data
            .active_friends
            .iter()
            .filter(|f| latest.contains(&f.name))
            .map(|f| f.name.clone())
            .collect();
        Ok(RouteReply {
            friends,
            mode: MODE_NORMAL.into(),
            web_content: None,
        })
    }
}

fn input<'a>(message: &'a str, user: &'a ProfileFields, active: &'a [AiFriend]) -> RouteInput<'a> {
    RouteInput {
        message,
        user,
        active,
        context: Vec::new(),
        user_id: "u1",
        session_id: "s1",
    }
}

#[tokio::test]
async fn fail_open_when_classifier_unavailable() {
    let router = router_with(Arc::new(DisabledClassifier), Arc::new(MemoryStore::new()));
    let active = cast();
    let user = user();

    for _ in 0..30 {
        let decision = router.route(input("hello", &user, &active)).await;
        assert!((1..=3).contains(&decision.turns.len()));
        assert_eq!(decision.mode, MODE_NORMAL);
        assert_eq!(decision.source, RouteSource::Fallback);
        assert!(decision.is_degraded());
        assert_eq!(decision.web_content.as_deref(), Some(WEB_CONTENT_PLACEHOLDER));
        assert!(decision.web_context().is_none());
        for turn in &decision.turns {
            assert!(active.iter().any(|f| f.id == turn.friend_id && f.name == turn.name));
        }
    }
}

#[tokio::test]
async fn fail_open_with_single_friend_picks_it() {
    let router = router_with(Arc::new(DisabledClassifier), Arc::new(MemoryStore::new()));
    let active = vec![friend("f1", "Mira")];
    let user = user();
    let decision = router.route(input("hello", &user, &active)).await;
    assert_eq!(decision.respondents(), vec!["Mira"]);
}

#[tokio::test]
async fn fail_open_on_non_2xx() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/route"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let classifier = HttpClassifier::new(format!("{}/route", server.uri()), Duration::from_secs(5));
    let router = router_with(Arc::new(classifier), Arc::new(MemoryStore::new()));
    let active = cast();
    let user = user();
    let decision = router.route(input("hello", &user, &active)).await;
    assert_eq!(decision.source, RouteSource::Fallback);
    assert_eq!(decision.mode, MODE_NORMAL);
}

#[tokio::test]
async fn fail_open_on_malformed_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let classifier = HttpClassifier::new(server.uri(), Duration::from_secs(5));
    let router = router_with(Arc::new(classifier), Arc::new(MemoryStore::new()));
    let active = cast();
    let user = user();
    let decision = router.route(input("hello", &user, &active)).await;
    assert!(decision.is_degraded());
}

#[tokio::test]
async fn fail_open_when_only_unknown_names_chosen() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"friends": ["Ghost"], "mode": "normal"})),
        )
        .mount(&server)
        .await;

    let classifier = HttpClassifier::new(server.uri(), Duration::from_secs(5));
    let router = router_with(Arc::new(classifier), Arc::new(MemoryStore::new()));
    let active = cast();
    let user = user();
    let decision = router.route(input("hello", &user, &active)).await;
    assert!(decision.is_degraded());
}

#[tokio::test]
async fn classifier_reply_keeps_order_duplicates_and_web_content() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/route"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "friends": ["Leo", "Mira", "Leo"],
            "mode": "web",
            "webContent": "Trail closures this weekend"
        })))
        .mount(&server)
        .await;

    let classifier = HttpClassifier::new(format!("{}/route", server.uri()), Duration::from_secs(5));
    let router = router_with(Arc::new(classifier), Arc::new(MemoryStore::new()));
    let active = cast();
    let user = user();
    let decision = router.route(input("any trail news?", &user, &active)).await;

    assert_eq!(decision.source, RouteSource::Classifier);
    assert_eq!(decision.respondents(), vec!["Leo", "Mira", "Leo"]);
    assert_eq!(decision.turns[0].friend_id, "f2");
    assert_eq!(decision.mode, "web");
    assert_eq!(decision.web_context(), Some("Trail closures this weekend"));
}

#[tokio::test]
async fn payload_carries_profiles_and_context_only() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"friends": ["Mira"], "mode": "normal"})))
        .mount(&server)
        .await;

    let classifier = HttpClassifier::new(server.uri(), Duration::from_secs(5));
    let router = router_with(Arc::new(classifier), Arc::new(MemoryStore::new()));
    let mut active = cast();
    active[0].memory.push(companion::types::MemoryEntry {
        role: "summary".into(),
        content: "secret memory".into(),
    });
    let user = user();
    router.route(input("hey Mira", &user, &active)).await;

    let requests = server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["message"], "Sam: hey Mira");
    assert_eq!(body["routerData"]["user"]["name"], "Sam");
    assert_eq!(body["routerData"]["activeFriends"].as_array().unwrap().len(), 4);
    assert!(!body.to_string().contains("secret memory"));
}

#[tokio::test]
async fn explicit_mention_is_routed_to_named_friend() {
    let classifier = Arc::new(MentionClassifier {
        seen: Mutex::new(Vec::new()),
    });
    let router = router_with(classifier.clone(), Arc::new(MemoryStore::new()));
    let active = cast();
    let user = user();

    let decision = router.route(input("Ada, what do you think?", &user, &active)).await;
    assert!(decision.respondents().contains(&"Ada".to_string()));
    assert_eq!(decision.source, RouteSource::Classifier);
}

#[tokio::test]
async fn short_context_is_topped_up_to_ten_from_storage() {
    let store = Arc::new(MemoryStore::new());
    for i in 0..15 {
        store
            .append_history(NewHistoryEntry {
                user_id: "u1".into(),
                ai_friend_id: None,
                conversation_id: "s1".into(),
                sender: "Leo".into(),
                message: format!("m{i}"),
            })
            .await
            .unwrap();
    }
    let classifier = Arc::new(MentionClassifier {
        seen: Mutex::new(Vec::new()),
    });
    let router = router_with(classifier.clone(), store);
    let active = cast();
    let user = user();

    router
        .route(RouteInput {
            context: vec!["Leo: m14".into()],
            ..input("hi", &user, &active)
        })
        .await;

    let seen = classifier.seen.lock().unwrap();
    let context = &seen[0].last_conversations;
    assert_eq!(context.len(), 10);
    assert_eq!(context[0], "Leo: m5");
    assert_eq!(context[9], "Leo: m14");
}
