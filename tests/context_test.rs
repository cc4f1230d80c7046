use companion::memory::ContextAssembler;
use companion::memory::short_term::ShortTermMemory;
use companion::store::{MemoryStore, RestStore, Store};
use companion::types::NewHistoryEntry;
use std::sync::Arc;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn seed(store: &MemoryStore, session_id: &str, count: usize) {
    for i in 0..count {
        store
            .append_history(NewHistoryEntry {
                user_id: "u1".into(),
                ai_friend_id: None,
                conversation_id: session_id.into(),
                sender: "Sam".into(),
                message: format!("m{i}"),
            })
            .await
            .unwrap();
    }
}

#[test]
fn short_term_keeps_most_recent_ten_fifo() {
    let memory = ShortTermMemory::default();
    for i in 0..25 {
        memory.append_message("u1", "s1", "Sam", &format!("m{i}"));
    }
    let lines = memory.all("u1", "s1");
    assert_eq!(lines.len(), 10);
    assert_eq!(lines.first().map(String::as_str), Some("Sam: m15"));
    assert_eq!(lines.last().map(String::as_str), Some("Sam: m24"));
}

#[test]
fn short_term_sessions_are_independent() {
    let memory = ShortTermMemory::new(3);
    memory.append("u1", "a", "one");
    memory.append("u1", "b", "two");
    assert_eq!(memory.all("u1", "a"), vec!["one"]);
    assert_eq!(memory.recent("u1", "b", 5), vec!["two"]);
    memory.clear("u1", "a");
    assert!(memory.all("u1", "a").is_empty());
    assert_eq!(memory.all("u1", "b").len(), 1);
}

#[test]
fn short_term_windows_are_owned_per_user() {
    let memory = ShortTermMemory::default();
    memory.append_message("u1", "s1", "Sam", "my pin is 4321");
    memory.append_message("u2", "s1", "Eve", "hello");

    assert_eq!(memory.all("u1", "s1"), vec!["Sam: my pin is 4321"]);
    assert_eq!(memory.all("u2", "s1"), vec!["Eve: hello"]);
    memory.clear("u2", "s1");
    assert_eq!(memory.all("u1", "s1").len(), 1);
}

#[test]
fn forgetting_a_sender_only_touches_that_users_windows() {
    let memory = ShortTermMemory::default();
    memory.append_message("u1", "s1", "Sam", "hi");
    memory.append_message("u1", "s1", "Mira", "hello");
    memory.append_message("u1", "s2", "Mira", "again");
    memory.append_message("u2", "s1", "Mira", "other user");

    memory.forget_sender("u1", "Mira");
    assert_eq!(memory.all("u1", "s1"), vec!["Sam: hi"]);
    assert!(memory.all("u1", "s2").is_empty());
    assert_eq!(memory.all("u2", "s1"), vec!["Mira: other user"]);
}

#[tokio::test]
async fn full_local_window_skips_storage() {
    let short_term = Arc::new(ShortTermMemory::new(20));
    for i in 0..12 {
        short_term.append_message("u1", "s1", "Sam", &format!("local{i}"));
    }
    // Store holds different lines: if it were read they would show up.
    let store = Arc::new(MemoryStore::new());
    seed(&store, "s1", 5).await;

    let assembler = ContextAssembler::new(short_term, store);
    let context = assembler.assemble("u1", "s1", 10).await;
    assert_eq!(context.len(), 10);
    assert_eq!(context[0], "Sam: local2");
    assert!(context.iter().all(|l| l.contains("local")));
}

#[tokio::test]
async fn short_local_window_is_supplemented_without_duplicates() {
    let store = Arc::new(MemoryStore::new());
    seed(&store, "s1", 15).await;

    let short_term = Arc::new(ShortTermMemory::default());
    short_term.append_message("u1", "s1", "Sam", "m13");
    short_term.append_message("u1", "s1", "Sam", "m14");

    let assembler = ContextAssembler::new(short_term, store);
    let context = assembler.assemble("u1", "s1", 20).await;
    assert_eq!(context.len(), 15);
    assert_eq!(context.first().map(String::as_str), Some("Sam: m0"));
    assert_eq!(context.last().map(String::as_str), Some("Sam: m14"));
    let unique: std::collections::HashSet<_> = context.iter().collect();
    assert_eq!(unique.len(), context.len());
}

#[tokio::test]
async fn diverged_local_window_is_not_repeated() {
    let store = Arc::new(MemoryStore::new());
    seed(&store, "s1", 4).await;

    // "aside" never reached storage.
    let short_term = Arc::new(ShortTermMemory::default());
    for line in ["m1", "m2", "aside", "m3"] {
        short_term.append_message("u1", "s1", "Sam", line);
    }

    let assembler = ContextAssembler::new(short_term, store);
    let context = assembler.assemble("u1", "s1", 20).await;
    assert_eq!(
        context,
        vec!["Sam: m0", "Sam: m1", "Sam: m2", "Sam: aside", "Sam: m3"]
    );
}

#[tokio::test]
async fn another_users_window_never_leaks_into_context() {
    let store = Arc::new(MemoryStore::new());
    let short_term = Arc::new(ShortTermMemory::default());
    short_term.append_message("u1", "s1", "Sam", "my pin is 4321");

    let assembler = ContextAssembler::new(short_term, store);
    assert!(assembler.assemble("u2", "s1", 10).await.is_empty());
}

#[tokio::test]
async fn durable_rows_are_chronological_and_capped() {
    let store = Arc::new(MemoryStore::new());
    seed(&store, "s1", 30).await;
    let assembler = ContextAssembler::new(Arc::new(ShortTermMemory::default()), store);

    let context = assembler.assemble("u1", "s1", 20).await;
    assert_eq!(context.len(), 20);
    assert_eq!(context[0], "Sam: m10");
    assert_eq!(context[19], "Sam: m29");
}

#[tokio::test]
async fn other_users_history_is_not_assembled() {
    let store = Arc::new(MemoryStore::new());
    seed(&store, "s1", 3).await;
    let assembler = ContextAssembler::new(Arc::new(ShortTermMemory::default()), store);
    assert!(assembler.assemble("someone-else", "s1", 10).await.is_empty());
}

#[tokio::test]
async fn storage_failure_yields_local_lines_only() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    let store: Arc<dyn Store> = Arc::new(RestStore::new(&server.uri(), "anon"));

    let short_term = Arc::new(ShortTermMemory::default());
    short_term.append_message("u1", "s1", "Sam", "hi");

    let assembler = ContextAssembler::new(Arc::clone(&short_term), Arc::clone(&store));
    assert_eq!(assembler.assemble("u1", "s1", 10).await, vec!["Sam: hi"]);
    assert!(assembler.assemble("u1", "empty", 10).await.is_empty());
}
