//! End-to-end flows through the gate, the credential store, the vault and a
//! chat session, with a scripted provider standing in for the network.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;

use enki_core::catalog::{CatalogEntry, ModelCatalog};
use enki_core::config::Config;
use enki_core::error::{AuthError, ChatError, EnkiError, ProviderError};
use enki_core::gate::{GateEvent, Phase, SessionGate, Transition};
use enki_core::provider::{ChunkStream, LlmProvider};
use enki_core::session::send_to_provider;
use enki_core::store::{CredentialStore, Registration};
use enki_core::types::{CompletionRequest, Provider, Role};
use enki_core::vault::Vault;

/// Replies with fixed chunks and counts how often it was called.
struct Scripted {
    chunks: Vec<&'static str>,
    calls: AtomicUsize,
}

impl Scripted {
    fn new(chunks: Vec<&'static str>) -> Arc<Self> {
        Arc::new(Self {
            chunks,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmProvider for Scripted {
    async fn chat_stream(&self, _request: &CompletionRequest) -> Result<ChunkStream, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let items: Vec<Result<String, ProviderError>> =
            self.chunks.iter().map(|c| Ok(c.to_string())).collect();
        Ok(Box::pin(futures::stream::iter(items)))
    }

    fn kind(&self) -> Provider {
        Provider::OpenAi
    }
}

fn gate() -> SessionGate {
    SessionGate::new(&Config::default(), Arc::new(ModelCatalog::builtin()))
}

fn register(gate: &mut SessionGate, store: &mut CredentialStore, reg: Registration) -> enki_core::Result<Transition> {
    if gate.phase() != Phase::Registering {
        gate.handle(GateEvent::ClickRegister, store)?;
    }
    gate.handle(GateEvent::SubmitRegistration(reg), store)
}

#[test]
fn test_register_then_duplicate() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("users.json");
    let mut store = CredentialStore::open(&path).unwrap();
    let mut gate = gate();

    let alice = Registration::new("alice", "Alice", "a@x.com", "pw1").confirmed("pw1");
    let t = register(&mut gate, &mut store, alice).unwrap();
    assert_eq!(t, Transition::Registered { auto_login: false });
    assert!(store.contains("alice"));

    let on_disk = std::fs::read_to_string(&path).unwrap();
    assert!(on_disk.contains("\"alice\""));
    assert!(!on_disk.contains("\"pw1\""));

    let again = Registration::new("alice", "Impostor", "", "other").confirmed("other");
    let err = register(&mut gate, &mut store, again).unwrap_err();
    assert!(matches!(err, EnkiError::Auth(AuthError::DuplicateUser(ref u)) if u == "alice"));
    assert_eq!(gate.phase(), Phase::Registering);
    assert_eq!(std::fs::read_to_string(&path).unwrap(), on_disk);
    assert_eq!(store.find("alice").unwrap().name, "Alice");
}

#[test]
fn test_login_rejected_then_accepted() {
    let mut store = CredentialStore::in_memory();
    store
        .register(&Registration::new("alice", "Alice", "", "pw1"), 1)
        .unwrap();
    let before = store.data().clone();
    let mut gate = gate();

    let t = gate.handle(GateEvent::login("alice", "nope"), &mut store).unwrap();
    assert_eq!(t, Transition::Rejected);
    assert_eq!(gate.phase(), Phase::Rejected);
    assert_eq!(store.data(), &before);

    gate.handle(GateEvent::InputChanged, &mut store).unwrap();
    let t = gate.handle(GateEvent::login("alice", "pw1"), &mut store).unwrap();
    assert_eq!(t, Transition::LoggedIn);
    assert_eq!(gate.display_name(), Some("Alice"));
}

#[test]
fn test_reload_and_persist_is_byte_stable() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("users.json");
    {
        let mut store = CredentialStore::open(&path).unwrap();
        store
            .register(&Registration::new("bob", "Bob", "b@x.com", "secret"), 1)
            .unwrap();
        store
            .register(&Registration::new("alice", "Alice", "", "pw1"), 1)
            .unwrap();
    }
    let first = std::fs::read(&path).unwrap();

    for _ in 0..2 {
        let mut store = CredentialStore::open(&path).unwrap();
        store.persist().unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), first);
    }
}

#[test]
fn test_vault_round_trip_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("users.json");
    let vault = Vault::with_master_key([9u8; 32]);

    let mut store = CredentialStore::open(&path).unwrap();
    store
        .register(&Registration::new("alice", "Alice", "", "pw1"), 1)
        .unwrap();
    vault
        .set(&mut store, "alice", Provider::Anthropic, "sk-ant-secret-1234")
        .unwrap();

    let raw = std::fs::read_to_string(&path).unwrap();
    assert!(raw.contains("enc:v1:"));
    assert!(!raw.contains("sk-ant-secret-1234"));

    let reopened = CredentialStore::open(&path).unwrap();
    assert_eq!(
        vault.get(&reopened, "alice", Provider::Anthropic).unwrap(),
        "sk-ant-secret-1234"
    );
    assert_eq!(vault.get(&reopened, "alice", Provider::OpenAi).unwrap(), "");
    assert_eq!(vault.configured(&reopened, "alice"), vec![Provider::Anthropic]);
}

#[tokio::test]
async fn test_missing_key_never_reaches_provider() {
    let mut store = CredentialStore::in_memory();
    store
        .register(&Registration::new("alice", "Alice", "", "pw1"), 1)
        .unwrap();
    let vault = Vault::plaintext();
    let provider = Scripted::new(vec!["unused"]);
    let mut gate = gate();
    gate.handle(GateEvent::login("alice", "pw1"), &mut store).unwrap();

    let key = vault.get(&store, "alice", Provider::OpenAi).unwrap();
    let chat = gate.chat_mut().unwrap();
    let err = chat.submit("hello", None, &key).unwrap_err();
    assert!(matches!(err, ChatError::NoApiKey(ref p) if p == "OpenAI"));
    assert!(chat.transcript().is_empty());
    assert_eq!(provider.calls(), 0);
}

#[tokio::test]
async fn test_chat_round_trip_commits_reply() {
    let mut store = CredentialStore::in_memory();
    store
        .register(&Registration::new("alice", "Alice", "", "pw1"), 1)
        .unwrap();
    let vault = Vault::plaintext();
    let provider = Scripted::new(vec!["Hi ", "Alice"]);
    let mut gate = gate();
    gate.handle(GateEvent::login("alice", "pw1"), &mut store).unwrap();
    vault.set(&mut store, "alice", Provider::OpenAi, "sk-test").unwrap();

    let key = vault.get(&store, "alice", Provider::OpenAi).unwrap();
    let request = gate.chat_mut().unwrap().submit("hello", None, &key).unwrap();
    assert_eq!(request.api_key, "sk-test");

    let chunks: Vec<_> = send_to_provider(&mut gate, provider.clone(), request, Duration::from_secs(5))
        .collect()
        .await;
    assert_eq!(chunks.len(), 2);
    assert_eq!(provider.calls(), 1);

    let transcript = gate.chat().unwrap().transcript();
    assert_eq!(transcript.len(), 2);
    let reply = transcript.last().unwrap();
    assert_eq!(reply.role, Role::Assistant);
    assert_eq!(reply.text, "Hi Alice");

    gate.handle(GateEvent::Logout, &mut store).unwrap();
    gate.handle(GateEvent::login("alice", "pw1"), &mut store).unwrap();
    assert!(gate.chat().unwrap().transcript().is_empty());
}

#[test]
fn test_category_choice_keeps_current_model() {
    let catalog = ModelCatalog::builtin();
    let mut store = CredentialStore::in_memory();
    store
        .register(&Registration::new("alice", "Alice", "", "pw1"), 1)
        .unwrap();
    let mut gate = gate();
    gate.handle(GateEvent::login("alice", "pw1"), &mut store).unwrap();

    let chat = gate.chat_mut().unwrap();
    let before = chat.model().cloned();
    let header = CatalogEntry::Category("OpenAI Vision Models".into());
    let err = chat.select_model(&catalog, &header).unwrap_err();
    assert!(matches!(err, ChatError::CategorySelected(_)));
    assert_eq!(chat.model().cloned(), before);

    let vision = CatalogEntry::Model("gpt-4-vision-preview".into());
    assert!(chat.select_model(&catalog, &vision).unwrap().vision);
}
