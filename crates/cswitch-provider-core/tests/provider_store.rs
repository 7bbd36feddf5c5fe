use std::path::PathBuf;

use cswitch_common::ClientKind;
use cswitch_provider_core::{
    FindingKind, GeminiProvider, ModelMapping, Provider, ProviderStore, RegistryError,
};

fn temp_dir() -> PathBuf {
    std::env::temp_dir().join(format!("cswitch-store-{}", uuid::Uuid::new_v4()))
}

fn provider(id: i64, name: &str) -> Provider {
    Provider {
        id,
        name: name.to_string(),
        api_url: format!("https://{name}.example.invalid"),
        api_key: "sk-test".to_string(),
        enabled: true,
        level: Some(1),
        ..Default::default()
    }
}

#[tokio::test]
async fn missing_file_yields_default_list() {
    let store = ProviderStore::new(temp_dir());
    let providers = store.load(ClientKind::Claude).await.unwrap();
    assert_eq!(providers.len(), 1);
    assert_eq!(providers[0].id, 1);

    let gemini = store.load_gemini().await.unwrap();
    assert_eq!(gemini.len(), 1);
}

#[tokio::test]
async fn empty_file_yields_default_list() {
    let dir = temp_dir();
    tokio::fs::create_dir_all(&dir).await.unwrap();
    tokio::fs::write(dir.join("codex.json"), b"  \n").await.unwrap();
    let store = ProviderStore::new(&dir);
    let providers = store.load(ClientKind::Codex).await.unwrap();
    assert_eq!(providers[0].api_url, "https://api.openai.com/v1");
}

#[tokio::test]
async fn save_then_load_round_trips_envelope() {
    let dir = temp_dir();
    let store = ProviderStore::new(&dir);
    let mut p = provider(1, "alpha");
    p.supported_models.insert("claude-*".to_string(), true);
    p.model_mapping = [("sonnet", "claude-sonnet-4")].into_iter().collect::<ModelMapping>();
    store.save(ClientKind::Claude, &[p.clone(), provider(2, "beta")]).await.unwrap();

    let raw = tokio::fs::read_to_string(dir.join("claude-code.json")).await.unwrap();
    assert!(raw.contains("\"providers\""));
    assert!(raw.contains("\"apiUrl\""));
    assert!(!dir.join("claude-code.json.tmp").exists());

    let loaded = store.load(ClientKind::Claude).await.unwrap();
    assert_eq!(loaded.len(), 2);
    assert_eq!(loaded[0], p);
}

#[tokio::test]
async fn invalid_provider_aborts_whole_save() {
    let dir = temp_dir();
    let store = ProviderStore::new(&dir);
    store.save(ClientKind::Codex, &[provider(1, "ok")]).await.unwrap();

    let mut bad = provider(2, "bad");
    bad.supported_models.insert("gpt-5".to_string(), true);
    bad.model_mapping.insert("gpt-4", "gpt-4o");
    let err = store
        .save(ClientKind::Codex, &[provider(1, "ok"), bad])
        .await
        .unwrap_err();
    match err {
        RegistryError::Invalid(report) => {
            assert_eq!(report.providers.len(), 1);
            assert_eq!(report.providers[0].provider, "bad");
            assert_eq!(
                report.providers[0].findings[0].kind,
                FindingKind::UnsupportedMappingTarget
            );
        }
        other => panic!("unexpected error: {other}"),
    }

    let loaded = store.load(ClientKind::Codex).await.unwrap();
    assert_eq!(loaded.len(), 1);
}

#[tokio::test]
async fn warnings_also_reject_save() {
    let store = ProviderStore::new(temp_dir());
    let mut mapped = provider(1, "mapped");
    mapped.model_mapping.insert("claude-*", "vendor/claude-*");
    let err = store.save(ClientKind::Claude, &[mapped]).await.unwrap_err();
    let RegistryError::Invalid(report) = err else {
        panic!("unexpected error: {err}");
    };
    assert_eq!(
        report.providers[0].findings[0].kind,
        FindingKind::MappingWithoutWhitelist
    );
}

#[tokio::test]
async fn duplicate_clones_disabled_with_next_id() {
    let store = ProviderStore::new(temp_dir());
    let mut source = provider(7, "alpha");
    source.supported_models.insert("a".to_string(), true);
    source.model_mapping.insert("b", "a");
    store
        .save(ClientKind::Claude, &[provider(3, "zeta"), source.clone()])
        .await
        .unwrap();

    let copy = store.duplicate(ClientKind::Claude, 7).await.unwrap();
    assert_eq!(copy.id, 8);
    assert_eq!(copy.name, "alpha (copy)");
    assert!(!copy.enabled);
    assert_eq!(copy.model_mapping, source.model_mapping);
    assert_eq!(copy.supported_models, source.supported_models);

    let loaded = store.load(ClientKind::Claude).await.unwrap();
    assert_eq!(loaded.len(), 3);
    assert!(loaded[0].enabled && loaded[1].enabled);

    assert!(matches!(
        store.duplicate(ClientKind::Claude, 99).await,
        Err(RegistryError::NotFound(99))
    ));
}

#[tokio::test]
async fn gemini_kind_uses_its_own_api() {
    let store = ProviderStore::new(temp_dir());
    assert!(matches!(
        store.load(ClientKind::Gemini).await,
        Err(RegistryError::UnsupportedKind(ClientKind::Gemini))
    ));
    let entry = GeminiProvider {
        id: "g1".to_string(),
        name: "g".to_string(),
        base_url: "https://g.example.invalid".to_string(),
        api_key: "k".to_string(),
        enabled: true,
        ..Default::default()
    };
    store.save_gemini(&[entry.clone()]).await.unwrap();
    assert_eq!(store.load_gemini().await.unwrap(), vec![entry]);
}
