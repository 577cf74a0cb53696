//! Provider integration tests: real API calls.
//!
//! These tests are skipped when the corresponding API key env var is not set.
//! Run with: `cargo test -p voxbridge-providers --test integration`

use voxbridge_providers::{CompletionClient, OpenAiCompletionClient};

fn openai_key() -> Option<String> {
    std::env::var("OPENAI_API_KEY")
        .ok()
        .filter(|k| !k.is_empty())
}

#[tokio::test]
async fn test_openai_completion() {
    let Some(api_key) = openai_key() else {
        eprintln!("Skipping: OPENAI_API_KEY not set");
        return;
    };

    let client = OpenAiCompletionClient::new("https://api.openai.com", "gpt-4o-mini", Some(api_key));
    let text = client
        .complete("Reply with exactly the word 'hello'.")
        .await;

    assert!(
        text.to_lowercase().contains("hello"),
        "Expected 'hello' in response, got: {text}"
    );
    assert_eq!(text, text.trim());
}

#[tokio::test]
async fn test_openai_bad_key_degrades_to_empty() {
    if openai_key().is_none() {
        eprintln!("Skipping: OPENAI_API_KEY not set");
        return;
    }

    let client = OpenAiCompletionClient::new(
        "https://api.openai.com",
        "gpt-4o-mini",
        Some("sk-invalid".into()),
    );
    assert_eq!(client.complete("hello").await, "");
}
