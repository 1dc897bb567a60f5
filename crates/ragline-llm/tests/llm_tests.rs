use ragline_core::config::LlmSettings;
use ragline_core::{ChatMessage, CompletionOptions, Error, LanguageModel};
use ragline_llm::get_default_model;

#[tokio::test]
async fn echo_provider_from_settings() {
    let settings = LlmSettings { provider: "echo".into(), model_name: "local".into(), ..LlmSettings::default() };
    let model = get_default_model(&settings).expect("model");
    let options = settings.completion_options();
    let reply = model
        .chat(&[ChatMessage::system("sys"), ChatMessage::user("hello there")], &options)
        .await
        .expect("reply");
    assert_eq!(reply, "[local] hello there");
}

#[test]
fn unknown_provider_is_a_config_error() {
    let settings = LlmSettings { provider: "parrot".into(), ..LlmSettings::default() };
    assert!(matches!(get_default_model(&settings), Err(Error::InvalidConfig(_))));
}

#[tokio::test]
async fn echo_rejects_zero_max_tokens() {
    let settings = LlmSettings { provider: "echo".into(), ..LlmSettings::default() };
    let model = get_default_model(&settings).expect("model");
    let options = CompletionOptions { max_output_tokens: 0, ..CompletionOptions::default() };
    assert!(matches!(model.complete("x", &options).await, Err(Error::InvalidConfig(_))));
}
