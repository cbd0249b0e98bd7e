use async_openai::Client;
use async_openai::config::OpenAIConfig;

/// API root for an OpenAI-compatible server, appending the `/v1` prefix unless present.
pub(crate) fn api_base(base_url: &str) -> String {
    let root = base_url.trim_end_matches('/');
    if root.ends_with("/v1") {
        root.to_string()
    } else {
        format!("{root}/v1")
    }
}

/// Build a client for the server at `base_url`.
///
/// Without an explicit key the client falls back to `OPENAI_API_KEY`.
pub(crate) fn create_client(
    base_url: &str,
    api_key: Option<&str>,
    user_agent: &str,
) -> Result<Client<OpenAIConfig>, reqwest::Error> {
    let mut config = OpenAIConfig::new().with_api_base(api_base(base_url));
    if let Some(key) = api_key.filter(|key| !key.is_empty()) {
        config = config.with_api_key(key);
    }
    let http = reqwest::Client::builder().user_agent(user_agent).build()?;
    Ok(Client::with_config(config).with_http_client(http))
}
