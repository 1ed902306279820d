use std::time::Duration;

use retryable_http::{Client, ClientOptions, Context, ErrorMode, RetryAfterBackoff};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let url = std::env::var("RETRYABLE_HTTP_URL").unwrap_or_else(|_| "https://example.com/".into());

    let client = Client::new()
        .with_options(ClientOptions {
            error_mode: ErrorMode::Passthrough,
            ..ClientOptions::from_env()?
        })
        .with_backoff(RetryAfterBackoff::<retryable_http::ExponentialBackoff>::default())
        .with_request_hook(|request, attempt| {
            eprintln!("attempt {attempt}: {} {}", request.method(), request.url());
        });

    let ctx = Context::new().timeout(Duration::from_secs(60));
    let request = retryable_http::Request::get(&url)?;
    let response = client.execute(&ctx, request).await?;

    println!("{} {}", response.status(), url);
    println!("{}", response.text().await?);

    Ok(())
}
