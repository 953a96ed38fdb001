use anyhow::{Context, Result};
use google_analytics3::{hyper, hyper_rustls, oauth2, Analytics};
use tracing::{info, debug};
use crate::analytics::AnalyticsHub;
use crate::cfg::{AuthConfig, AuthMethod};

pub async fn create_analytics_hub(auth: &AuthConfig) -> Result<AnalyticsHub> {
    info!("Initializing Google Analytics authentication");

    let https = hyper_rustls::HttpsConnectorBuilder::new()
        .with_native_roots()?
        .https_or_http()
        .enable_http1()
        .build();
    let client = hyper::Client::builder().build::<_, hyper::Body>(https);

    let hub = match auth.method {
        AuthMethod::Installed => {
            let secret = oauth2::read_application_secret(&auth.client_secrets)
                .await
                .with_context(|| format!("Could not read client secrets from {}", auth.client_secrets))?;

            let return_method = if auth.interactive {
                oauth2::InstalledFlowReturnMethod::Interactive
            } else {
                oauth2::InstalledFlowReturnMethod::HTTPRedirect
            };
            debug!("Using token cache {}", auth.token_cache);

            let authenticator = oauth2::InstalledFlowAuthenticator::builder(secret, return_method)
                .persist_tokens_to_disk(&auth.token_cache)
                .build()
                .await
                .context("Could not build installed-flow authenticator")?;
            Analytics::new(client, authenticator)
        }
        AuthMethod::ServiceAccount => {
            let key = oauth2::read_service_account_key(&auth.service_account_key)
                .await
                .with_context(|| format!("Could not read service account key from {}", auth.service_account_key))?;

            let authenticator = oauth2::ServiceAccountAuthenticator::builder(key)
                .build()
                .await
                .context("Could not build service account authenticator")?;
            Analytics::new(client, authenticator)
        }
    };

    info!(method = ?auth.method, "Authentication configured");
    Ok(hub)
}
