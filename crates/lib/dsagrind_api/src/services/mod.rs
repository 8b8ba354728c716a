//! Service wiring and HTTP-side helpers.

pub mod cookies;

use std::sync::Arc;

use dsagrind_core::auth::Collaborators;
use dsagrind_core::cache::KeyValueCache;
use dsagrind_core::email::{EmailSender, LogEmailSender};
use dsagrind_core::events::TracingEventSink;
use dsagrind_core::oauth::HttpOAuthClient;
use dsagrind_core::store::UserStore;
use tracing::info;

use crate::config::ApiConfig;

/// Production collaborators around `store` and `cache`: Brevo email when
/// configured (else logged), tracing events, HTTP OAuth.
pub fn default_collaborators(
    config: &ApiConfig,
    store: Arc<dyn UserStore>,
    cache: Arc<dyn KeyValueCache>,
) -> Collaborators {
    let email: Arc<dyn EmailSender> = match &config.brevo {
        Some(brevo) => {
            info!("sending email through Brevo");
            Arc::new(brevo.clone())
        }
        None => {
            info!("BREVO_API_KEY not set, email will be logged only");
            Arc::new(LogEmailSender)
        }
    };
    let oauth = HttpOAuthClient::new(config.oauth.clone(), cache.clone());
    Collaborators {
        store,
        cache,
        events: Arc::new(TracingEventSink),
        email,
        oauth: Arc::new(oauth),
    }
}
