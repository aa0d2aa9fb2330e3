use std::time::Duration;

use tokio::sync::watch;
use url::Url;

use crate::api::{RecordViewResponse, ViewCountResponse};

/// How long a visitor must stay on the page before the view is reported.
/// Immediate bounces never reach the server.
pub const DWELL_DELAY: Duration = Duration::from_secs(3);

/// The locally displayed counter state, mirrored into the UI.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewState {
    pub view_count: i64,
    pub is_loading: bool,
    pub error: Option<String>,
}

/// Tracks the view of a single post for as long as the page is visible.
///
/// Opening the tracker immediately fetches the current count for display, then
/// waits out the dwell delay before reporting the view. The reporting task is
/// tied to this handle's lifetime: dropping it (the visitor navigated away)
/// cancels a report that has not fired yet.
///
/// State updates are published through a [watch] channel; `is_new_view: true`
/// responses replace the displayed count with the server's authoritative
/// value, anything else leaves it untouched.
#[derive(Debug)]
pub struct PostViewTracker {
    state: watch::Receiver<ViewState>,
    task: tokio::task::JoinHandle<()>,
}

impl PostViewTracker {
    pub fn open(client: reqwest::Client, endpoint: Url, slug: impl Into<String>) -> Self {
        Self::with_dwell(client, endpoint, slug, DWELL_DELAY)
    }

    pub fn with_dwell(
        client: reqwest::Client,
        endpoint: Url,
        slug: impl Into<String>,
        dwell: Duration,
    ) -> Self {
        let (tx, state) = watch::channel(ViewState {
            is_loading: true,
            ..ViewState::default()
        });

        let task = tokio::spawn(report(client, endpoint, slug.into(), dwell, tx));

        Self { state, task }
    }

    pub fn state(&self) -> ViewState {
        self.state.borrow().clone()
    }

    /// A receiver for display components to await state changes on.
    pub fn subscribe(&self) -> watch::Receiver<ViewState> {
        self.state.clone()
    }
}

impl Drop for PostViewTracker {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn report(
    client: reqwest::Client,
    endpoint: Url,
    slug: String,
    dwell: Duration,
    tx: watch::Sender<ViewState>,
) {
    // a failed read degrades to "no count shown", it never blocks the page
    match fetch_count(&client, &endpoint, &slug).await {
        Ok(counts) => tx.send_modify(|state| {
            state.view_count = counts.view_count;
            state.is_loading = false;
        }),
        Err(error) => {
            tracing::debug!(%error, slug, "could not load the view count");
            tx.send_modify(|state| {
                state.is_loading = false;
                state.error = Some("failed to load view count".to_string());
            });
        }
    }

    tokio::time::sleep(dwell).await;

    match record_view(&client, &endpoint, &slug).await {
        Ok(recorded) if recorded.is_new_view => {
            tx.send_modify(|state| state.view_count = recorded.view_count);
        }
        Ok(_) => {}
        Err(error) => {
            // leave the displayed count as-is; the next page load retries
            tracing::debug!(%error, slug, "could not record the view");
        }
    }
}

async fn fetch_count(
    client: &reqwest::Client,
    endpoint: &Url,
    slug: &str,
) -> Result<ViewCountResponse, reqwest::Error> {
    client
        .get(endpoint.clone())
        .query(&[("slug", slug)])
        .send()
        .await?
        .error_for_status()?
        .json()
        .await
}

async fn record_view(
    client: &reqwest::Client,
    endpoint: &Url,
    slug: &str,
) -> Result<RecordViewResponse, reqwest::Error> {
    client
        .post(endpoint.clone())
        .query(&[("slug", slug)])
        .send()
        .await?
        .error_for_status()?
        .json()
        .await
}
