//! Local stand-ins for the identity provider used by unit tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::Router;
use axum::extract::Form;
use axum::http::StatusCode;
use axum::routing::post;
use tokio::net::TcpListener;

/// Serve `app` on an ephemeral localhost port and return its base URL.
pub(crate) async fn serve(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

/// Form bodies received by a stub token endpoint, in arrival order.
#[derive(Clone, Default)]
pub(crate) struct Recorded(Arc<Mutex<Vec<HashMap<String, String>>>>);

impl Recorded {
    pub(crate) fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }

    pub(crate) fn get(&self, index: usize) -> HashMap<String, String> {
        self.0.lock().unwrap()[index].clone()
    }

    fn push(&self, form: HashMap<String, String>) {
        self.0.lock().unwrap().push(form);
    }
}

/// Start a token endpoint at `{base}/token` whose responses come from `respond`.
pub(crate) async fn stub_token_endpoint<F>(respond: F) -> (String, Recorded)
where
    F: Fn(&HashMap<String, String>) -> (StatusCode, String) + Clone + Send + Sync + 'static,
{
    let recorded = Recorded::default();
    let sink = recorded.clone();
    let app = Router::new().route(
        "/token",
        post(move |Form(form): Form<HashMap<String, String>>| {
            let respond = respond.clone();
            let sink = sink.clone();
            async move {
                let (status, body) = respond(&form);
                sink.push(form);
                (
                    status,
                    [(axum::http::header::CONTENT_TYPE, "application/json")],
                    body,
                )
            }
        }),
    );
    let base = serve(app).await;
    (format!("{base}/token"), recorded)
}

/// Events recorded by [`capture_logs`] as `(level, message)`.
#[derive(Clone, Default)]
pub(crate) struct CapturedLogs(Arc<Mutex<Vec<(tracing::Level, String)>>>);

impl CapturedLogs {
    pub(crate) fn has(&self, level: tracing::Level, needle: &str) -> bool {
        self.0
            .lock()
            .unwrap()
            .iter()
            .any(|(l, message)| *l == level && message.contains(needle))
    }
}

struct CaptureLayer(CapturedLogs);

struct MessageVisitor(String);

impl tracing::field::Visit for MessageVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0 = format!("{value:?}");
        }
    }
}

impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for CaptureLayer {
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let mut visitor = MessageVisitor(String::new());
        event.record(&mut visitor);
        self.0
            .0
            .lock()
            .unwrap()
            .push((*event.metadata().level(), visitor.0));
    }
}

/// Capture events on the current thread until the guard is dropped.
pub(crate) fn capture_logs() -> (CapturedLogs, tracing::subscriber::DefaultGuard) {
    use tracing_subscriber::layer::SubscriberExt;

    let logs = CapturedLogs::default();
    let subscriber = tracing_subscriber::registry().with(CaptureLayer(logs.clone()));
    (logs, tracing::subscriber::set_default(subscriber))
}
