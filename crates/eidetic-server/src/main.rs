//! Eidetic server: wires the engine together and serves HTTP.

mod http;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use eidetic_agents::{AnalystAgent, ChatModel, DesignerAgent, HttpChatModel, SynthesizerAgent};
use eidetic_core::Settings;
use eidetic_engine::{EventBus, Pipeline, VoiceRuntimeClient};
use eidetic_storage::ProjectStore;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::http::{handle_request, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = Arc::new(Settings::from_env());
    let state = Arc::new(build_state(settings.clone())?);

    let listener = TcpListener::bind(settings.listen)
        .await
        .with_context(|| format!("failed to bind {}", settings.listen))?;
    let bound = listener.local_addr().context("failed to read bound addr")?;
    info!(addr = %bound, data_dir = %settings.data_dir.display(), "eidetic listening");

    loop {
        let (stream, _peer) = listener.accept().await.context("accept failed")?;
        let io = TokioIo::new(stream);
        let state = state.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req| handle_request(req, state.clone()));
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!(error = %e, "connection error");
            }
        });
    }
}

fn build_state(settings: Arc<Settings>) -> Result<AppState> {
    let timeout = Duration::from_secs(settings.llm_timeout_secs);
    let backoff = Duration::from_millis(settings.llm_backoff_ms);

    let chat = |model: &str| -> Result<Arc<dyn ChatModel>> {
        Ok(Arc::new(
            HttpChatModel::new(
                &settings.llm_api_base,
                &settings.llm_api_key,
                model,
                timeout,
                settings.llm_max_retries,
                backoff,
            )
            .map_err(|e| anyhow!("{e}"))?,
        ))
    };

    let designer = DesignerAgent::new(
        chat(&settings.designer.model)?,
        settings.designer.temperature,
        settings.max_propositions_in_script,
        settings.max_interview_duration_minutes,
    );
    let analyst = AnalystAgent::new(chat(&settings.analyst.model)?, settings.analyst.temperature);
    let synthesizer = SynthesizerAgent::new(
        chat(&settings.synthesizer.model)?,
        settings.synthesizer.temperature,
    );

    let publisher = Arc::new(
        VoiceRuntimeClient::new(
            &settings.voice_api_base,
            &settings.voice_api_key,
            Duration::from_secs(20),
            settings.llm_max_retries,
            backoff,
        )
        .map_err(|e| anyhow!("{e}"))?,
    );

    let store = Arc::new(ProjectStore::open(&settings.data_dir)?);
    let bus = Arc::new(EventBus::new(settings.event_backlog));
    let pipeline = Arc::new(Pipeline::new(
        store.clone(),
        analyst,
        designer,
        publisher,
        bus.clone(),
        settings.clone(),
    ));

    Ok(AppState {
        settings,
        store,
        pipeline,
        synthesizer,
        bus,
    })
}
