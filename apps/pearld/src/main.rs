use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use pearl_events::{EventHub, EventRecord, Workspace};
use pearl_protocol::{
    AoiId, Bounds, CheckpointAction, CheckpointId, GpuStatus, ModelId, Notice, PredictionsAction,
    Project, ProjectId, RestApi, SessionEvent,
};
use pearl_rest::{HttpRestClient, RestClientConfig};
use pearl_session::{Session, SessionBuilder, SessionConfig};
use pearl_transport::{TransportConfig, WsConnector};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "pearld")]
#[command(about = "PEARL instance session daemon")]
struct Cli {
    #[arg(long, env = "PEARL_API_URL", default_value = "http://localhost:2000")]
    api_url: String,
    #[arg(long, env = "PEARL_WS_URL", default_value = "ws://localhost:1999")]
    ws_url: String,
    #[arg(long, env = "PEARL_TOKEN", hide_env_values = true)]
    token: Option<String>,
    /// Samples required before a retrain is accepted.
    #[arg(long, env = "PEARL_MIN_SAMPLES", default_value_t = 10)]
    min_samples: usize,
    /// Send `ping#N` frames on this interval.
    #[arg(long, env = "PEARL_KEEPALIVE_SECS")]
    keepalive_secs: Option<u64>,
    /// Give up waiting for the instance after this many seconds.
    #[arg(long, env = "PEARL_WAIT_SECS", default_value_t = 900)]
    wait_secs: u64,
    #[arg(long)]
    log_json: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a model over a bounding box and stream predictions.
    Run {
        #[arg(long)]
        project_id: Option<u64>,
        #[arg(long)]
        model_id: u64,
        #[arg(long)]
        aoi_name: String,
        /// `min_lng,min_lat,max_lng,max_lat`
        #[arg(long, value_parser = parse_bbox)]
        bbox: Bounds,
    },
    /// Load a saved checkpoint on the project's instance.
    Checkpoint {
        #[arg(long)]
        project_id: u64,
        #[arg(long)]
        checkpoint_id: u64,
    },
    /// List the project's AOIs, or delete one.
    Aois {
        #[arg(long)]
        project_id: u64,
        #[arg(long)]
        delete: Option<u64>,
    },
}

fn parse_bbox(raw: &str) -> Result<Bounds, String> {
    let values = raw
        .split(',')
        .map(|part| part.trim().parse::<f64>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|error| format!("invalid coordinate: {error}"))?;
    let [min_lng, min_lat, max_lng, max_lat] = values[..] else {
        return Err(format!("expected 4 comma separated values, got {}", values.len()));
    };
    if min_lng >= max_lng || min_lat >= max_lat {
        return Err("bbox minimum must be below its maximum".to_owned());
    }
    Ok(Bounds::new([min_lng, min_lat], [max_lng, max_lat]))
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let mut rest_config = RestClientConfig::new(&cli.api_url);
    if let Some(token) = &cli.token {
        rest_config = rest_config.token(token);
    }
    let rest = Arc::new(HttpRestClient::new(rest_config).context("invalid api url")?);

    if let Command::Aois { project_id, delete } = &cli.command {
        let project_id = ProjectId::new(*project_id);
        return manage_aois(rest.as_ref(), project_id, delete.map(AoiId::new)).await;
    }

    let transport = TransportConfig::new(&cli.ws_url)
        .context("invalid websocket url")?
        .keepalive(cli.keepalive_secs.map(Duration::from_secs));
    let workspace = Arc::new(Workspace::new(EventHub::new(1024)));
    let session = SessionBuilder::new(
        Arc::new(WsConnector::new(transport)),
        workspace.clone(),
        workspace.clone(),
    )
    .rest_api(rest)
    .config(SessionConfig::default().min_sample_count(cli.min_samples))
    .build();

    let events = workspace.hub().subscribe();
    let wait = Duration::from_secs(cli.wait_secs);

    let outcome = match cli.command {
        Command::Run {
            project_id,
            model_id,
            aoi_name,
            bbox,
        } => {
            let model_id = ModelId::new(model_id);
            if let Some(project_id) = project_id {
                workspace.set_project(Some(Project {
                    id: ProjectId::new(project_id),
                    name: format!("project {project_id}"),
                    model_id: Some(model_id),
                }));
            }
            workspace.select_model(model_id);
            workspace.set_aoi(aoi_name, bbox);

            session
                .run_inference()
                .await
                .context("could not start inference")?;
            drive(&session, events, wait, Goal::Predictions).await
        }
        Command::Checkpoint {
            project_id,
            checkpoint_id,
        } => {
            session
                .apply_checkpoint(ProjectId::new(project_id), CheckpointId::new(checkpoint_id))
                .await
                .context("could not apply checkpoint")?;
            drive(&session, events, wait, Goal::Idle).await
        }
        Command::Aois { .. } => Ok(()),
    };

    let state = workspace.snapshot();
    if let Some(project) = &state.project {
        info!(project_id = %project.id, "project");
    }
    if let Some(checkpoint) = &state.checkpoint {
        info!(
            checkpoint_id = ?checkpoint.id,
            name = ?checkpoint.name,
            mode = ?checkpoint.mode,
            classes = checkpoint.classes.len(),
            "checkpoint"
        );
    }
    info!(
        tiles = state.predictions.data.predictions.len(),
        aoi_id = ?state.predictions.aoi_id,
        "predictions"
    );

    session.close();
    outcome
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Goal {
    /// Stop once the prediction stream completes.
    Predictions,
    /// Stop once the worker is ready with nothing queued.
    Idle,
}

async fn drive(
    session: &Session,
    mut events: broadcast::Receiver<EventRecord>,
    wait: Duration,
    goal: Goal,
) -> Result<()> {
    let deadline = tokio::time::sleep(wait);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            received = events.recv() => {
                let record = match received {
                    Ok(record) => record,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "event log lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => bail!("event hub closed"),
                };
                log_event(&record);
                match &record.event {
                    SessionEvent::Notice(Notice::Error(message)) => bail!("{message}"),
                    SessionEvent::Predictions(PredictionsAction::Complete)
                        if goal == Goal::Predictions =>
                    {
                        return Ok(());
                    }
                    SessionEvent::Status(status)
                        if goal == Goal::Idle
                            && status.gpu_status == GpuStatus::Ready
                            && session.queued_messages().is_empty() =>
                    {
                        return Ok(());
                    }
                    SessionEvent::Status(status)
                        if status.gpu_status == GpuStatus::Disconnected =>
                    {
                        bail!("instance disconnected");
                    }
                    _ => {}
                }
            }
            _ = tokio::signal::ctrl_c() => {
                warn!("interrupted; aborting job");
                session.abort_job(Vec::new());
                tokio::time::sleep(Duration::from_millis(250)).await;
                bail!("interrupted");
            }
            _ = &mut deadline => {
                session.abort_job(Vec::new());
                bail!("instance did not finish within {}s", wait.as_secs());
            }
        }
    }
}

fn log_event(record: &EventRecord) {
    match &record.event {
        SessionEvent::Status(status) => info!(
            sequence = record.sequence,
            gpu_status = ?status.gpu_status,
            ws = status.ws_connected,
            gpu = status.gpu_connected,
            message = %status.gpu_message,
            "instance status"
        ),
        SessionEvent::Predictions(PredictionsAction::Receive(_)) => {
            debug!(sequence = record.sequence, "prediction tile");
        }
        SessionEvent::Checkpoint(CheckpointAction::Receive { record: checkpoint, mode }) => info!(
            sequence = record.sequence,
            checkpoint_id = %checkpoint.id,
            name = %checkpoint.name,
            mode = ?mode,
            "checkpoint received"
        ),
        SessionEvent::Notice(Notice::ShowLoading { message, .. }) => {
            info!(sequence = record.sequence, %message, "loading");
        }
        event => debug!(sequence = record.sequence, ?event, "session event"),
    }
}

async fn manage_aois(
    rest: &dyn RestApi,
    project_id: ProjectId,
    delete: Option<AoiId>,
) -> Result<()> {
    if let Some(aoi_id) = delete {
        rest.delete_aoi(project_id, aoi_id)
            .await
            .with_context(|| format!("could not delete aoi {aoi_id}"))?;
        info!(project_id = %project_id, aoi_id = %aoi_id, "aoi deleted");
        return Ok(());
    }

    let aois = rest
        .get_aois(project_id)
        .await
        .context("could not list aois")?;
    for aoi in &aois {
        println!("{}\t{}", aoi.id, aoi.name);
    }
    info!(project_id = %project_id, total = aois.len(), "aois listed");
    Ok(())
}
