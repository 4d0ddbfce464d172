use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tokio::sync::broadcast::error::RecvError;

use phoneclaw::agent_engine::engine::AgentEngine;
use phoneclaw::agent_engine::state::{LoopConfig, TaskOutcome};
use phoneclaw::commands::OperatorConsole;
use phoneclaw::config::load_config;
use phoneclaw::errors::PhoneClawResult;
use phoneclaw::executor::action::ActionExecutor;
use phoneclaw::executor::coordinator::{CoordinateNormalizer, DeviceBounds};
use phoneclaw::executor::input::EnigoInput;
use phoneclaw::perception::pipeline::Perceiver;
use phoneclaw::perception::postprocess::DetectionPostprocessor;
use phoneclaw::perception::screenshot::MonitorCapture;
use phoneclaw::perception::traits::ObjectDetector;
use phoneclaw::perception::yolo_detector::YoloDetector;

/// Drive a mirrored phone display: observe, decide, act.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Task handed to the decision maker
    #[arg(long, value_name = "TEXT")]
    goal: String,

    /// Config file (defaults to PHONECLAW_CONFIG or the usual search path)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// ONNX detector model, overrides `detector.model_path`
    #[arg(long, value_name = "FILE")]
    model: Option<String>,

    /// Monitor showing the mirror window, overrides `capture.monitor_index`
    #[arg(long, value_name = "INDEX")]
    monitor: Option<usize>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    phoneclaw::init_tracing();
    let args = Args::parse();

    match run(args).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            tracing::error!(error = %e, "phoneclaw failed");
            ExitCode::from(2)
        }
    }
}

async fn run(args: Args) -> PhoneClawResult<bool> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some(model) = args.model {
        config.detector.model_path = Some(model);
    }
    if let Some(monitor) = args.monitor {
        config.capture.monitor_index = monitor;
    }

    let detector = YoloDetector::try_new(&config.detector).map(|d| Box::new(d) as Box<dyn ObjectDetector>);
    if detector.is_none() {
        tracing::warn!("running without a detector, observations carry no targets");
    }
    let perceiver = Perceiver::new(
        Box::new(MonitorCapture::new(&config.capture)),
        detector,
        DetectionPostprocessor::new(&config.detection),
        CoordinateNormalizer::new(DeviceBounds::from(&config.device)),
    );
    let executor = ActionExecutor::new(Box::new(EnigoInput::connect()?), &config.device, &config.executor);
    let mut engine = AgentEngine::new(
        perceiver,
        executor,
        Box::new(OperatorConsole::stdio()),
        LoopConfig::from(&config.session),
    );

    let handle = engine.handle();
    let mut events = handle.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => tracing::debug!(event = ?event, "session event"),
                Err(RecvError::Lagged(missed)) => tracing::warn!(missed, "event log lagging"),
                Err(RecvError::Closed) => break,
            }
        }
    });
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("ctrl-c, stopping at the next boundary");
            handle.stop();
        }
    });

    tracing::info!(session = %engine.id(), "session starting");
    let outcome = engine.run_task(&args.goal).await;
    println!("{}", serde_json::to_string_pretty(&outcome)?);

    Ok(matches!(outcome, TaskOutcome::Done { success: true, .. }))
}
