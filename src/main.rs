// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{crate_version, Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use stepseq::audio;
use stepseq::config::{EngineConfig, Kit};
use stepseq::controller::{keyboard, Controller};
use stepseq::engine::{Engine, EngineEvent, PlayOptions};
use stepseq::pattern::SampleLibrary;
use stepseq::samples::{
    self, FileFetcher, SampleDecoder, SampleFetcher, SymphoniaDecoder, DEFAULT_WAVEFORM_POINTS,
};
use stepseq::transport::Transport;

/// Sample rate waveform summaries are decoded at. Only the shape matters.
const WAVEFORM_SAMPLE_RATE: u32 = 44100;

/// Extra time a preview waits past the end of the sample before shutting down.
const PREVIEW_TAIL: Duration = Duration::from_millis(200);

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "A look-ahead step sequencer."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lists the available audio output devices.
    Devices {},
    /// Plays a kit's pattern and reads transport commands from stdin.
    Play {
        /// The path to the engine config.
        engine_path: PathBuf,
        /// The path to the kit.
        kit_path: PathBuf,
    },
    /// Plays a single sample from a kit.
    Preview {
        /// The path to the engine config.
        engine_path: PathBuf,
        /// The path to the kit.
        kit_path: PathBuf,
        /// The sample to play.
        sample_id: String,
        /// Linear gain.
        #[arg(short, long)]
        volume: Option<f32>,
        /// Stereo position from -1 (left) to 1 (right).
        #[arg(short, long, allow_hyphen_values = true)]
        pan: Option<f32>,
    },
    /// Prints the waveform summary of a sample from a kit.
    Waveform {
        /// The path to the kit.
        kit_path: PathBuf,
        /// The sample to summarize.
        sample_id: String,
        /// The number of points to print.
        #[arg(short = 'n', long, default_value_t = DEFAULT_WAVEFORM_POINTS)]
        points: usize,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Devices {} => {
            let devices = audio::list_devices()?;

            if devices.is_empty() {
                println!("No devices found.");
                return Ok(());
            }

            println!("Devices:");
            for device in devices {
                println!("- {}", device);
            }
        }
        Commands::Play {
            engine_path,
            kit_path,
        } => {
            let (engine, kit) = load_engine(&engine_path, &kit_path)?;
            let transport = Arc::new(Transport::new(engine.clone()));
            transport.set_pattern(kit.pattern())?;

            let reporter = report_events(&engine);
            if !transport.play().await? {
                println!("Pattern {} has nothing to play.", kit.pattern().name());
            }

            let mut controller =
                Controller::new(transport.clone(), Arc::new(keyboard::Driver::new()));
            controller.join().await?;

            transport.stop();
            engine.shutdown();
            reporter.abort();
        }
        Commands::Preview {
            engine_path,
            kit_path,
            sample_id,
            volume,
            pan,
        } => {
            let (engine, kit) = load_engine(&engine_path, &kit_path)?;
            let Some(sample) = kit.library().sample(&sample_id) else {
                return Err(format!("unknown sample {}", sample_id).into());
            };

            let buffer = engine.load_sample(&sample).await?;
            engine
                .play_sample(&sample_id, PlayOptions { volume, pan })
                .await?;
            info!(sample = %sample, duration = ?buffer.duration(), "Previewing");

            tokio::time::sleep(buffer.duration() + PREVIEW_TAIL).await;
            println!("Peak level: {:.3}", engine.analysis());
            engine.shutdown();
        }
        Commands::Waveform {
            kit_path,
            sample_id,
            points,
        } => {
            let kit = Kit::deserialize(&kit_path)?;
            let Some(sample) = kit.library().sample(&sample_id) else {
                return Err(format!("unknown sample {}", sample_id).into());
            };

            let bytes = FileFetcher::new(kit.base_path()).fetch(sample.source())?;
            let buffer = SymphoniaDecoder::new(WAVEFORM_SAMPLE_RATE)
                .decode(bytes, samples::extension_hint(sample.source()))?;

            println!("{} ({:?}):", sample, buffer.duration());
            for point in Engine::generate_waveform_data(&buffer, points) {
                println!("{:.4}", point);
            }
        }
    }

    Ok(())
}

/// Loads the engine config and kit and creates an engine reading the kit's samples.
fn load_engine(
    engine_path: &Path,
    kit_path: &Path,
) -> Result<(Arc<Engine>, Kit), Box<dyn Error>> {
    let config = EngineConfig::deserialize(engine_path)?;
    let kit = Kit::deserialize(kit_path)?;
    let library: Arc<dyn SampleLibrary> = Arc::new(kit.library());
    let engine = Engine::with_files(&config, library, kit.base_path())?;
    Ok((Arc::new(engine), kit))
}

/// Logs engine events until the engine goes away.
fn report_events(engine: &Engine) -> tokio::task::JoinHandle<()> {
    let mut events = engine.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(EngineEvent::SampleLoadFailed(e)) => {
                    warn!(sample = e.sample_id(), error = e.message(), "Sample failed to load")
                }
                Ok(EngineEvent::SampleUnavailable(sample_id)) => {
                    warn!(sample = %sample_id, "Pattern references an unknown sample")
                }
                Err(RecvError::Lagged(missed)) => warn!(missed, "Missed engine events"),
                Err(RecvError::Closed) => return,
            }
        }
    })
}
