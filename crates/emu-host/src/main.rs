//! Host frontend binary.
//!
//! Runs the demo machine in a window with sound, or headless for a fixed
//! number of frames.

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use emu_host::{
    AudioBridge, DemoMachine, EmulationContext, ExitStatus, FrameBudget, HeadlessPlatform,
    HostConfig, HostError, HostRunloop, LifecycleHooks, RendererSurface, RuntimeOptions,
    SessionReport, load_config,
};
use tracing::info;

/// Frames a headless run lasts when `--frames` is not given.
const HEADLESS_FRAMES: u64 = 200;

/// Process exit code for a session that ended in a fault.
const EXIT_FAULTED: i32 = 2;

// ---------------------------------------------------------------------------
// CLI argument parsing
// ---------------------------------------------------------------------------

struct CliArgs {
    config: Option<PathBuf>,
    headless: bool,
    frames: Option<u64>,
    scale: Option<u32>,
    video_sync: bool,
    no_audio_sync: bool,
    fault_at: Option<u64>,
}

fn parse_args() -> CliArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut cli = CliArgs {
        config: None,
        headless: false,
        frames: None,
        scale: None,
        video_sync: false,
        no_audio_sync: false,
        fault_at: None,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                i += 1;
                cli.config = args.get(i).map(PathBuf::from);
            }
            "--headless" => {
                cli.headless = true;
            }
            "--frames" => {
                i += 1;
                cli.frames = args.get(i).map(|s| parse_number(s, "--frames"));
            }
            "--scale" => {
                i += 1;
                cli.scale = args.get(i).map(|s| parse_number(s, "--scale"));
            }
            "--video-sync" => {
                cli.video_sync = true;
            }
            "--no-audio-sync" => {
                cli.no_audio_sync = true;
            }
            "--fault-at" => {
                i += 1;
                cli.fault_at = args.get(i).map(|s| parse_number(s, "--fault-at"));
            }
            "--help" | "-h" => {
                eprintln!("Usage: emu-host [OPTIONS]");
                eprintln!();
                eprintln!("Options:");
                eprintln!("  --config <file>   TOML options and key bindings");
                eprintln!("  --headless        Run without a window or audio device");
                eprintln!(
                    "  --frames <n>      Stop after n frames [headless default: {HEADLESS_FRAMES}]"
                );
                eprintln!("  --scale <n>       Window scale factor");
                eprintln!("  --video-sync      Pace emulation to presentation");
                eprintln!("  --no-audio-sync   Do not pace emulation to the audio device");
                eprintln!("  --fault-at <n>    Make the demo machine fault on frame n");
                eprintln!();
                eprintln!("Set RUST_LOG to change log verbosity (default: info).");
                process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {other}");
                process::exit(1);
            }
        }
        i += 1;
    }

    cli
}

fn parse_number<T: std::str::FromStr>(s: &str, flag: &str) -> T {
    s.parse().unwrap_or_else(|_| {
        eprintln!("{flag} expects a number, got {s:?}");
        process::exit(1);
    })
}

// ---------------------------------------------------------------------------
// Session setup
// ---------------------------------------------------------------------------

fn load_host_config(cli: &CliArgs) -> HostConfig {
    let mut config = match &cli.config {
        Some(path) => match load_config(path) {
            Ok(config) => {
                info!(path = %path.display(), "configuration loaded");
                config
            }
            Err(e) => {
                report_error(&e);
                process::exit(1);
            }
        },
        None => HostConfig::default(),
    };

    let options = &mut config.options;
    if let Some(scale) = cli.scale {
        options.scale = scale;
    }
    if cli.video_sync {
        options.video_sync = true;
    }
    if cli.no_audio_sync {
        options.audio_sync = false;
    }
    if let Err(e) = options.validate() {
        report_error(&e);
        process::exit(1);
    }
    config
}

/// Build the context and start the demo machine on its worker.
fn start_session(
    options: &RuntimeOptions,
    bridge: Arc<AudioBridge>,
    frames: Option<u64>,
    fault_at: Option<u64>,
) -> Result<EmulationContext, HostError> {
    let surface = Arc::new(RendererSurface::from_options(options));
    let hooks = LifecycleHooks::new()
        .on_start(|ctx| {
            info!(session = ctx.session, machine = ?ctx.machine, "machine started");
        })
        .on_clean(|ctx| {
            info!(session = ctx.session, "machine cleaned up");
        });

    let mut ctx = EmulationContext::new(options.clone(), surface, bridge)?.with_hooks(hooks);
    if let Some(frames) = frames {
        ctx = ctx.with_debugger(FrameBudget::new(frames));
    }

    ctx.start(move |info| {
        let mut machine = DemoMachine::from_options(&info.options);
        if let Some(frame) = fault_at {
            machine = machine.fault_at(frame);
        }
        Ok(machine)
    })?;
    Ok(ctx)
}

// ---------------------------------------------------------------------------
// Headless mode
// ---------------------------------------------------------------------------

fn run_headless(cli: &CliArgs, config: &HostConfig) -> Result<SessionReport, HostError> {
    let mut options = config.options.clone();
    // Nothing drains the bridge without a device.
    options.audio_sync = false;

    let bridge = Arc::new(AudioBridge::from_options(&options));
    let frames = cli.frames.unwrap_or(HEADLESS_FRAMES);
    let mut ctx = start_session(&options, bridge, Some(frames), cli.fault_at)?;

    let mut runloop = HostRunloop::new(HeadlessPlatform::new(), config.resolve_bindings(), &options);
    let report = runloop.run(&mut ctx)?;

    let platform = runloop.platform();
    println!(
        "frames={} checksum={:016x}",
        platform.presented().len(),
        platform.checksum()
    );
    Ok(report)
}

// ---------------------------------------------------------------------------
// Windowed mode (winit + pixels + cpal)
// ---------------------------------------------------------------------------

#[cfg(feature = "native")]
fn run_windowed(cli: &CliArgs, config: &HostConfig) -> Result<SessionReport, HostError> {
    use emu_host::Viewport;
    use emu_host::native::{AudioOutput, WindowPlatform};

    let options = &config.options;
    let viewport = Viewport {
        width: options.width,
        height: options.height,
        scale: options.scale,
    };
    let platform = WindowPlatform::open("emu-host", viewport, options.fullscreen)?;

    let bridge = Arc::new(AudioBridge::from_options(options));
    let _audio = AudioOutput::open(&bridge, options)?;

    let mut ctx = start_session(options, bridge, cli.frames, cli.fault_at)?;
    let mut runloop = HostRunloop::new(platform, config.resolve_bindings(), options);
    runloop.run(&mut ctx)
}

#[cfg(not(feature = "native"))]
fn run_windowed(_cli: &CliArgs, _config: &HostConfig) -> Result<SessionReport, HostError> {
    Err(HostError::Startup(emu_host::StartupError::Video(
        "built without the `native` feature; use --headless".into(),
    )))
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn report_error(err: &dyn std::error::Error) {
    eprintln!("Error: {err}");
    let mut source = err.source();
    while let Some(cause) = source {
        eprintln!("  caused by: {cause}");
        source = cause.source();
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = parse_args();
    let config = load_host_config(&cli);

    let result = if cli.headless {
        run_headless(&cli, &config)
    } else {
        run_windowed(&cli, &config)
    };

    match result {
        Ok(report) => {
            if let Some(err) = &report.platform_error {
                report_error(err);
            }
            if let ExitStatus::Faulted(fault) = &report.status {
                report_error(fault);
                process::exit(EXIT_FAULTED);
            }
        }
        Err(e) => {
            report_error(&e);
            process::exit(1);
        }
    }
}
