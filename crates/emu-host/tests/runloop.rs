//! HostRunloop scenarios against the headless platform.

use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use emu_core::{
    AudioConfig, Button, ButtonSet, FrameOutcome, KeyCode, Machine, MachineError, VideoConfig,
};
use emu_host::{
    AudioBridge, DemoMachine, EmulationContext, ExitStatus, FrameBudget, GamepadButton,
    HeadlessPlatform, HostConfig, HostError, HostEvent, HostRunloop, InputBindingTable,
    LifecycleHooks, RendererSurface, RuntimeOptions, SessionReport, StopCause, WorkerFault,
};

fn options() -> RuntimeOptions {
    RuntimeOptions {
        width: 16,
        height: 8,
        video_sync: true,
        audio_sync: false,
        frame_queue_depth: 3,
        ..RuntimeOptions::default()
    }
}

fn context(options: &RuntimeOptions) -> EmulationContext {
    let surface = Arc::new(RendererSurface::from_options(options));
    let bridge = Arc::new(AudioBridge::from_options(options));
    EmulationContext::new(options.clone(), surface, bridge).unwrap()
}

fn run(
    platform: HeadlessPlatform,
    bindings: InputBindingTable,
    ctx: &mut EmulationContext,
) -> (SessionReport, HeadlessPlatform) {
    let options = ctx.options().clone();
    let mut runloop = HostRunloop::new(platform, bindings, &options);
    let report = runloop.run(ctx).unwrap();
    (report, runloop.into_platform())
}

/// Halts on the first frame that sees `button` held.
struct WaitForButton {
    button: Button,
    buttons: ButtonSet,
    frames: u64,
}

impl WaitForButton {
    fn new(button: Button) -> Self {
        Self {
            button,
            buttons: ButtonSet::EMPTY,
            frames: 0,
        }
    }
}

impl Machine for WaitForButton {
    fn name(&self) -> &str {
        "wait-for-button"
    }

    fn video_config(&self) -> VideoConfig {
        VideoConfig {
            width: 16,
            height: 8,
        }
    }

    fn audio_config(&self) -> AudioConfig {
        AudioConfig {
            sample_rate: 44_100,
            channels: 2,
        }
    }

    fn set_buttons(&mut self, buttons: ButtonSet) {
        self.buttons = buttons;
    }

    fn run_frame(&mut self) -> Result<FrameOutcome, MachineError> {
        self.frames += 1;
        if self.frames > 10_000 {
            return Err(MachineError::Other("button never arrived".into()));
        }
        std::thread::sleep(Duration::from_millis(1));
        Ok(if self.buttons.contains(self.button) {
            FrameOutcome::Halted
        } else {
            FrameOutcome::Continue
        })
    }

    fn render(&mut self, buffer: &mut [u8]) {
        buffer.fill(0x40);
    }

    fn drain_audio(&mut self, _out: &mut Vec<f32>) {}
}

#[test]
fn ten_frames_then_halt_presents_all_in_order() {
    let options = RuntimeOptions {
        poll_interval_ms: 50,
        ..options()
    };
    let cleaned_at = Arc::new(Mutex::new(None));
    let hooks = LifecycleHooks::new().on_clean({
        let cleaned_at = Arc::clone(&cleaned_at);
        move |_| *cleaned_at.lock().unwrap() = Some(Instant::now())
    });
    let mut ctx = context(&options).with_hooks(hooks);
    ctx.start(|info| Ok(DemoMachine::from_options(&info.options).halt_after(10)))
        .unwrap();

    let (report, platform) = run(HeadlessPlatform::new(), InputBindingTable::defaults(), &mut ctx);
    let returned_at = Instant::now();

    assert!(matches!(report.status, ExitStatus::Stopped(StopCause::MachineHalted)));
    assert_eq!(platform.presented(), (0..10).collect::<Vec<u64>>().as_slice());
    assert_eq!(report.frames_presented, 10);
    assert_eq!(report.frames_dropped, 0);
    assert!(report.platform_error.is_none());

    let cleaned_at = cleaned_at.lock().unwrap().expect("onClean ran");
    let lag = returned_at.duration_since(cleaned_at);
    assert!(
        lag < options.poll_interval(),
        "runloop returned {lag:?} after onClean"
    );
}

#[test]
fn fault_is_reported_not_raised() {
    let options = options();
    let mut ctx = context(&options);
    ctx.start(|info| Ok(DemoMachine::from_options(&info.options).fault_at(3)))
        .unwrap();

    let (report, platform) = run(HeadlessPlatform::new(), InputBindingTable::defaults(), &mut ctx);

    assert!(matches!(
        report.status,
        ExitStatus::Faulted(WorkerFault::Machine { frame: 3, .. })
    ));
    assert_eq!(platform.presented(), &[0, 1, 2]);
}

#[test]
fn quit_event_stops_the_session() {
    let options = options();
    let mut ctx = context(&options);
    ctx.start(|info| Ok(DemoMachine::from_options(&info.options)))
        .unwrap();

    let platform = HeadlessPlatform::new().event_at(5, HostEvent::Quit);
    let (report, platform) = run(platform, InputBindingTable::defaults(), &mut ctx);

    assert!(matches!(report.status, ExitStatus::Stopped(StopCause::HostRequest)));
    let presented = platform.presented();
    assert!(presented.windows(2).all(|w| w[0] < w[1]), "out of order: {presented:?}");
}

#[test]
fn key_press_reaches_the_machine() {
    let options = options();
    let mut ctx = context(&options);
    ctx.start(|_| Ok(WaitForButton::new(Button::A))).unwrap();

    // X is bound to A by default.
    let platform = HeadlessPlatform::new().event_at(
        2,
        HostEvent::Key {
            code: KeyCode::KeyX,
            pressed: true,
        },
    );
    let (report, _) = run(platform, InputBindingTable::defaults(), &mut ctx);

    assert!(matches!(report.status, ExitStatus::Stopped(StopCause::MachineHalted)));
    assert!(ctx.input().snapshot().is_empty(), "buttons released after the session");
}

#[test]
fn gamepad_press_uses_configured_binding() {
    let config = HostConfig::from_toml(
        r#"
        [bindings.gamepad]
        North = "Start"
        "#,
    )
    .unwrap();
    let options = options();
    let mut ctx = context(&options);
    ctx.start(|_| Ok(WaitForButton::new(Button::Start))).unwrap();

    let platform = HeadlessPlatform::new().event_at(
        1,
        HostEvent::Gamepad {
            button: GamepadButton::North,
            pressed: true,
        },
    );
    let (report, _) = run(platform, config.resolve_bindings(), &mut ctx);

    assert!(matches!(report.status, ExitStatus::Stopped(StopCause::MachineHalted)));
}

#[test]
fn present_failure_stops_and_still_joins() {
    let options = options();
    let mut ctx = context(&options);
    ctx.start(|info| Ok(DemoMachine::from_options(&info.options)))
        .unwrap();

    let platform = HeadlessPlatform::new().fail_present_after(2);
    let (report, platform) = run(platform, InputBindingTable::defaults(), &mut ctx);

    assert!(matches!(report.platform_error, Some(HostError::Present(_))));
    assert!(matches!(report.status, ExitStatus::Stopped(StopCause::HostRequest)));
    assert_eq!(platform.presented(), &[0, 1]);
    assert_eq!(report.frames_presented, 2);
}

#[test]
fn frame_budget_debugger_ends_the_session() {
    let options = options();
    let mut ctx = context(&options).with_debugger(FrameBudget::new(5));
    ctx.start(|info| Ok(DemoMachine::from_options(&info.options)))
        .unwrap();

    let (report, platform) = run(HeadlessPlatform::new(), InputBindingTable::defaults(), &mut ctx);

    assert!(matches!(report.status, ExitStatus::Stopped(StopCause::Debugger)));
    assert_eq!(platform.presented(), &[0, 1, 2, 3, 4]);
}

#[test]
fn without_video_sync_frames_may_drop_but_never_reorder() {
    let options = RuntimeOptions {
        video_sync: false,
        frame_queue_depth: 1,
        ..options()
    };
    let mut ctx = context(&options);
    ctx.start(|info| Ok(DemoMachine::from_options(&info.options).halt_after(200)))
        .unwrap();

    let (report, platform) = run(HeadlessPlatform::new(), InputBindingTable::defaults(), &mut ctx);

    let presented = platform.presented();
    assert!(presented.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(presented.last(), Some(&199), "the final frame is always drained");
    assert_eq!(report.frames_presented + report.frames_dropped, 200);
}

/// Run a session on a helper thread so a runloop that never returns fails
/// the test instead of hanging it.
fn run_bounded(mut ctx: EmulationContext) -> (Result<SessionReport, HostError>, EmulationContext) {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let options = ctx.options().clone();
        let mut runloop =
            HostRunloop::new(HeadlessPlatform::new(), InputBindingTable::defaults(), &options);
        let result = runloop.run(&mut ctx);
        let _ = tx.send((result, ctx));
    });
    rx.recv_timeout(Duration::from_secs(5))
        .expect("runloop never returned")
}

#[test]
fn panicking_on_start_hook_ends_the_runloop() {
    let options = options();
    let hooks = LifecycleHooks::new().on_start(|_| panic!("no display"));
    let mut ctx = context(&options).with_hooks(hooks);
    ctx.start(|info| Ok(DemoMachine::from_options(&info.options)))
        .unwrap();

    let (result, ctx) = run_bounded(ctx);
    let report = result.unwrap();

    assert!(matches!(
        report.status,
        ExitStatus::Faulted(WorkerFault::Hook { hook: "onStart", .. })
    ));
    assert_eq!(report.frames_presented, 0);
    assert_eq!(ctx.bridge().active_source(), None);
}

#[test]
fn panicking_on_clean_hook_ends_the_runloop() {
    let options = options();
    let hooks = LifecycleHooks::new().on_clean(|_| panic!("flush failed"));
    let mut ctx = context(&options).with_hooks(hooks);
    ctx.start(|info| Ok(DemoMachine::from_options(&info.options).halt_after(3)))
        .unwrap();

    let (result, ctx) = run_bounded(ctx);
    let report = result.unwrap();

    assert!(matches!(
        report.status,
        ExitStatus::Faulted(WorkerFault::Hook { hook: "onClean", .. })
    ));
    assert_eq!(report.frames_presented, 3);
    assert_eq!(ctx.bridge().active_source(), None);
}
