use std::io::{self, BufRead};
use std::sync::Arc;

use anyhow::Result;
use log::{error, info, warn};

use myo_rs::myo_client::{MyoClient, MyoClientConfig};
use myo_rs::types::{
    ClassifierEvent, MotionEvent, MyoEvent, Rgb, SleepMode, StreamModes, UnlockType,
    VibrationStep, VibrationType,
};

#[tokio::main]
async fn main() -> Result<()> {
    // ── Logging ───────────────────────────────────────────────────────────────
    // Set RUST_LOG=debug for verbose output, e.g.:
    //   RUST_LOG=myo_rs=debug cargo run
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // ── Connect ───────────────────────────────────────────────────────────────
    let client = MyoClient::new(MyoClientConfig::default());

    info!("Looking for a Myo armband …");
    let device = client.find_first().await?;
    let myo = Arc::new(device.into_myo());
    let mut rx = myo.events();

    myo.connect().await?;

    match myo.read_firmware_version().await {
        Ok(fw) => info!(
            "Firmware {}.{}.{} ({:?})",
            fw.major, fw.minor, fw.patch, fw.hardware_rev
        ),
        Err(e) => warn!("Firmware version unavailable: {e}"),
    }
    match myo.read_battery().await {
        Ok(level) => info!("Battery {}%", level.percent()),
        Err(e) => warn!("Battery read failed: {e}"),
    }

    myo.set_sleep_mode(SleepMode::NeverSleep).await?;
    myo.arm(StreamModes::all()).await?;
    myo.vibrate(VibrationType::Short).await?;

    // ── Keyboard commands ─────────────────────────────────────────────────────
    println!(
        "Commands: v = vibrate, p = pattern, l = LED, u = unlock, d = disarm, a = arm, q = quit"
    );

    let (line_tx, mut line_rx) = tokio::sync::mpsc::unbounded_channel::<String>();
    std::thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(l) => {
                    if line_tx.send(l.trim().to_owned()).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });

    let myo_cmd = Arc::clone(&myo);
    tokio::spawn(async move {
        while let Some(line) = line_rx.recv().await {
            let result = match line.as_str() {
                "" => continue,
                "q" => {
                    info!("Quit requested.");
                    myo_cmd.disconnect().await
                }
                "v" => myo_cmd.vibrate(VibrationType::Medium).await,
                "p" => {
                    let steps = [
                        VibrationStep {
                            duration_ms: 150,
                            strength: 255,
                        },
                        VibrationStep {
                            duration_ms: 100,
                            strength: 0,
                        },
                        VibrationStep {
                            duration_ms: 150,
                            strength: 128,
                        },
                    ];
                    myo_cmd.vibrate_pattern(&steps).await
                }
                "l" => {
                    myo_cmd
                        .set_led(Rgb::new(0, 120, 255), Rgb::new(255, 80, 0))
                        .await
                }
                "u" => myo_cmd.unlock(UnlockType::Hold).await,
                "d" => myo_cmd.disarm().await,
                "a" => myo_cmd.arm(StreamModes::all()).await,
                cmd => {
                    warn!("Unknown command: '{cmd}'");
                    Ok(())
                }
            };
            if let Err(e) = result {
                error!("'{line}' failed: {e}");
            }
        }
    });

    // ── Main event loop ───────────────────────────────────────────────────────
    loop {
        let event = tokio::select! {
            event = rx.recv() => event,
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C, disconnecting …");
                if let Err(e) = myo.disconnect().await {
                    warn!("Disconnect failed: {e}");
                }
                break;
            }
        };
        let Some(event) = event else { break };

        match event {
            MyoEvent::Connected(name) => {
                info!("✅  Connected to: {name}");
            }
            MyoEvent::Disconnected => {
                info!("❌  Disconnected from device.");
                break;
            }
            MyoEvent::Faulted(reason) => {
                error!("Session faulted: {reason}");
                break;
            }

            // ── EMG ──────────────────────────────────────────────────────────
            MyoEvent::Emg { channel, sample } => {
                // One line per 50 frames per characteristic keeps the terminal readable.
                if sample.sequence % 50 == 0 {
                    println!(
                        "[EMG]   {channel:?} seq={:6}  {:?}",
                        sample.sequence, sample.values
                    );
                }
            }
            MyoEvent::EmgProcessed(emg) => {
                println!("[EMG~]  {:?}", emg.values);
            }

            // ── IMU ──────────────────────────────────────────────────────────
            MyoEvent::Imu(imu) => {
                let q = imu.orientation;
                let a = imu.accelerometer;
                println!(
                    "[IMU]   q=({:+.3} {:+.3} {:+.3} {:+.3})  a=({:+.3} {:+.3} {:+.3}) g",
                    q.w, q.x, q.y, q.z, a.x, a.y, a.z
                );
            }
            MyoEvent::Motion(MotionEvent::Tap { direction, count }) => {
                println!("[TAP]   direction={direction} count={count}");
            }

            // ── Classifier / battery ──────────────────────────────────────────
            MyoEvent::Classifier(ClassifierEvent::PoseChange(pose)) => {
                println!("[POSE]  {pose:?}");
            }
            MyoEvent::Classifier(other) => {
                println!("[CLASS] {other:?}");
            }
            MyoEvent::Battery(level) => {
                println!("[BATT]  {}%", level.percent());
            }

            MyoEvent::Malformed { channel, error } => {
                warn!("Malformed {channel:?} payload: {error}");
            }
        }
    }

    info!("Event loop finished – exiting.");
    Ok(())
}
