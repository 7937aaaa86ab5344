/**
 * Room Control Example
 *
 * Reads the controller state, applies one command and reads the state again.
 *
 * Config comes from the JSON file named by `ROOMCTL_CONFIG`, or from the
 * defaults plus `ROOMCTL_TOKEN`. Build with `--features btleplug` to try the
 * Bluetooth LE transport before the socket.
 *
 *   ROOMCTL_TOKEN=... cargo run --example room_control -- light_on
 */
use roomctl::{Command, ControllerBuilder, ControllerConfig};
use std::env;

#[tokio::main]
async fn main() {
    env_logger::init();
    println!("--- roomctl {} - Room Control ---", roomctl::version());

    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("[ERROR] {e}");
            return;
        }
    };

    let cmd: Command = match env::args().nth(1).as_deref().unwrap_or("light_on").parse() {
        Ok(cmd) => cmd,
        Err(e) => {
            eprintln!("[ERROR] {e}");
            eprintln!(
                "[INFO] Known commands: {}",
                Command::ALL.iter().map(|c| c.label()).collect::<Vec<_>>().join(", ")
            );
            return;
        }
    };

    #[allow(unused_mut)]
    let mut builder = ControllerBuilder::from_config(config);
    #[cfg(feature = "btleplug")]
    match roomctl::ble::btle::BtleplugRadio::new().await {
        Ok(radio) => builder = builder.radio(std::sync::Arc::new(radio)),
        Err(e) => println!("[INFO] Bluetooth unavailable ({e}), socket only"),
    }
    let controller = builder.build();
    println!("[INFO] Platform: {}", controller.platform());

    // 1. Current state
    println!("[STEP 1] Reading state...");
    match controller.get_state().await {
        Ok(state) => println!("[SUCCESS] {}", state.to_json()),
        Err(e) => eprintln!("[ERROR] {e} (code {})", e.code()),
    }

    // 2. Apply the command
    println!("[STEP 2] Sending {cmd}...");
    match controller.set_state(cmd).await {
        Ok(()) => println!(
            "[SUCCESS] Applied via {}",
            controller
                .last_transport()
                .map(|t| t.to_string())
                .unwrap_or_default()
        ),
        Err(e) => eprintln!("[ERROR] {e} (code {})", e.code()),
    }

    // 3. Observe the result
    println!("[STEP 3] Reading state again...");
    match controller.get_state().await {
        Ok(state) => println!("[SUCCESS] {}", state.to_json()),
        Err(e) => eprintln!("[ERROR] {e} (code {})", e.code()),
    }

    controller.shutdown().await;
    println!("[INFO] Example finished.");
}

fn load_config() -> Result<ControllerConfig, String> {
    if let Ok(path) = env::var("ROOMCTL_CONFIG") {
        let text = std::fs::read_to_string(&path).map_err(|e| format!("{path}: {e}"))?;
        return ControllerConfig::from_json(&text).map_err(|e| format!("{path}: {e}"));
    }
    env::var("ROOMCTL_TOKEN")
        .map(ControllerConfig::new)
        .map_err(|_| "set ROOMCTL_CONFIG or ROOMCTL_TOKEN".to_string())
}
