//! Console front end for the recognition pipeline
//!
//! Stands in for a GUI: starts the server, then drives the controller from
//! stdin commands and prints transcript and state updates as they arrive.

use tokio::io::{AsyncBufReadExt, BufReader};

use sherpa_scribe::config;
use sherpa_scribe::{RecognizerController, RecognizerState};

#[tokio::main]
async fn main() {
    // Load .env file if present (for development convenience)
    let _ = dotenvy::dotenv();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let settings = config::load_settings();
    let controller = RecognizerController::new(&settings);

    log::info!("Starting recognition server...");
    if controller.start_server().await {
        log::info!("Recognition server started");
    } else {
        log::error!(
            "Failed to start recognition server: {}",
            controller
                .server_error()
                .unwrap_or_else(|| "unknown error".to_string())
        );
    }

    let printer = spawn_state_printer(&controller);
    print_help();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        let (command, argument) = match line.split_once(' ') {
            Some((c, a)) => (c, a.trim()),
            None => (line, ""),
        };
        match command {
            "" => {}
            "connect" => controller.connect().await,
            "disconnect" => controller.disconnect().await,
            "start" => controller.start_recognition().await,
            "stop" => controller.stop_recognition().await,
            "devices" => {
                controller.refresh_devices().await;
                // Give the rescan a moment to land before printing
                tokio::time::sleep(std::time::Duration::from_millis(300)).await;
                print_devices(&controller.snapshot());
            }
            "select" => select_device(&controller, argument).await,
            "clear" => controller.clear_results().await,
            "status" => print_status(&controller),
            "restart" => {
                let ok = controller.restart_server().await;
                println!("server restart: {}", if ok { "ok" } else { "failed" });
            }
            "quit" | "exit" => break,
            _ => print_help(),
        }
    }

    printer.abort();
    log::info!("Shutting down...");
    controller.shutdown().await;
}

/// Print transcript, error and session-state changes as they land.
fn spawn_state_printer(controller: &RecognizerController) -> tokio::task::JoinHandle<()> {
    let mut state_rx = controller.watch_state();
    tokio::spawn(async move {
        let mut last = RecognizerState::default();
        while state_rx.changed().await.is_ok() {
            let state = state_rx.borrow().clone();
            if state.session != last.session {
                println!("[session {}]", state.session.as_str());
            }
            if state.last_result != last.last_result && !state.last_result.is_empty() {
                println!(">> {}", state.last_result);
            }
            if state.error != last.error {
                if let Some(error) = &state.error {
                    println!("[error] {}", error);
                }
            }
            last = state;
        }
    })
}

async fn select_device(controller: &RecognizerController, argument: &str) {
    if argument.is_empty() {
        println!("usage: select <number|name>");
        return;
    }
    let state = controller.snapshot();
    let id = match argument.parse::<usize>() {
        Ok(index) => match state.microphones.get(index.wrapping_sub(1)) {
            Some(device) => device.id.clone(),
            None => {
                println!("no device #{}", argument);
                return;
            }
        },
        Err(_) => argument.to_string(),
    };
    controller.select_microphone(id).await;
}

fn print_devices(state: &RecognizerState) {
    if state.microphones.is_empty() {
        println!("no microphone found");
        return;
    }
    for (index, device) in state.microphones.iter().enumerate() {
        let marker = if Some(device.id.as_str()) == state.selected_device.as_deref() {
            "*"
        } else {
            " "
        };
        println!("{} {}. {}", marker, index + 1, device.label);
    }
}

fn print_status(controller: &RecognizerController) {
    let server = controller.server_status();
    let state = controller.snapshot();
    println!(
        "server: {}{}  session: {}  recognizing: {}",
        if server.is_running { "running" } else { "stopped" },
        server
            .pid
            .map(|pid| format!(" (pid {})", pid))
            .unwrap_or_default(),
        state.session.as_str(),
        state.is_recognizing
    );
}

fn print_help() {
    println!(
        "commands: connect | disconnect | start | stop | devices | \
         select <n> | clear | status | restart | quit"
    );
}
