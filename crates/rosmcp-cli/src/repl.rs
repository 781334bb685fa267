//! REPL – Read-Eval-Print Loop for the rosmcp interactive shell.
//!
//! Supported slash-commands:
//!   /help                                   – show this list
//!   /topics                                 – list bridge topics and types
//!   /twist lx ly lz ax ay az                – publish one velocity command
//!   /sequence lx ly lz ax ay az d1 [d2 …]   – hold one command per duration
//!   /steps l a d [l a d …]                  – per-step commands (`l`/`a` as `x,y,z`)
//!   /capture front|back [path]              – save one camera frame
//!   /snapshot front|back [max_kb]           – size-bounded base64 JPEG
//!   /snapshot-both [max_kb]                 – both cameras on one connection
//!   /sample <topic> [timeout_s]             – take one message from a topic
//!   /config                                 – edit `~/.rosmcp/config.toml`
//!   /quit | /exit                           – exit the CLI

use colored::Colorize;
use serde_json::Value;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio::sync::watch;

use rosmcp_middleware::{Camera, RobotTools};

use crate::config::{self, Config};

/// A parsed REPL line.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Help,
    Topics,
    Twist {
        linear: Vec<Value>,
        angular: Vec<Value>,
    },
    Sequence {
        linear: Vec<Value>,
        angular: Vec<Value>,
        durations: Vec<Value>,
    },
    Steps {
        linear_seq: Vec<Vec<Value>>,
        angular_seq: Vec<Vec<Value>>,
        durations: Vec<Value>,
    },
    Capture {
        camera: Camera,
        path: Option<PathBuf>,
    },
    Snapshot {
        camera: Camera,
        max_kb: Option<f64>,
    },
    SnapshotBoth {
        max_kb: Option<f64>,
    },
    Sample {
        topic: String,
        timeout: Option<Duration>,
    },
    Config,
    Quit,
}

/// Entry point for the interactive REPL.
///
/// `shutdown` is polled each iteration; when set the REPL exits cleanly.
/// `stop` interrupts twist sequences in flight.
pub fn run(runtime: &Runtime, shutdown: Arc<AtomicBool>, stop: watch::Receiver<bool>) {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut tools = build_tools(&load_config_or_default(), &stop);

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        print!("{} ", "rosmcp>".bold().cyan());
        stdout.flush().ok();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break, // EOF
            Ok(_) => {}
            Err(e) => {
                eprintln!("{}: {}", "Read error".red(), e);
                break;
            }
        }

        let cmd = line.trim();
        if cmd.is_empty() {
            continue;
        }

        let command = match parse_command(cmd) {
            Ok(command) => command,
            Err(message) => {
                println!("{} {}", "✗".red().bold(), message);
                continue;
            }
        };

        match command {
            Command::Help => cmd_help(),
            Command::Quit => {
                println!("{}", "Goodbye.".green());
                shutdown.store(true, Ordering::SeqCst);
                break;
            }
            Command::Config => {
                cmd_config();
                tools = build_tools(&load_config_or_default(), &stop);
            }
            other => {
                let outcome = runtime.block_on(execute(&tools, other));
                print_outcome(&outcome);
            }
        }
    }
}

fn build_tools(cfg: &Config, stop: &watch::Receiver<bool>) -> RobotTools {
    RobotTools::new(cfg.tools_config()).with_stop_signal(stop.clone())
}

/// Run a bridge command.  REPL-local commands yield `Value::Null`.
async fn execute(tools: &RobotTools, command: Command) -> Value {
    match command {
        Command::Topics => tools.list_topics().await,
        Command::Twist { linear, angular } => tools.publish_twist(&linear, &angular).await,
        Command::Sequence {
            linear,
            angular,
            durations,
        } => tools.publish_twist_sequence(&linear, &angular, &durations).await,
        Command::Steps {
            linear_seq,
            angular_seq,
            durations,
        } => {
            tools
                .publish_twist_steps(&linear_seq, &angular_seq, &durations)
                .await
        }
        Command::Capture { camera, path } => tools.capture(camera, path.as_deref()).await,
        Command::Snapshot { camera, max_kb } => tools.camera_image_base64(camera, max_kb).await,
        Command::SnapshotBoth { max_kb } => tools.both_cameras_base64(max_kb).await,
        Command::Sample { topic, timeout } => tools.sample_topic(&topic, timeout).await,
        Command::Help | Command::Config | Command::Quit => Value::Null,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Parsing
// ─────────────────────────────────────────────────────────────────────────────

/// Parse one REPL line.  Numbers stay as text; the bridge layer coerces and
/// reports bad values.
pub fn parse_command(line: &str) -> Result<Command, String> {
    let mut tokens = line.split_whitespace();
    let Some(head) = tokens.next() else {
        return Err("empty command".to_string());
    };
    let args: Vec<&str> = tokens.collect();

    match head {
        "/help" => Ok(Command::Help),
        "/topics" => Ok(Command::Topics),
        "/twist" => {
            if args.len() != 6 {
                return Err(usage("/twist lx ly lz ax ay az"));
            }
            Ok(Command::Twist {
                linear: values(&args[..3]),
                angular: values(&args[3..6]),
            })
        }
        "/sequence" => {
            if args.len() < 7 {
                return Err(usage("/sequence lx ly lz ax ay az d1 [d2 …]"));
            }
            Ok(Command::Sequence {
                linear: values(&args[..3]),
                angular: values(&args[3..6]),
                durations: values(&args[6..]),
            })
        }
        "/steps" => {
            if args.is_empty() || args.len() % 3 != 0 {
                return Err(usage("/steps x,y,z x,y,z d [x,y,z x,y,z d …]"));
            }
            let mut linear_seq = Vec::new();
            let mut angular_seq = Vec::new();
            let mut durations = Vec::new();
            for step in args.chunks(3) {
                linear_seq.push(components(step[0]));
                angular_seq.push(components(step[1]));
                durations.push(Value::from(step[2]));
            }
            Ok(Command::Steps {
                linear_seq,
                angular_seq,
                durations,
            })
        }
        "/capture" => match args.as_slice() {
            [camera] => Ok(Command::Capture {
                camera: camera.parse()?,
                path: None,
            }),
            [camera, path] => Ok(Command::Capture {
                camera: camera.parse()?,
                path: Some(PathBuf::from(path)),
            }),
            _ => Err(usage("/capture front|back [path]")),
        },
        "/snapshot" => match args.as_slice() {
            [camera] => Ok(Command::Snapshot {
                camera: camera.parse()?,
                max_kb: None,
            }),
            [camera, max_kb] => Ok(Command::Snapshot {
                camera: camera.parse()?,
                max_kb: Some(parse_kb(max_kb)?),
            }),
            _ => Err(usage("/snapshot front|back [max_kb]")),
        },
        "/snapshot-both" => match args.as_slice() {
            [] => Ok(Command::SnapshotBoth { max_kb: None }),
            [max_kb] => Ok(Command::SnapshotBoth {
                max_kb: Some(parse_kb(max_kb)?),
            }),
            _ => Err(usage("/snapshot-both [max_kb]")),
        },
        "/sample" => match args.as_slice() {
            [topic] => Ok(Command::Sample {
                topic: topic.to_string(),
                timeout: None,
            }),
            [topic, secs] => {
                let timeout = secs
                    .parse::<f64>()
                    .ok()
                    .and_then(|s| Duration::try_from_secs_f64(s).ok())
                    .ok_or_else(|| format!("'{secs}' is not a valid timeout in seconds"))?;
                Ok(Command::Sample {
                    topic: topic.to_string(),
                    timeout: Some(timeout),
                })
            }
            _ => Err(usage("/sample <topic> [timeout_s]")),
        },
        "/config" | "/settings" => Ok(Command::Config),
        "/quit" | "/exit" => Ok(Command::Quit),
        other => Err(format!(
            "Unknown command '{}'. Type {} for available commands.",
            other.yellow(),
            "/help".bold()
        )),
    }
}

fn usage(form: &str) -> String {
    format!("usage: {form}")
}

fn values(tokens: &[&str]) -> Vec<Value> {
    tokens.iter().map(|t| Value::from(*t)).collect()
}

fn components(token: &str) -> Vec<Value> {
    token.split(',').map(|c| Value::from(c.trim())).collect()
}

fn parse_kb(raw: &str) -> Result<f64, String> {
    match raw.parse::<f64>() {
        Ok(kb) if kb.is_finite() && kb > 0.0 => Ok(kb),
        _ => Err(format!("'{raw}' is not a valid size in KB")),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Output
// ─────────────────────────────────────────────────────────────────────────────

fn print_outcome(outcome: &Value) {
    let status = outcome.get("status").and_then(Value::as_str).unwrap_or("");
    let marker = match status {
        "success" => "✓".green().bold(),
        "cancelled" => "⚠".yellow().bold(),
        _ => "✗".red().bold(),
    };
    if let Some(message) = outcome.get("message").and_then(Value::as_str) {
        println!("{marker} {message}");
    } else {
        println!("{marker} {status}");
    }
    let shown = elide_base64(outcome);
    if let Ok(pretty) = serde_json::to_string_pretty(&shown) {
        println!("{}", pretty.dimmed());
    }
}

/// Replace every `image_base64` payload with its length.
pub fn elide_base64(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| match (k.as_str(), v) {
                    ("image_base64", Value::String(s)) => {
                        (k.clone(), Value::from(format!("<{} base64 chars>", s.len())))
                    }
                    _ => (k.clone(), elide_base64(v)),
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(elide_base64).collect()),
        other => other.clone(),
    }
}

fn cmd_help() {
    println!();
    println!("{}", "rosmcp Commands".bold().underline());
    println!("  {}                             – list topics and types", "/topics".bold().cyan());
    println!("  {}        – publish one velocity command", "/twist lx ly lz ax ay az".bold().cyan());
    println!("  {} – hold one command per duration", "/sequence lx ly lz ax ay az d…".bold().cyan());
    println!("  {}           – per-step commands, vectors as x,y,z", "/steps l a d [l a d …]".bold().cyan());
    println!("  {}         – save one camera frame", "/capture front|back [path]".bold().cyan());
    println!("  {}     – size-bounded base64 JPEG", "/snapshot front|back [max_kb]".bold().cyan());
    println!("  {}            – both cameras", "/snapshot-both [max_kb]".bold().cyan());
    println!("  {}          – take one message", "/sample <topic> [timeout_s]".bold().cyan());
    println!("  {}                             – edit ~/.rosmcp/config.toml", "/config".bold().cyan());
    println!("  {}                       – exit the CLI", "/quit  /exit".bold().cyan());
    println!();
}

fn cmd_config() {
    let mut cfg = match config::load() {
        Ok(Some(c)) => c,
        Ok(None) => Config::default(),
        Err(e) => {
            println!("{}: {}", "Error loading config".red(), e);
            return;
        }
    };

    println!("{}", "Settings Editor".bold().underline());
    cfg.bridge_host = prompt_str(&format!("  Bridge host    [{}]: ", cfg.bridge_host), &cfg.bridge_host);
    cfg.bridge_port = prompt_u16(&format!("  Bridge port    [{}]: ", cfg.bridge_port), cfg.bridge_port);
    cfg.cmd_vel_topic = prompt_str(&format!("  cmd_vel topic  [{}]: ", cfg.cmd_vel_topic), &cfg.cmd_vel_topic);
    cfg.front_camera_topic = prompt_str(
        &format!("  Front camera   [{}]: ", cfg.front_camera_topic),
        &cfg.front_camera_topic,
    );
    cfg.back_camera_topic = prompt_str(
        &format!("  Back camera    [{}]: ", cfg.back_camera_topic),
        &cfg.back_camera_topic,
    );
    cfg.output_dir = prompt_str(&format!("  Output dir     [{}]: ", cfg.output_dir), &cfg.output_dir);

    match config::save(&cfg) {
        Ok(()) => println!(
            "{} {}",
            "✓ Settings saved to".green(),
            config::config_path().display().to_string().bold()
        ),
        Err(e) => println!("{}: {}", "Error saving config".red(), e),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

pub fn load_config_or_default() -> Config {
    config_or_default(config::load())
}

/// Fall back to defaults (with `ROSMCP_*` overrides) when nothing usable
/// was loaded.
fn config_or_default(loaded: Result<Option<Config>, String>) -> Config {
    let mut cfg = match loaded {
        Ok(Some(c)) => return c,
        Ok(None) => Config::default(),
        Err(e) => {
            println!("{}: {} – using defaults", "Config error".red(), e);
            Config::default()
        }
    };
    config::apply_env_overrides(&mut cfg);
    cfg
}

/// Prompt for a u16 value.  Returns `default` when the user presses Enter.
fn prompt_u16(msg: &str, default: u16) -> u16 {
    let raw = prompt_str(msg, &default.to_string());
    match raw.parse::<u16>() {
        Ok(v) => v,
        Err(_) => {
            println!(
                "  {} '{}' is not a valid port number, keeping {}",
                "Warning:".yellow(),
                raw,
                default
            );
            default
        }
    }
}

/// Prompt for a string value.  Returns `default` when the user presses Enter.
pub fn prompt_str(msg: &str, default: &str) -> String {
    print!("{}", msg);
    io::stdout().flush().ok();

    let mut line = String::new();
    match io::stdin().lock().read_line(&mut line) {
        Ok(_) => {
            let trimmed = line.trim().to_string();
            if trimmed.is_empty() {
                default.to_string()
            } else {
                trimmed
            }
        }
        Err(_) => default.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn broken_config_falls_back_to_defaults_with_env_overrides() {
        let _guard = config::ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        // SAFETY: ENV_LOCK serialises every test that touches ROSMCP_* variables.
        unsafe { std::env::set_var("ROSMCP_BRIDGE_HOST", "192.168.4.2") };
        let from_error = config_or_default(Err("Failed to parse config".to_string()));
        let from_missing = config_or_default(Ok(None));
        unsafe { std::env::remove_var("ROSMCP_BRIDGE_HOST") };

        assert_eq!(from_error.bridge_host, "192.168.4.2");
        assert_eq!(from_missing.bridge_host, "192.168.4.2");
        assert_eq!(from_error.bridge_port, Config::default().bridge_port);
    }

    #[test]
    fn twist_keeps_tokens_as_text() {
        let cmd = parse_command("/twist 0.2 0 0 0 0 -0.5").unwrap();
        assert_eq!(
            cmd,
            Command::Twist {
                linear: vec![json!("0.2"), json!("0"), json!("0")],
                angular: vec![json!("0"), json!("0"), json!("-0.5")],
            }
        );
        assert!(parse_command("/twist 1 2 3").is_err());
    }

    #[test]
    fn sequence_takes_remaining_tokens_as_durations() {
        let Command::Sequence { durations, .. } =
            parse_command("/sequence 0.1 0 0 0 0 0 1.5 2").unwrap()
        else {
            panic!("expected sequence");
        };
        assert_eq!(durations, vec![json!("1.5"), json!("2")]);
        assert!(parse_command("/sequence 0.1 0 0 0 0 0").is_err());
    }

    #[test]
    fn steps_split_vectors_on_commas() {
        let cmd = parse_command("/steps 0.2,0,0 0,0,0 1 0,0,0 0,0,0.5 2").unwrap();
        let Command::Steps {
            linear_seq,
            angular_seq,
            durations,
        } = cmd
        else {
            panic!("expected steps");
        };
        assert_eq!(linear_seq.len(), 2);
        assert_eq!(linear_seq[0], vec![json!("0.2"), json!("0"), json!("0")]);
        assert_eq!(angular_seq[1], vec![json!("0"), json!("0"), json!("0.5")]);
        assert_eq!(durations, vec![json!("1"), json!("2")]);
        assert!(parse_command("/steps 0,0,0 0,0,0").is_err());
    }

    #[test]
    fn camera_commands_validate_arguments() {
        assert_eq!(
            parse_command("/capture back /tmp/b.png").unwrap(),
            Command::Capture {
                camera: Camera::Back,
                path: Some(PathBuf::from("/tmp/b.png")),
            }
        );
        assert_eq!(
            parse_command("/snapshot front 250").unwrap(),
            Command::Snapshot {
                camera: Camera::Front,
                max_kb: Some(250.0),
            }
        );
        assert!(parse_command("/snapshot side").is_err());
        assert!(parse_command("/snapshot front -3").is_err());
        assert_eq!(
            parse_command("/snapshot-both").unwrap(),
            Command::SnapshotBoth { max_kb: None }
        );
    }

    #[test]
    fn sample_parses_optional_timeout() {
        assert_eq!(
            parse_command("/sample /battery 1.5").unwrap(),
            Command::Sample {
                topic: "/battery".to_string(),
                timeout: Some(Duration::from_millis(1500)),
            }
        );
        assert!(parse_command("/sample /battery soon").is_err());
    }

    #[test]
    fn unknown_command_is_an_error() {
        assert!(parse_command("/launch").is_err());
        assert_eq!(parse_command("/exit").unwrap(), Command::Quit);
    }

    #[test]
    fn elide_base64_replaces_nested_payloads() {
        let outcome = json!({
            "status": "success",
            "cameras": { "front": { "image_base64": "QUJD", "quality": 85 } }
        });
        let shown = elide_base64(&outcome);
        assert_eq!(shown["cameras"]["front"]["image_base64"], "<4 base64 chars>");
        assert_eq!(shown["cameras"]["front"]["quality"], 85);
    }
}
