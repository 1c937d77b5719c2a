use std::net::SocketAddr;
use std::path::PathBuf;

use atelier_nodes::api::nodes::invoke_node;
use atelier_nodes::api::server::{default_app_root, live_runtime, serve};
use atelier_nodes::nodes::catalog::node_catalog;
use atelier_nodes::nodes::conversation::ConversationStore;
use serde_json::{json, Value};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let cli_args = std::env::args().skip(1).collect::<Vec<_>>();
    match cli_args.first().map(String::as_str) {
        Some("list-nodes") => {
            println!("{}", serde_json::to_string_pretty(&node_catalog())?);
            return Ok(());
        }
        Some("run-node") => {
            let parsed = parse_run_node_cli_args(&cli_args[1..])?;
            tokio::task::spawn_blocking(move || run_node_cli(parsed).map_err(|e| e.to_string()))
                .await?
                .map_err(std::io::Error::other)?;
            return Ok(());
        }
        Some("-h" | "--help") => {
            print_usage();
            return Ok(());
        }
        Some("serve") | None => {}
        Some(unknown) => {
            return Err(std::io::Error::other(format!(
                "Unknown command: {unknown}\n\nUse --help for usage."
            ))
            .into());
        }
    }

    let bind =
        std::env::var("ATELIER_NODES_BIND").unwrap_or_else(|_| String::from("127.0.0.1:8790"));
    let addr: SocketAddr = bind.parse()?;
    let runtime = live_runtime(default_app_root().as_path())?;

    serve(addr, runtime).await?;
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct RunNodeCliArgs {
    node: String,
    request_path: Option<PathBuf>,
    app_root: PathBuf,
}

fn parse_run_node_cli_args(args: &[String]) -> Result<RunNodeCliArgs, Box<dyn std::error::Error>> {
    let mut node = None::<String>;
    let mut request_path = None::<PathBuf>;
    let mut app_root = default_app_root();
    let mut i = 0usize;
    while i < args.len() {
        let flag = args[i].as_str();
        let needs_value = |idx: usize| -> Result<String, Box<dyn std::error::Error>> {
            let Some(value) = args.get(idx + 1) else {
                return Err(std::io::Error::other(format!("Missing value for {flag}")).into());
            };
            Ok(value.clone())
        };

        match flag {
            "--node" => {
                node = Some(needs_value(i)?);
                i += 2;
            }
            "--request" => {
                request_path = Some(PathBuf::from(needs_value(i)?));
                i += 2;
            }
            "--app-root" => {
                app_root = PathBuf::from(needs_value(i)?);
                i += 2;
            }
            unknown => {
                return Err(std::io::Error::other(format!(
                    "Unknown argument: {unknown}\n\nUse --help for usage."
                ))
                .into());
            }
        }
    }

    let node = node
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| std::io::Error::other("Missing required --node"))?;
    Ok(RunNodeCliArgs {
        node,
        request_path,
        app_root,
    })
}

fn run_node_cli(args: RunNodeCliArgs) -> Result<(), Box<dyn std::error::Error>> {
    let body: Value = match args.request_path.as_ref() {
        Some(path) => serde_json::from_str(std::fs::read_to_string(path)?.as_str())?,
        None => json!({}),
    };
    let runtime = live_runtime(args.app_root.as_path())?;
    let outputs = invoke_node(&runtime, &ConversationStore::new(), args.node.as_str(), body)?;
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({"ok": true, "node": args.node, "outputs": outputs}))?
    );
    Ok(())
}

fn print_usage() {
    eprintln!(concat!(
        "Usage:\n",
        "  atelier-nodes [serve]                 bind from ATELIER_NODES_BIND (default 127.0.0.1:8790)\n",
        "  atelier-nodes list-nodes\n",
        "  atelier-nodes run-node --node <name> [--request <file.json>] [--app-root <path>]\n"
    ));
}
