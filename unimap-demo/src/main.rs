use std::{env, fs, sync::Arc};

use anyhow::Context;
use unimap::{
    provider::loader::ScriptRegistry,
    testing::{NativeCall, ScriptedSdk},
    AdapterRegistry, FacadeConfig, MapFacade, MapProps, PropsOutcome,
};

fn read_props(path: &str) -> anyhow::Result<MapProps> {
    let json = fs::read_to_string(path).with_context(|| format!("reading {}", path))?;
    Ok(MapProps::from_json(&json)?)
}

fn print_calls(sdk: &ScriptedSdk) {
    for call in sdk.calls() {
        match call {
            NativeCall::Load { url } => println!("  load {}", url),
            NativeCall::Construct { id, class, args } => {
                println!("  #{} = new {}({})", id, class, serde_json::Value::Array(args))
            }
            NativeCall::Invoke {
                target,
                method,
                args,
            } => println!("  #{}.{}({})", target, method, serde_json::Value::Array(args)),
            NativeCall::Release { target } => println!("  release #{}", target),
            NativeCall::Listen { target, event } => println!("  #{}.on('{}')", target, event),
            NativeCall::Unlisten { listener } => println!("  off listener {}", listener),
        }
    }
    sdk.clear_calls();
}

/// Mounts a map from a props file against the scripted vendor bridge and
/// prints every native call the reconciler makes
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let mut args = env::args().skip(1);
    let first = args
        .next()
        .context("usage: unimap-demo <props.json> [next-props.json]")?;
    let next = args.next();

    let config = FacadeConfig::development();
    let sdk = Arc::new(ScriptedSdk::new());
    let registry = AdapterRegistry::with_sdk_and_scripts(sdk.clone(), config.mode, ScriptRegistry::new());
    let facade = MapFacade::new(registry, read_props(&first)?, config)?;

    println!("mount {} ({})", first, facade.provider());
    facade.mount().await?;
    print_calls(&sdk);

    if let Some(path) = next {
        println!("props {}", path);
        match facade.set_props(read_props(&path)?)? {
            PropsOutcome::Reconciled(report) => {
                log::info!("{} operations, {} failed", report.operations.len(), report.failures.len());
            }
            PropsOutcome::RemountRequired => {
                println!("provider changed, remounting");
                facade.mount().await?;
            }
            other => log::info!("props change: {:?}", other),
        }
        print_calls(&sdk);
    }

    for event in facade.process_events() {
        println!("event {:?}", event);
    }

    println!("unmount");
    facade.unmount();
    print_calls(&sdk);
    Ok(())
}
