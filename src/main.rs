use meshmap::collect::{Alfred, Batctl};
use meshmap::config::BackendConfig;
use meshmap::export::{self, ExportError};
use meshmap::graph::RawGraph;
use meshmap::import;
use meshmap::mac::MacAddress;
use meshmap::models::VisRecord;
use meshmap::storage::{History, HistoryError};
use meshmap::store::NodeStore;

use chrono::Utc;
use clap::Parser;
use log::{error, info, warn};
use std::collections::BTreeSet;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Parser, Debug)]
#[command(name = "meshmap")]
#[command(version, about = "Mesh network map backend - merges node telemetry from multiple sources into one canonical topology")]
struct Args {
    /// Path to configuration file
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Destination directory for generated files (overrides config file)
    #[arg(long, short = 'd')]
    dest_dir: Option<PathBuf>,

    /// batman mesh interface (repeatable, overrides config file)
    #[arg(long = "mesh", short = 'm')]
    mesh: Vec<String>,

    /// Read static aliases from FILE (repeatable)
    #[arg(long = "alias", short = 'a', value_name = "FILE")]
    aliases: Vec<PathBuf>,

    /// Assume MAC to be part of the VPN (repeatable)
    #[arg(long = "vpn", value_name = "MAC")]
    vpn: Vec<MacAddress>,

    /// Forget nodes offline for at least DAYS
    #[arg(long, value_name = "DAYS")]
    prune: Option<u64>,

    /// Generate a default configuration file
    #[arg(long)]
    generate_config: bool,
}

#[derive(Debug, Error)]
enum CycleError {
    #[error("export failed: {0}")]
    Export(#[from] ExportError),

    #[error("history recording failed: {0}")]
    History(#[from] HistoryError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

struct CycleSummary {
    nodes: usize,
    online: usize,
    links: usize,
    clients: u64,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if args.generate_config {
        let path = PathBuf::from("meshmap.toml");
        match BackendConfig::create_default_config_file(&path) {
            Ok(_) => {
                info!("generated default configuration at {:?}", path);
                return;
            }
            Err(e) => {
                error!("failed to generate config: {}", e);
                std::process::exit(1);
            }
        }
    }

    let mut config = match &args.config {
        Some(path) => match BackendConfig::from_file(path) {
            Ok(cfg) => {
                info!("loaded configuration from {:?}", path);
                cfg
            }
            Err(e) => {
                error!("failed to load config: {}", e);
                std::process::exit(1);
            }
        },
        None => BackendConfig::default(),
    };

    // Override with CLI args if provided
    if let Some(dest_dir) = args.dest_dir {
        config.output.destination_dir = dest_dir;
    }
    if !args.mesh.is_empty() {
        config.sources.mesh_interfaces = args.mesh;
    }
    config.sources.alias_files.extend(args.aliases);
    config.topology.vpn_addresses.extend(args.vpn);
    if args.prune.is_some() {
        config.topology.prune_days = args.prune;
    }

    if let Err(e) = config.validate() {
        error!("invalid configuration: {}", e);
        std::process::exit(1);
    }

    match run_cycle(&config) {
        Ok(summary) => {
            info!(
                "cycle complete: {} nodes ({} online), {} links, {} clients",
                summary.nodes, summary.online, summary.links, summary.clients
            );
        }
        Err(e) => {
            error!("processing cycle failed: {}", e);
            std::process::exit(1);
        }
    }
}

/// One batch processing cycle: previous state plus fresh telemetry in,
/// node database, topology and history rows out.
fn run_cycle(config: &BackendConfig) -> Result<CycleSummary, CycleError> {
    let now = Utc::now();
    let dest = &config.output.destination_dir;
    std::fs::create_dir_all(dest)?;
    let nodes_path = dest.join("nodes.json");
    let graph_path = dest.join("graph.json");

    let mut store = match export::load_node_db(&nodes_path) {
        Some(db) => {
            let (store, skipped) = NodeStore::restore(&db);
            if skipped > 0 {
                warn!("dropped {skipped} conflicting nodes from previous state");
            }
            info!("loaded {} nodes from previous cycle", store.len());
            store
        }
        None => NodeStore::new(),
    };
    store.reset_flags();

    // Materialize all sources before any import; a dead source contributes
    // nothing but never kills the cycle.
    let alfred = Alfred::new(config.sources.alfred_request_type);
    let nodeinfo = alfred.nodeinfo().unwrap_or_else(|e| {
        warn!("node-info collection failed: {e}");
        Vec::new()
    });
    let statistics = alfred.statistics().unwrap_or_else(|e| {
        warn!("statistics collection failed: {e}");
        Vec::new()
    });

    let mut domains: Vec<(Vec<VisRecord>, Vec<MacAddress>)> = Vec::new();
    for mesh in &config.sources.mesh_interfaces {
        let batctl = Batctl::new(mesh);
        let vis = batctl.vis_data().unwrap_or_else(|e| {
            warn!("vis collection on {mesh} failed: {e}");
            Vec::new()
        });
        let gateways = batctl.gateway_list().unwrap_or_else(|e| {
            warn!("gateway collection on {mesh} failed: {e}");
            Vec::new()
        });
        domains.push((vis, gateways));
    }

    let report = import::import_nodeinfo(&mut store, &nodeinfo, now, config.sources.assume_online);
    log_report("node-info", &report);

    for path in &config.sources.alias_files {
        match meshmap::collect::read_alias_file(path) {
            Ok(aliases) => {
                let report = import::import_aliases(&mut store, &aliases);
                log_report("aliases", &report);
            }
            Err(e) => warn!("alias file {path:?} skipped: {e}"),
        }
    }

    import::reset_statistics(&mut store);
    let report = import::import_statistics(&mut store, &statistics);
    log_report("statistics", &report);

    for (vis, gateways) in &domains {
        let report = import::import_mesh_interfaces(&mut store, vis);
        log_report("mesh interfaces", &report);
        import::mark_vis_online(&mut store, vis, now);
        let report = import::import_gateways(&mut store, gateways);
        log_report("gateways", &report);
    }

    if let Some(days) = config.topology.prune_days {
        let removed = store.prune(now, days);
        if removed > 0 {
            info!("pruned {removed} stale nodes");
        }
    }

    let all_vis: Vec<VisRecord> = domains.iter().flat_map(|(vis, _)| vis.iter().copied()).collect();
    let mut raw = RawGraph::build(&all_vis, &mut store);

    let mut vpn_interfaces: BTreeSet<MacAddress> = config.topology.vpn_addresses.iter().copied().collect();
    vpn_interfaces.extend(store.vpn_interfaces());
    raw.mark_vpn(&vpn_interfaces);
    let topology = raw.reduce(&store);

    export::write_node_db(&nodes_path, &store.snapshot(now))?;
    export::write_topology(&graph_path, &store, &topology)?;
    if config.output.bat_hosts {
        export::write_bat_hosts(&dest.join("bat-hosts"), &store)?;
    }

    if config.history.enabled {
        let history = History::new(&config.history)?;
        history.record_cycle(now, &store)?;
        history.cleanup(config.history.retention_days)?;
    }

    Ok(CycleSummary {
        nodes: store.len(),
        online: store.online_count(),
        links: topology.links.len(),
        clients: store.client_total(),
    })
}

fn log_report(source: &str, report: &import::ImportReport) {
    if report.skipped > 0 {
        info!(
            "{source}: imported {}, skipped {} ({} ambiguous)",
            report.imported,
            report.skipped,
            report.conflicts.len()
        );
    } else {
        info!("{source}: imported {}", report.imported);
    }
}
