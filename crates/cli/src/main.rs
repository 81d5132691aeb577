use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use fleet_api::{ApiConfig, FleetApi, FleetError, HttpApi};
use fleet_core::columns::{builtin_columns_for, ColumnDescriptor};
use fleet_core::presets::FilterPreset;
use fleet_core::query::{FilterSpec, PageWindow, SortSpec};
use fleet_core::selection::ReferenceKind;
use fleet_core::{Collection, RefreshTarget, RowId};
use fleet_grid::{spawn_grid, Grid, GridConfig, GridReader, GridView, RowSlot};
use fleet_live::{spawn_channel, LiveConfig, LiveState, WsConnector};
use fleet_picker::{spawn_picker, Picker, PickerConfig};
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "fleetctl", version, about = "Fleet records client")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Backend base URL
    #[arg(long = "base-url", env = "FLEET_BASE_URL", global = true)]
    base_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(clap::Args, Debug, Clone)]
struct View {
    /// Sort keys, e.g. "x:desc,id"
    #[arg(long = "sort")]
    sort: Option<String>,
    /// Filter presets: fuel>N, type=T, power=MIN..MAX, x=N, y=N (repeatable)
    #[arg(long = "filter", action = ArgAction::Append)]
    filters: Vec<String>,
    /// First row to show
    #[arg(long = "start", default_value_t = 0)]
    start: usize,
    /// Number of rows to show
    #[arg(long = "rows", default_value_t = 20)]
    rows: usize,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List one window of rows
    Ls {
        /// coordinates, person or vehicle
        collection: Collection,
        #[command(flatten)]
        view: View,
    },
    /// Keep a window on screen and reload it on push refresh signals
    Watch {
        collection: Collection,
        #[command(flatten)]
        view: View,
    },
    /// Reference search (typeahead suggestions)
    Search {
        collection: Collection,
        #[arg(default_value = "")]
        query: String,
        #[arg(long = "limit", env = "FLEET_SEARCH_LIMIT", default_value_t = 20)]
        limit: usize,
    },
    /// Resolve free text to one referenced record, as an edit form would
    Pick {
        collection: Collection,
        text: String,
        /// Treat an unresolved value as an error
        #[arg(long = "required", action = ArgAction::SetTrue)]
        required: bool,
    },
    /// Fetch one record
    Get {
        collection: Collection,
        id: RowId,
    },
    /// Delete one record
    Rm {
        collection: Collection,
        id: RowId,
        /// Move dependents to this record first
        #[arg(long = "reassign-to")]
        reassign_to: Option<RowId>,
    },
    /// Create a record from a JSON object
    New {
        collection: Collection,
        body: String,
    },
    /// Update fields of a record from a JSON object
    Put {
        collection: Collection,
        id: RowId,
        body: String,
    },
    /// Vehicle with the smallest distance travelled
    MinDistance {
        /// Apply these fields to the found vehicle
        #[arg(long = "set")]
        set: Option<String>,
    },
    /// Count vehicles whose fuel consumption is above a threshold
    CountFuelGt {
        threshold: f64,
    },
}

fn parse_body(raw: &str) -> Result<serde_json::Value> {
    let v: serde_json::Value = serde_json::from_str(raw).context("body is not valid JSON")?;
    if !v.is_object() {
        return Err(anyhow!("body must be a JSON object"));
    }
    Ok(v)
}

fn init_tracing() {
    let env = std::env::var("FLEET_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("FLEET_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid FLEET_METRICS_ADDR; expected host:port");
        }
    }
}

fn wait_timeout() -> Duration {
    Duration::from_secs(std::env::var("FLEET_WAIT_SECS").ok().and_then(|s| s.parse::<u64>().ok()).unwrap_or(8))
}

fn build_specs(collection: Collection, view: &View) -> Result<(SortSpec, FilterSpec)> {
    let sort = match &view.sort {
        Some(s) => SortSpec::from_str(s).map_err(|e| anyhow!(e))?,
        None => SortSpec::none(),
    };
    let mut filter = FilterSpec::none();
    for raw in &view.filters {
        let preset = FilterPreset::from_str(raw).with_context(|| format!("filter {}", raw))?;
        let (col, pred) = preset.build(collection).with_context(|| format!("filter {}", raw))?;
        filter = filter.with(col, pred);
    }
    Ok((sort, filter))
}

/// Spawn a grid positioned on the requested window and wait for it to load.
async fn open_grid(api: Arc<dyn FleetApi>, collection: Collection, view: &View) -> Result<(fleet_grid::GridHandle, GridReader)> {
    let (sort, filter) = build_specs(collection, view)?;
    let grid = Grid::new(collection, builtin_columns_for(collection), GridConfig::from_env());
    let (handle, reader) = spawn_grid(api, grid, None);
    if !sort.is_empty() {
        handle.set_sort(sort);
    }
    if !filter.is_empty() {
        handle.set_filter_model(filter);
    }
    let window = PageWindow::new(view.start, view.start + view.rows.max(1));
    handle.scroll_to(window);
    let settled = tokio::time::timeout(wait_timeout(), reader.wait_until(|v| v.viewport == window && v.is_settled())).await;
    match settled {
        Ok(Some(_)) => Ok((handle, reader)),
        Ok(None) => Err(anyhow!("grid stopped before the first window loaded")),
        Err(_) => Err(anyhow!("timed out waiting for rows")),
    }
}

fn print_view(view: &GridView, output: Output) -> Result<()> {
    match output {
        Output::Human => {
            let cols: Vec<&ColumnDescriptor> = view.columns.iter().filter(|c| !c.is_inert()).collect();
            let header: Vec<String> = cols.iter().map(|c| pad(c.label, c)).collect();
            println!("{}", header.join(" "));
            for (i, slot) in view.visible() {
                match slot {
                    RowSlot::Loaded(row) => {
                        let cells: Vec<String> = cols.iter().map(|c| pad(&c.render(row), c)).collect();
                        println!("{}", cells.join(" "));
                    }
                    RowSlot::Stale(row, e) => {
                        let cells: Vec<String> = cols.iter().map(|c| pad(&c.render(row), c)).collect();
                        println!("{} ! stale: {}", cells.join(" "), e);
                    }
                    RowSlot::Loading => println!("{:>6}  …", i),
                    RowSlot::Failed(e) => println!("{:>6}  ! {}", i, e),
                    RowSlot::BeyondData => break,
                }
            }
            match view.total() {
                Some(n) => eprintln!("rows {}-{} of {}", view.viewport.start_row, view.viewport.end_row.min(n), n),
                None => eprintln!("rows {}-{} of ?", view.viewport.start_row, view.viewport.end_row),
            }
        }
        Output::Json => {
            let rows: Vec<_> = view.visible().filter_map(|(_, s)| match s {
                RowSlot::Loaded(r) => Some(r.clone()),
                _ => None,
            }).collect();
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
    }
    Ok(())
}

fn pad(text: &str, col: &ColumnDescriptor) -> String {
    let w = ((col.width / 10.0) as usize).max(4);
    let mut s: String = text.chars().take(w).collect();
    while s.chars().count() < w {
        s.push(' ');
    }
    s
}

fn explain_error(e: &FleetError) -> String {
    match e {
        FleetError::Conflict { message, ref_count, .. } if e.needs_reassign() => {
            let n = ref_count.map(|n| n.to_string()).unwrap_or_else(|| "some".to_string());
            format!("{} ({} dependent records); retry with --reassign-to <id>", message, n)
        }
        FleetError::Transport(_) | FleetError::Timeout => format!("{}; backend unreachable, try again", e),
        other => other.to_string(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    let mut cfg = ApiConfig::from_env();
    if let Some(base) = &cli.base_url {
        cfg = ApiConfig::new(base, cfg.timeout);
    }
    let http = HttpApi::new(cfg.clone()).map_err(|e| anyhow!(e))?;
    let api: Arc<dyn FleetApi> = Arc::new(http);

    match cli.command {
        Commands::Ls { collection, view } => {
            info!(collection = %collection, start = view.start, rows = view.rows, "ls invoked");
            let (handle, reader) = open_grid(Arc::clone(&api), collection, &view).await?;
            print_view(&reader.current(), cli.output)?;
            handle.shutdown();
        }
        Commands::Watch { collection, view } => {
            info!(collection = %collection, "watch invoked");
            let (handle, reader) = open_grid(Arc::clone(&api), collection, &view).await?;
            let connector = WsConnector::for_collection(&cfg, collection).map_err(|e| anyhow!(e))?;
            info!(url = %connector.url(), "push channel");
            let target: Arc<dyn RefreshTarget> = Arc::new(handle.clone());
            let live = spawn_channel(collection.socket_segment(), Arc::new(connector), target, LiveConfig::from_env());
            let mut states = live.subscribe_state();
            let mut epochs = reader.subscribe_epoch();
            print_view(&reader.current(), cli.output)?;
            loop {
                tokio::select! {
                    changed = epochs.changed() => {
                        if changed.is_err() {
                            warn!("grid loop ended");
                            break;
                        }
                        let v = reader.current();
                        if v.is_settled() {
                            print_view(&v, cli.output)?;
                        }
                    }
                    changed = states.changed() => {
                        if changed.is_err() { break; }
                        let s = *states.borrow_and_update();
                        if s != LiveState::Connecting {
                            eprintln!("push: {:?}", s);
                        }
                    }
                    _ = signal::ctrl_c() => {
                        info!("Ctrl-C received; shutting down watch loop");
                        break;
                    }
                }
            }
            live.shutdown().await;
            handle.shutdown();
        }
        Commands::Search { collection, query, limit } => {
            info!(collection = %collection, query = %query, limit, "search invoked");
            // Suggestions fail open: an unreachable backend shows nothing.
            let rows = match api.search(collection, &query, limit).await {
                Ok(rows) => rows,
                Err(e) => {
                    warn!(error = %e, "search failed");
                    Vec::new()
                }
            };
            let kind = ReferenceKind::for_collection(collection);
            match cli.output {
                Output::Human => {
                    println!("ID      LABEL");
                    for r in &rows {
                        println!("{:<7} {}", r.id().map(|i| i.to_string()).unwrap_or_default(), kind.label(r));
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
            }
        }
        Commands::Pick { collection, text, required } => {
            info!(collection = %collection, text = %text, required, "pick invoked");
            let pcfg = PickerConfig::from_env();
            let (tx, mut changes) = mpsc::unbounded_channel();
            let picker = Picker::new(ReferenceKind::for_collection(collection), required);
            let (handle, reader) = spawn_picker(Arc::clone(&api), picker, pcfg, Some(tx));
            handle.input(text.clone());
            // Let the debounced fetch for this text start, then wait for it.
            tokio::time::sleep(pcfg.debounce + Duration::from_millis(10)).await;
            let loaded = tokio::time::timeout(wait_timeout(), reader.wait_until(|v| !v.loading)).await;
            if loaded.is_err() {
                warn!("suggestions did not arrive in time; resolving against what is loaded");
            }
            handle.blur();
            let sel = changes.recv().await.ok_or_else(|| anyhow!("picker stopped"))?;
            let view = reader.wait_until(|v| v.touched).await.ok_or_else(|| anyhow!("picker stopped"))?;
            handle.shutdown();
            match cli.output {
                Output::Human => {
                    println!("{}", serde_json::to_string(&sel)?);
                    if !view.description.is_empty() {
                        eprintln!("{}", view.description);
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&sel)?),
            }
            if view.invalid {
                return Err(anyhow!("no record matches {:?}", text));
            }
        }
        Commands::Get { collection, id } => {
            info!(collection = %collection, id, "get invoked");
            let row = api.get(collection, id).await.map_err(|e| anyhow!(explain_error(&e)))?;
            println!("{}", serde_json::to_string_pretty(&row)?);
        }
        Commands::Rm { collection, id, reassign_to } => {
            info!(collection = %collection, id, reassign_to = ?reassign_to, "rm invoked");
            match api.delete(collection, id, reassign_to).await {
                Ok(()) => println!("deleted {} {}", collection, id),
                Err(e) => return Err(anyhow!(explain_error(&e))),
            }
        }
        Commands::New { collection, body } => {
            info!(collection = %collection, "new invoked");
            let body = parse_body(&body)?;
            let id = api.create(collection, &body).await.map_err(|e| anyhow!(explain_error(&e)))?;
            match cli.output {
                Output::Human => println!("created {} {}", collection, id),
                Output::Json => println!("{}", serde_json::json!({ "id": id })),
            }
        }
        Commands::Put { collection, id, body } => {
            info!(collection = %collection, id, "put invoked");
            let body = parse_body(&body)?;
            api.update(collection, id, &body).await.map_err(|e| anyhow!(explain_error(&e)))?;
            println!("updated {} {}", collection, id);
        }
        Commands::MinDistance { set } => {
            info!(edit = set.is_some(), "min-distance invoked");
            let patch = set.as_deref().map(parse_body).transpose()?;
            let Some(vehicle) = api.min_distance_vehicle().await.map_err(|e| anyhow!(explain_error(&e)))? else {
                eprintln!("no vehicle has a distance travelled");
                return Ok(());
            };
            println!("{}", serde_json::to_string_pretty(&vehicle)?);
            let id = vehicle.id().ok_or_else(|| anyhow!("vehicle without id"))?;
            match patch {
                Some(body) => {
                    api.update(Collection::Vehicle, id, &body).await.map_err(|e| anyhow!(explain_error(&e)))?;
                    eprintln!("updated vehicle {}", id);
                }
                None => eprintln!("edit with: fleetctl put vehicle {} '<json>'", id),
            }
        }
        Commands::CountFuelGt { threshold } => {
            info!(threshold, "count-fuel-gt invoked");
            let n = api.count_fuel_above(threshold).await.map_err(|e| anyhow!(explain_error(&e)))?;
            match cli.output {
                Output::Human => println!("found: {}", n),
                Output::Json => println!("{}", serde_json::json!({ "count": n })),
            }
        }
    }

    Ok(())
}
