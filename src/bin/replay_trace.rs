//! Replay a recorded event trace and print the JIT-unfriendliness report.
//!
//! Usage: replay_trace <trace.json> [--config analyzer.toml] [--load snapshot.json] [--save snapshot.json]

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use jit_checker::host::{parse_trace, Heap, Replayer};
use jit_checker::{
    AnalysisResult, Analyzer, AnalyzerConfig, HostResolver, Identity, Site, Snapshot, StaticLocations,
};

#[derive(Default)]
struct Args {
    trace: PathBuf,
    config: Option<PathBuf>,
    load: Option<PathBuf>,
    save: Option<PathBuf>,
}

fn parse_args() -> Result<Args> {
    let mut args = Args::default();
    let mut trace = None;
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        let mut value = |flag: &str| iter.next().map(PathBuf::from).with_context(|| format!("{} needs a path", flag));
        match arg.as_str() {
            "--config" => args.config = Some(value("--config")?),
            "--load" => args.load = Some(value("--load")?),
            "--save" => args.save = Some(value("--save")?),
            other if other.starts_with("--") => bail!("unknown option {}", other),
            other => trace = Some(PathBuf::from(other)),
        }
    }
    args.trace = trace.context("usage: replay_trace <trace.json> [--config file] [--load file] [--save file]")?;
    Ok(args)
}

/// Locations from the config, names from the replay heap
struct ReplayResolver<'a> {
    heap: &'a Heap,
    locations: StaticLocations,
}

impl HostResolver for ReplayResolver<'_> {
    fn location_of(&self, site: Site) -> Option<String> {
        self.locations.location_of(site)
    }

    fn function_name(&self, function: Identity) -> AnalysisResult<Option<String>> {
        self.heap.function_name(function)
    }

    fn prototype_owner_name(&self, prototype: Identity) -> AnalysisResult<Option<String>> {
        self.heap.prototype_owner_name(prototype)
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = parse_args()?;
    let config = match &args.config {
        Some(path) => AnalyzerConfig::load(path)?,
        None => AnalyzerConfig::default(),
    };
    let locations = config.location_table();
    let mut analyzer = Analyzer::new(config);

    let text = std::fs::read_to_string(&args.trace)
        .with_context(|| format!("reading trace {}", args.trace.display()))?;
    let events = parse_trace(&text).with_context(|| format!("parsing trace {}", args.trace.display()))?;

    let mut replayer = Replayer::new();
    replayer.replay(&mut analyzer, &events)?;

    let resolver = ReplayResolver {
        heap: replayer.heap(),
        locations,
    };
    if let Some(path) = &args.load {
        let snapshot = Snapshot::load(path)?;
        analyzer
            .merge_saved(snapshot.store, &resolver)
            .with_context(|| format!("merging snapshot {}", path.display()))?;
    }
    analyzer.on_run_end(&resolver);

    if let Some(path) = &args.save {
        Snapshot::new(analyzer.store(), &resolver)
            .save(path)
            .with_context(|| format!("saving snapshot {}", path.display()))?;
    }
    Ok(())
}
