use clap::{App as ClapApp, Arg, ArgMatches, SubCommand};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use trieste::{App, AppConfig, NexusDef, Result, Tray, TrieadOwner, TriesteError};

const POLL: Duration = Duration::from_millis(100);

fn main() -> Result<()> {
    env_logger::init();

    let matches = ClapApp::new("trieste-cli")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Trieste thread registry and nexus demo tool")
        .subcommand(
            SubCommand::with_name("pipeline")
                .about("Run a chain of threads fanned out to several readers")
                .arg(
                    Arg::with_name("threads")
                        .short("t")
                        .long("threads")
                        .value_name("N")
                        .help("Number of chained stages")
                        .default_value("3")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("items")
                        .short("i")
                        .long("items")
                        .value_name("M")
                        .help("Number of trays pushed through the chain")
                        .default_value("10000")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("readers")
                        .short("r")
                        .long("readers")
                        .value_name("R")
                        .help("Number of readers of the last stage")
                        .default_value("2")
                        .takes_value(true),
                ),
        )
        .subcommand(
            SubCommand::with_name("loops")
                .about("Check a three-thread ring against the topology check")
                .arg(
                    Arg::with_name("reverse_last")
                        .long("reverse-last")
                        .help("Make the nexus closing the ring a reverse one"),
                ),
        )
        .subcommand(SubCommand::with_name("info").about("Show version information"))
        .get_matches();

    match matches.subcommand() {
        ("pipeline", Some(m)) => run_pipeline(
            parse_arg(m, "threads")?,
            parse_arg(m, "items")?,
            parse_arg(m, "readers")?,
        ),
        ("loops", Some(m)) => run_loops(m.is_present("reverse_last")),
        ("info", Some(_)) => {
            println!("Trieste v{}", trieste::VERSION);
            Ok(())
        }
        _ => {
            println!("Use --help for usage information");
            Ok(())
        }
    }
}

fn parse_arg<T: FromStr>(matches: &ArgMatches, name: &str) -> Result<T> {
    let value = matches
        .value_of(name)
        .ok_or_else(|| TriesteError::invalid_parameter(name, "missing value"))?;
    value
        .parse()
        .map_err(|_| TriesteError::invalid_parameter(name, format!("invalid value '{}'", value)))
}

fn stage_name(idx: usize) -> String {
    format!("stage{}", idx)
}

/// Run `body`, aborting the app if it fails
fn guarded(owner: TrieadOwner, body: impl FnOnce(&TrieadOwner) -> Result<()>) -> Result<()> {
    let result = body(&owner);
    if let Err(e) = &result {
        owner.abort(&e.to_string());
    }
    result
}

fn run_pipeline(threads: usize, items: u64, readers: usize) -> Result<()> {
    if threads == 0 {
        return Err(TriesteError::invalid_parameter("threads", "must be at least 1"));
    }
    let app = App::create_with_config("pipeline", AppConfig::default())?;
    let start = Instant::now();

    for idx in 0..threads {
        let name = stage_name(idx);
        let owner = app.make_triead(&name)?;
        let handle = thread::spawn(move || guarded(owner, |o| run_stage(o, idx, items)));
        app.define_join(&name, handle)?;
    }

    let counts: Vec<Arc<AtomicU64>> = (0..readers).map(|_| Arc::new(AtomicU64::new(0))).collect();
    for (idx, count) in counts.iter().enumerate() {
        let name = format!("sink{}", idx);
        let owner = app.make_triead(&name)?;
        let source = stage_name(threads - 1);
        let count = count.clone();
        let handle =
            thread::spawn(move || guarded(owner, |o| run_sink(o, &source, items, &count)));
        app.define_join(&name, handle)?;
    }

    app.harvester(true)?;
    let elapsed = start.elapsed();

    println!("Pipeline of {} stages, {} readers", threads, readers);
    for (idx, count) in counts.iter().enumerate() {
        println!("  sink{}: {} trays", idx, count.load(Ordering::Relaxed));
    }
    println!(
        "  {} trays in {:?} ({:.0} trays/s)",
        items,
        elapsed,
        items as f64 / elapsed.as_secs_f64().max(f64::EPSILON)
    );
    Ok(())
}

fn run_stage(owner: &TrieadOwner, idx: usize, items: u64) -> Result<()> {
    owner.export_nexus(NexusDef::new("out"))?;
    owner.mark_constructed()?;
    let mut input = match idx {
        0 => None,
        _ => Some(owner.import_reader(&stage_name(idx - 1), "out", false)?),
    };
    let mut output = owner.import_writer(owner.name(), "out", false)?;
    owner.ready_ready()?;

    let Some(input) = input.as_mut() else {
        for n in 0..items {
            output.write(Tray::encode(&n)?.into_shared())?;
        }
        return Ok(());
    };
    let mut passed = 0;
    while passed < items {
        if owner.is_aborted() {
            return Ok(());
        }
        if let Some(d) = input.read_timeout(POLL) {
            output.write(d.tray)?;
            passed += 1;
        }
    }
    Ok(())
}

fn run_sink(owner: &TrieadOwner, source: &str, items: u64, count: &AtomicU64) -> Result<()> {
    let mut input = owner.import_reader(source, "out", false)?;
    owner.ready_ready()?;

    let mut expected = 0u64;
    while expected < items {
        if owner.is_aborted() {
            return Ok(());
        }
        let Some(d) = input.read_timeout(POLL) else {
            continue;
        };
        let n: u64 = d.tray.decode()?;
        if n != expected {
            return Err(TriesteError::invalid_state(format!(
                "{} received tray {} out of order, expected {}",
                owner.name(),
                n,
                expected
            )));
        }
        expected += 1;
        count.fetch_add(1, Ordering::Relaxed);
    }
    Ok(())
}

fn run_loops(reverse_last: bool) -> Result<()> {
    let app = App::create("loops")?;
    let names = ["t1", "t2", "t3"];
    let mut owners = Vec::new();
    for (i, name) in names.iter().enumerate() {
        let owner = app.make_triead(name)?;
        let mut def = NexusDef::new("n");
        if reverse_last && i == names.len() - 1 {
            def = def.reverse();
        }
        owner.export_nexus(def)?;
        owner.mark_constructed()?;
        owners.push(owner);
    }

    // each thread writes its own nexus and reads the previous one
    let mut facets = Vec::new();
    for (i, owner) in owners.iter().enumerate() {
        let prev = names[(i + names.len() - 1) % names.len()];
        facets.push(owner.import_reader(prev, "n", true)?);
    }
    let mut writers = Vec::new();
    for owner in &owners {
        writers.push(owner.import_writer(owner.name(), "n", true)?);
    }

    let mut verdict = Ok(());
    for owner in &owners {
        if let Err(e) = owner.mark_ready() {
            verdict = Err(e);
            break;
        }
    }
    match &verdict {
        Ok(()) => println!("Topology accepted"),
        Err(e) => println!("Topology rejected: {}", e),
    }

    drop(facets);
    drop(writers);
    drop(owners);
    app.harvester(false)
}
