use std::cell::Cell;
use std::fs;
use std::path::PathBuf;
use std::rc::Rc;

use clap::Parser;
use log::warn;

use cacheflow::request::Request;
use cacheflow::sim::top::{MemSystem, MemSystemConfig};
use cacheflow::sim::traffic::TrafficGen;

#[derive(Parser)]
#[command(version, about)]
struct CacheflowArgs {
    /// TOML configuration; defaults apply when omitted.
    config_path: Option<PathBuf>,

    #[arg(long)]
    requests: Option<u64>,
    #[arg(long)]
    pattern: Option<String>,
    #[arg(long)]
    timeout: Option<u64>,
}

pub fn main() {
    env_logger::init();
    let argv = CacheflowArgs::parse();

    let mut config = match &argv.config_path {
        Some(path) => {
            let text = fs::read_to_string(path).expect("cannot read config file");
            let doc = text
                .parse::<toml::Value>()
                .expect("cannot parse config file");
            MemSystemConfig::from_toml(&doc)
        }
        None => MemSystemConfig::default(),
    };
    config.traffic.requests = argv.requests.unwrap_or(config.traffic.requests);
    if let Some(pattern) = argv.pattern {
        config.traffic.pattern = pattern;
    }
    config.sim.timeout = argv.timeout.unwrap_or(config.sim.timeout);

    let mut system = MemSystem::new(&config);
    let mut stream = TrafficGen::new(&config.traffic);
    let completed = Rc::new(Cell::new(0u64));

    let mut pending: Option<Request> = None;
    let mut absorbed = 0u64;
    for _ in 0..config.sim.timeout {
        let req = pending.take().or_else(|| {
            stream.next_access().map(|(addr, kind)| {
                let completed = completed.clone();
                Request::new(addr, kind, 0)
                    .with_callback(Rc::new(move |_: &Request| {
                        completed.set(completed.get() + 1)
                    }))
            })
        });
        if let Some(req) = req {
            if system.send(req.clone()) {
                absorbed += 1;
            } else {
                pending = Some(req);
            }
        }
        system.tick();
        if pending.is_none() && stream.remaining() == 0 && system.idle() {
            break;
        }
    }
    if !system.idle() {
        warn!("timed out with work outstanding");
    }

    println!(
        "cycles: {}, absorbed: {}, completions: {}",
        system.clk(),
        absorbed,
        completed.get()
    );
    for (level, stats) in system.cache_stats() {
        println!(
            "{}: access {} (r {} w {}), miss {} (r {} w {}), evictions {}, \
             mshr hits {}, mshr stalls {}, set stalls {}",
            level.as_str(),
            stats.total_access,
            stats.read_access,
            stats.write_access,
            stats.total_miss,
            stats.read_miss,
            stats.write_miss,
            stats.evictions,
            stats.mshr_hits,
            stats.mshr_unavailable,
            stats.set_unavailable,
        );
    }
    let mem = system.mem_stats();
    println!(
        "mem: enqueued {}, issued {}, completed {}, row hits {}, row misses {}, \
         row conflicts {}, precharges {}",
        mem.enqueued,
        mem.issued,
        mem.completed,
        mem.row_hits,
        mem.row_misses,
        mem.row_conflicts,
        mem.precharges,
    );
}
